use std::path::PathBuf;

use crate::config::Config;

/// Per-pipeline knobs lifted out of the loaded [`Config`].
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub sharpness_threshold: f64,
    pub jpeg_quality: u8,
    pub ffmpeg_binary: PathBuf,
    pub ffprobe_binary: PathBuf,
}

impl ExtractionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sharpness_threshold: config.extraction.sharpness_threshold,
            jpeg_quality: config.extraction.jpeg_quality,
            ffmpeg_binary: PathBuf::from(&config.extraction.ffmpeg_binary),
            ffprobe_binary: PathBuf::from(&config.extraction.ffprobe_binary),
        }
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            sharpness_threshold: crate::quality::DEFAULT_SHARPNESS_THRESHOLD,
            jpeg_quality: 95,
            ffmpeg_binary: PathBuf::from("ffmpeg"),
            ffprobe_binary: PathBuf::from("ffprobe"),
        }
    }
}
