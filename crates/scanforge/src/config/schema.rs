use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::quality::DEFAULT_SHARPNESS_THRESHOLD;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Base directory; frames land in `{base}/{job}` and models in
    /// `{base}/3d_models/{job}`.
    pub output_directory: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// SQLite file for job records. Defaults to `~/.scanforge/data/scanforge.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    pub reconstruction: ReconstructionConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

impl Config {
    pub fn output_directory(&self) -> PathBuf {
        PathBuf::from(&self.output_directory)
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_sharpness_threshold")]
    pub sharpness_threshold: f64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Reference image whose EXIF is copied onto accepted frames when a job
    /// doesn't name its own.
    #[serde(default)]
    pub default_reference_metadata: Option<String>,
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,
    #[serde(default = "default_ffprobe_binary")]
    pub ffprobe_binary: String,
}

fn default_sharpness_threshold() -> f64 {
    DEFAULT_SHARPNESS_THRESHOLD
}

fn default_jpeg_quality() -> u8 {
    95
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_binary() -> String {
    "ffprobe".to_string()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            sharpness_threshold: default_sharpness_threshold(),
            jpeg_quality: default_jpeg_quality(),
            default_reference_metadata: None,
            ffmpeg_binary: default_ffmpeg_binary(),
            ffprobe_binary: default_ffprobe_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Engine executable, invoked as `<binary> --input <dir> --output <dir>`.
    pub binary: String,
    /// Appended after `--output`, e.g. `["--forceCpu", "-v", "info"]`.
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// No timeout when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ReconstructionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
