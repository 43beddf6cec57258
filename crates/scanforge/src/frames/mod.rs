//! Video frame sources.
//!
//! A [`VideoDecoder`] opens a path and hands back a lazy [`FrameSource`]
//! that yields one [`DecodedFrame`] per call in presentation order. Every
//! source owns its underlying resource and releases it on drop, so early
//! termination and error paths clean up the same way exhaustion does.

pub mod ffmpeg;
pub mod sequence;

use std::path::Path;

use image::RgbImage;

use crate::error::ExtractionError;

pub use ffmpeg::FfmpegDecoder;
pub use sequence::ImageSequenceDecoder;

/// One item from a frame source.
#[derive(Debug)]
pub enum DecodedFrame {
    Image(RgbImage),
    /// The decoder produced nothing usable for this position in the stream.
    Empty { reason: String },
}

impl DecodedFrame {
    pub fn empty(reason: impl Into<String>) -> Self {
        DecodedFrame::Empty {
            reason: reason.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DecodedFrame::Image(img) => img.width() == 0 || img.height() == 0,
            DecodedFrame::Empty { .. } => true,
        }
    }
}

/// A lazy, finite sequence of frames.
pub trait FrameSource: Iterator<Item = DecodedFrame> + Send {}

impl<T> FrameSource for T where T: Iterator<Item = DecodedFrame> + Send {}

/// Opens a path as a frame source. A fresh source is opened per job.
pub trait VideoDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, ExtractionError>;
}

/// Routes directories to [`ImageSequenceDecoder`] and everything else to
/// [`FfmpegDecoder`].
pub struct DefaultDecoder {
    ffmpeg: FfmpegDecoder,
    sequence: ImageSequenceDecoder,
}

impl DefaultDecoder {
    pub fn new(ffmpeg: FfmpegDecoder) -> Self {
        Self {
            ffmpeg,
            sequence: ImageSequenceDecoder::new(),
        }
    }
}

impl Default for DefaultDecoder {
    fn default() -> Self {
        Self::new(FfmpegDecoder::default())
    }
}

impl VideoDecoder for DefaultDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, ExtractionError> {
        if !path.exists() {
            return Err(ExtractionError::UnreadableSource {
                path: path.to_path_buf(),
                reason: "path does not exist".to_string(),
            });
        }

        if path.is_dir() {
            self.sequence.open(path)
        } else {
            self.ffmpeg.open(path)
        }
    }
}
