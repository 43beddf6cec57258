//! Directory-of-stills frame source.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{DecodedFrame, FrameSource, VideoDecoder};
use crate::error::ExtractionError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

/// Treats a directory of images, sorted by file name, as a video.
/// Images are decoded lazily, one per `next()`.
#[derive(Debug, Clone, Default)]
pub struct ImageSequenceDecoder;

impl ImageSequenceDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl VideoDecoder for ImageSequenceDecoder {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, ExtractionError> {
        let unreadable = |reason: String| ExtractionError::UnreadableSource {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_dir() {
            return Err(unreadable("not a directory".to_string()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| unreadable(e.to_string()))?;
            if entry.file_type().is_file() && is_image(entry.path()) {
                files.push(entry.into_path());
            }
        }

        log::debug!(
            "Opened image sequence {} with {} entries",
            path.display(),
            files.len()
        );

        Ok(Box::new(ImageSequence {
            files: files.into_iter(),
        }))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

struct ImageSequence {
    files: std::vec::IntoIter<PathBuf>,
}

impl Iterator for ImageSequence {
    type Item = DecodedFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.files.next()?;
        Some(match image::open(&path) {
            Ok(img) => DecodedFrame::Image(img.to_rgb8()),
            Err(e) => DecodedFrame::empty(format!("{}: {}", path.display(), e)),
        })
    }
}
