use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::broadcast::job_progress::JobPhase;
use crate::error::ExtractionError;
use crate::frames::{DecodedFrame, DefaultDecoder, FfmpegDecoder, VideoDecoder};
use crate::metadata::MetadataPropagator;
use crate::quality::{GateDecision, SharpnessGate};
use crate::sanitize;

use super::config::ExtractionSettings;
use super::progress::{ProgressEvent, ProgressReporter};

const PROGRESS_INTERVAL: u64 = 10;

/// Everything a single extraction run needs to know about its job.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub job_id: String,
    /// Prefix of every frame file name; sanitized before use.
    pub job_name: String,
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub reference_metadata: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Every item the source produced, empty ones included.
    pub frames_read: u64,
    pub frames_written: u64,
    pub frames_accepted: u64,
    pub frames_rejected: u64,
    pub empty_frames: u64,
    pub metadata_failures: u64,
}

#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub output_dir: PathBuf,
    pub stats: ExtractionStats,
}

pub struct FrameExtractionPipeline {
    decoder: Arc<dyn VideoDecoder>,
    gate: SharpnessGate,
    jpeg_quality: u8,
}

impl FrameExtractionPipeline {
    /// Production constructor: ffmpeg-backed decoding with the configured gate.
    pub fn from_settings(settings: &ExtractionSettings) -> Self {
        let decoder = DefaultDecoder::new(FfmpegDecoder::new(
            &settings.ffmpeg_binary,
            &settings.ffprobe_binary,
        ));
        Self::new(
            Arc::new(decoder),
            SharpnessGate::new(settings.sharpness_threshold),
            settings.jpeg_quality,
        )
    }

    pub fn new(decoder: Arc<dyn VideoDecoder>, gate: SharpnessGate, jpeg_quality: u8) -> Self {
        Self {
            decoder,
            gate,
            jpeg_quality,
        }
    }

    pub fn gate(&self) -> &SharpnessGate {
        &self.gate
    }

    /// Streams the source, keeping only frames that pass the sharpness gate.
    ///
    /// Per-frame problems (empty frames, metadata copy failures, failed
    /// deletes) are logged and counted. Only an unreadable source or a
    /// storage failure ends the run early. A source with no decodable frames
    /// yields an empty directory and zero counts.
    pub fn run(
        &self,
        request: &ExtractionRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<ExtractionOutcome, ExtractionError> {
        let source_name = sanitize::redact_path(&request.source);
        let _span = info_span!("pipeline",
            job_id = %request.job_id,
            source = %source_name,
        )
        .entered();

        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Extracting,
            message: "Extracting frames...".to_string(),
        });

        let frames = self.decoder.open(&request.source)?;

        std::fs::create_dir_all(&request.output_dir).map_err(|e| {
            ExtractionError::CreateDirectory {
                path: request.output_dir.clone(),
                source: e,
            }
        })?;

        let metadata = request
            .reference_metadata
            .as_deref()
            .map(MetadataPropagator::from_reference);

        let prefix = sanitize::sanitize_name(&request.job_name);
        let mut stats = ExtractionStats::default();
        let mut index: u64 = 0;

        // `frames` owns the decoder resource; it is released when this
        // loop ends or `?` returns early.
        for frame in frames {
            stats.frames_read += 1;

            let decision = self.gate.evaluate(&frame);
            let image = match &frame {
                DecodedFrame::Image(img) if decision != GateDecision::Empty => img,
                other => {
                    stats.empty_frames += 1;
                    let reason = match other {
                        DecodedFrame::Empty { reason } => reason.as_str(),
                        DecodedFrame::Image(_) => "zero-sized image",
                    };
                    warn!("Empty frame at position {}: {}", stats.frames_read - 1, reason);
                    self.maybe_report(&stats, progress);
                    continue;
                }
            };

            let frame_path = request
                .output_dir
                .join(format!("{}_{}.jpeg", prefix, index));
            self.write_jpeg(image, &frame_path)?;
            stats.frames_written += 1;

            if let GateDecision::Accept { score } = decision {
                stats.frames_accepted += 1;
                debug!("Frame {} accepted (score {:.1})", index, score);
                if let Some(propagator) = &metadata {
                    if let Err(e) = propagator.apply(&frame_path) {
                        stats.metadata_failures += 1;
                        warn!("Metadata copy failed for frame {}: {}", index, e);
                    }
                }
            } else {
                stats.frames_rejected += 1;
                debug!(
                    "Frame {} rejected as blurry (score {:.1})",
                    index,
                    decision.score().unwrap_or_default()
                );
                if let Err(e) = std::fs::remove_file(&frame_path) {
                    warn!(
                        "Failed to delete rejected frame {}: {}",
                        sanitize::redact_path(&frame_path),
                        e
                    );
                }
            }

            index += 1;
            self.maybe_report(&stats, progress);
        }

        info!(
            "Extraction finished: {} read, {} kept, {} blurry, {} empty",
            stats.frames_read, stats.frames_accepted, stats.frames_rejected, stats.empty_frames
        );
        progress.report(ProgressEvent::Frames {
            frames_read: stats.frames_read,
            frames_accepted: stats.frames_accepted,
        });

        Ok(ExtractionOutcome {
            output_dir: request.output_dir.clone(),
            stats,
        })
    }

    fn maybe_report(&self, stats: &ExtractionStats, progress: &dyn ProgressReporter) {
        if stats.frames_read % PROGRESS_INTERVAL == 0 {
            info!(
                "Processed {} frames ({} kept)",
                stats.frames_read, stats.frames_accepted
            );
            progress.report(ProgressEvent::Frames {
                frames_read: stats.frames_read,
                frames_accepted: stats.frames_accepted,
            });
        }
    }

    fn write_jpeg(&self, image: &RgbImage, path: &Path) -> Result<(), ExtractionError> {
        let write_err = |reason: String| ExtractionError::WriteFrame {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::create(path).map_err(|e| write_err(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality);
        encoder
            .encode_image(image)
            .map_err(|e| write_err(e.to_string()))?;
        drop(encoder);
        writer
            .into_inner()
            .map_err(|e| write_err(e.error().to_string()))?
            .sync_all()
            .map_err(|e| write_err(e.to_string()))
    }
}
