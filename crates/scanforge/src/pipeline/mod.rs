pub mod config;
pub mod progress;
pub mod runner;

pub use config::ExtractionSettings;
pub use progress::{
    BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter, RecordingProgress,
};
pub use runner::{ExtractionOutcome, ExtractionRequest, ExtractionStats, FrameExtractionPipeline};
