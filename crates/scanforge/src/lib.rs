pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod frames;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod quality;
pub mod reconstruction;
pub mod sanitize;
pub mod worker;

pub use broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, Config};
pub use db::job_repo::JobFilter;
pub use error::{
    ConfigError, ExtractionError, FailureKind, JobFailure, MetadataError, ReconstructionError,
    Result, ScanforgeError, WorkerError,
};
pub use frames::{DecodedFrame, FrameSource, VideoDecoder};
pub use metadata::MetadataPropagator;
pub use pipeline::{ExtractionRequest, ExtractionStats, FrameExtractionPipeline};
pub use quality::SharpnessGate;
pub use reconstruction::{CommandEngine, ReconstructionEngine};
pub use worker::{ConversionJob, JobOrchestrator, JobStatus};
