//! Broadcasting of job progress for real-time event streaming.

pub mod job_progress;

pub use job_progress::{
    JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker, ProgressStatus,
};
