//! Job progress broadcaster for real-time conversion status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::FailureKind;

/// Phase of a conversion job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Extracting,
    Reconstructing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Extracting => write!(f, "Extracting frames"),
            JobPhase::Reconstructing => write!(f, "Reconstructing model"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Coarse job state carried on every event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Processing,
    Completed,
    Failed,
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    /// Job name as submitted.
    pub name: String,
    pub phase: JobPhase,
    pub status: ProgressStatus,
    /// Human-readable message describing current activity.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Set while extracting and once extraction has finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames_accepted: Option<u64>,
    /// Model directory (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_model_path: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, name: &str, phase: JobPhase, message: &str) -> Self {
        let status = match phase {
            JobPhase::Completed => ProgressStatus::Completed,
            JobPhase::Failed => ProgressStatus::Failed,
            _ => ProgressStatus::Processing,
        };

        Self {
            job_id: job_id.to_string(),
            name: name.to_string(),
            phase,
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
            frames_read: None,
            frames_accepted: None,
            output_model_path: None,
            error: None,
            failure_kind: None,
        }
    }

    pub fn completed(job_id: &str, name: &str, output_model_path: &str) -> Self {
        let mut event = Self::new(
            job_id,
            name,
            JobPhase::Completed,
            "Reconstruction completed successfully",
        );
        event.output_model_path = Some(output_model_path.to_string());
        event
    }

    pub fn failed(job_id: &str, name: &str, kind: FailureKind, error: &str) -> Self {
        let mut event = Self::new(job_id, name, JobPhase::Failed, "Conversion failed");
        event.error = Some(error.to_string());
        event.failure_kind = Some(kind);
        event
    }

    pub fn with_frames(mut self, frames_read: u64, frames_accepted: u64) -> Self {
        self.frames_read = Some(frames_read);
        self.frames_accepted = Some(frames_accepted);
        self
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for a newly submitted job and announces it as queued.
    pub fn start_job(&self, job_id: &str, name: &str) -> JobProgressTracker {
        let tracker = self.tracker(job_id, name);
        tracker.update_phase(JobPhase::Queued, "Job queued for processing");
        tracker
    }

    /// Creates a tracker without emitting anything.
    pub fn tracker(&self, job_id: &str, name: &str) -> JobProgressTracker {
        JobProgressTracker::new(job_id, name, Arc::clone(&self.sender))
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: String,
    name: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(job_id: &str, name: &str, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self {
            job_id: job_id.to_string(),
            name: name.to_string(),
            sender,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn update_phase(&self, phase: JobPhase, message: &str) {
        let event = JobProgressEvent::new(&self.job_id, &self.name, phase, message);
        let _ = self.sender.send(event);
    }

    /// Periodic extraction counters.
    pub fn frames(&self, frames_read: u64, frames_accepted: u64, message: &str) {
        let event = JobProgressEvent::new(&self.job_id, &self.name, JobPhase::Extracting, message)
            .with_frames(frames_read, frames_accepted);
        let _ = self.sender.send(event);
    }

    pub fn completed(&self, output_model_path: &str) {
        let event = JobProgressEvent::completed(&self.job_id, &self.name, output_model_path);
        let _ = self.sender.send(event);
    }

    pub fn failed(&self, kind: FailureKind, error: &str) {
        let event = JobProgressEvent::failed(&self.job_id, &self.name, kind, error);
        let _ = self.sender.send(event);
    }
}
