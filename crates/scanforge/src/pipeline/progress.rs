use std::sync::Mutex;

use crate::broadcast::job_progress::{JobPhase, JobProgressTracker};
use crate::error::FailureKind;

/// Events emitted while a job moves through extraction and reconstruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase {
        phase: JobPhase,
        message: String,
    },
    Frames {
        frames_read: u64,
        frames_accepted: u64,
    },
    Completed {
        output_model_path: String,
    },
    Failed {
        kind: FailureKind,
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Collects every event, for assertions.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Bridges pipeline events onto the broadcast channel through a tracker.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(tracker: JobProgressTracker) -> Self {
        Self { tracker }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { phase, message } => {
                self.tracker.update_phase(phase, &message);
            }
            ProgressEvent::Frames {
                frames_read,
                frames_accepted,
            } => {
                let message = format!(
                    "Read {} frames, kept {}",
                    frames_read, frames_accepted
                );
                self.tracker.frames(frames_read, frames_accepted, &message);
            }
            ProgressEvent::Completed { output_model_path } => {
                self.tracker.completed(&output_model_path);
            }
            ProgressEvent::Failed { kind, error } => {
                self.tracker.failed(kind, &error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::job_progress::{JobProgressBroadcaster, ProgressStatus};

    #[test]
    fn test_broadcast_progress_forwards_events() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let progress = BroadcastProgress::new(broadcaster.tracker("job-1", "chair"));

        progress.report(ProgressEvent::Frames {
            frames_read: 20,
            frames_accepted: 7,
        });
        progress.report(ProgressEvent::Failed {
            kind: FailureKind::Storage,
            error: "disk full".to_string(),
        });

        let frames = rx.try_recv().unwrap();
        assert_eq!(frames.phase, JobPhase::Extracting);
        assert_eq!(frames.frames_accepted, Some(7));

        let failed = rx.try_recv().unwrap();
        assert_eq!(failed.status, ProgressStatus::Failed);
        assert_eq!(failed.failure_kind, Some(FailureKind::Storage));
    }

    #[test]
    fn test_recording_progress_keeps_order() {
        let progress = RecordingProgress::new();
        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Extracting,
            message: "start".to_string(),
        });
        progress.report(ProgressEvent::Completed {
            output_model_path: "/m".to_string(),
        });

        let events = progress.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], ProgressEvent::Completed { .. }));
    }
}
