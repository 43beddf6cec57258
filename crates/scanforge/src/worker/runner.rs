//! Runs one conversion task end to end inside a worker thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::runtime::Runtime;
use tracing::info_span;

use crate::broadcast::job_progress::{JobPhase, JobProgressBroadcaster};
use crate::db::{job_repo, Database};
use crate::error::{FailureKind, JobFailure, ReconstructionError};
use crate::pipeline::progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
use crate::pipeline::{ExtractionRequest, FrameExtractionPipeline};
use crate::reconstruction::ReconstructionEngine;
use crate::sanitize;

use super::job::{ConversionTask, JobOutcome};

pub struct JobRunner {
    db: Database,
    pipeline: FrameExtractionPipeline,
    engine: Arc<dyn ReconstructionEngine>,
    broadcaster: Option<JobProgressBroadcaster>,
    timeout: Option<Duration>,
}

impl JobRunner {
    pub fn new(
        db: Database,
        pipeline: FrameExtractionPipeline,
        engine: Arc<dyn ReconstructionEngine>,
        broadcaster: Option<JobProgressBroadcaster>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            db,
            pipeline,
            engine,
            broadcaster,
            timeout,
        }
    }

    /// Runs the task unless its persisted status has already left
    /// `processing`, then records exactly one terminal transition.
    pub fn execute(&self, task: &ConversionTask, runtime: &Runtime) {
        match job_repo::find_by_id(&self.db, &task.id) {
            Ok(Some(row)) if row.status == job_repo::STATUS_PROCESSING => {}
            Ok(Some(row)) => {
                debug!("Skipping job {}: already {}", task.id, row.status);
                return;
            }
            Ok(None) => {
                warn!("Skipping job {}: no job record", task.id);
                return;
            }
            Err(e) => {
                error!("Failed to load job {}: {}", task.id, e);
                // Still conditional on `processing`, so a job that already
                // finished is left alone.
                self.fail(
                    task,
                    JobFailure::new(
                        FailureKind::Internal,
                        format!("could not load job record: {}", e),
                    ),
                );
                return;
            }
        }

        let progress: Box<dyn ProgressReporter> = match &self.broadcaster {
            Some(b) => Box::new(BroadcastProgress::new(b.tracker(&task.id, &task.name))),
            None => Box::new(NoopProgress),
        };

        let _span = info_span!("job", job_id = %task.id, name = %task.name).entered();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.run_stages(task, runtime, progress.as_ref())
        }))
        .unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            error!("Job {} panicked: {}", task.id, message);
            JobOutcome::failed(FailureKind::Internal, message)
        });

        self.finish(task, outcome, progress.as_ref());
    }

    /// Marks a task failed without running it.
    pub fn fail(&self, task: &ConversionTask, failure: JobFailure) {
        let progress: Box<dyn ProgressReporter> = match &self.broadcaster {
            Some(b) => Box::new(BroadcastProgress::new(b.tracker(&task.id, &task.name))),
            None => Box::new(NoopProgress),
        };
        self.finish(task, JobOutcome::Failed(failure), progress.as_ref());
    }

    fn run_stages(
        &self,
        task: &ConversionTask,
        runtime: &Runtime,
        progress: &dyn ProgressReporter,
    ) -> JobOutcome {
        let request = ExtractionRequest {
            job_id: task.id.clone(),
            job_name: task.name.clone(),
            source: task.source_video_path.clone(),
            output_dir: task.frames_dir.clone(),
            reference_metadata: task.reference_metadata_path.clone(),
        };

        let extraction = {
            let _stage = info_span!("extract").entered();
            match self.pipeline.run(&request, progress) {
                Ok(outcome) => outcome,
                Err(e) => return JobOutcome::Failed(JobFailure::from(&e)),
            }
        };

        let stats = extraction.stats;
        let now = chrono::Utc::now().to_rfc3339();
        if let Err(e) = job_repo::record_frame_counts(
            &self.db,
            &task.id,
            stats.frames_read,
            stats.frames_accepted,
            &now,
        ) {
            warn!("Failed to record frame counts for {}: {}", task.id, e);
        }

        if stats.frames_accepted == 0 {
            return JobOutcome::failed(
                FailureKind::NoUsableFrames,
                format!(
                    "No frame passed the sharpness gate ({} read, {} empty)",
                    stats.frames_read, stats.empty_frames
                ),
            );
        }

        let _stage = info_span!("reconstruct").entered();
        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Reconstructing,
            message: format!(
                "Reconstructing from {} frames...",
                stats.frames_accepted
            ),
        });

        let result = runtime.block_on(self.reconstruct(task));
        match result {
            Ok(output_model_path) => JobOutcome::Completed { output_model_path },
            Err(e) => JobOutcome::Failed(JobFailure::from(&e)),
        }
    }

    async fn reconstruct(
        &self,
        task: &ConversionTask,
    ) -> Result<std::path::PathBuf, ReconstructionError> {
        let invocation = self.engine.invoke(&task.frames_dir, &task.model_dir);
        match self.timeout {
            // Dropping the invocation on expiry kills the engine process.
            Some(limit) => tokio::time::timeout(limit, invocation)
                .await
                .unwrap_or(Err(ReconstructionError::Timeout(limit))),
            None => invocation.await,
        }
    }

    fn finish(&self, task: &ConversionTask, outcome: JobOutcome, progress: &dyn ProgressReporter) {
        let now = chrono::Utc::now().to_rfc3339();
        match outcome {
            JobOutcome::Completed { output_model_path } => {
                let path = output_model_path.display().to_string();
                match job_repo::mark_completed(&self.db, &task.id, &path, &now) {
                    Ok(true) => {
                        info!(
                            "Job {} completed: {}",
                            task.id,
                            sanitize::redact_path(&output_model_path)
                        );
                        progress.report(ProgressEvent::Completed {
                            output_model_path: path,
                        });
                    }
                    Ok(false) => warn!("Job {} left processing before completion", task.id),
                    Err(e) => error!("Failed to persist completion of {}: {}", task.id, e),
                }
            }
            JobOutcome::Failed(failure) => {
                match job_repo::mark_failed(
                    &self.db,
                    &task.id,
                    failure.kind.as_str(),
                    &failure.message,
                    &now,
                ) {
                    Ok(true) => {
                        warn!("Job {} failed: {}", task.id, failure);
                        progress.report(ProgressEvent::Failed {
                            kind: failure.kind,
                            error: failure.message,
                        });
                    }
                    Ok(false) => warn!("Job {} left processing before failure", task.id),
                    Err(e) => error!("Failed to persist failure of {}: {}", task.id, e),
                }
            }
        }
    }
}
