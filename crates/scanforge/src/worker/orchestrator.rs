//! Job lifecycle: submission, dispatch, status queries and recovery.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use tokio::sync::broadcast;

use crate::broadcast::job_progress::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::Config;
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{Database, DatabaseError};
use crate::error::{FailureKind, JobFailure, Result, ScanforgeError, WorkerError};
use crate::pipeline::{ExtractionSettings, FrameExtractionPipeline};
use crate::reconstruction::{CommandEngine, ReconstructionEngine};
use crate::sanitize;

use super::job::{ConversionJob, ConversionTask, JobStatus};
use super::pool::WorkerPool;
use super::runner::JobRunner;

/// Subdirectory of the output base that holds model directories.
pub const MODELS_DIR: &str = "3d_models";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub output_directory: PathBuf,
    pub worker_count: usize,
    pub default_reference_metadata: Option<PathBuf>,
    pub reconstruction_timeout: Option<Duration>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_directory: config.output_directory(),
            worker_count: config.worker_count,
            default_reference_metadata: config
                .extraction
                .default_reference_metadata
                .as_ref()
                .map(PathBuf::from),
            reconstruction_timeout: config.reconstruction.timeout(),
        }
    }
}

pub struct JobOrchestrator {
    db: Database,
    settings: OrchestratorSettings,
    pool: Mutex<Option<WorkerPool>>,
    /// Set by the first submission; recovery is refused afterwards
    /// while the pool is alive.
    submitted: AtomicBool,
    broadcaster: JobProgressBroadcaster,
}

impl JobOrchestrator {
    /// Production constructor: opens the job database, wires the ffmpeg
    /// pipeline and the configured engine, and fails any job a previous
    /// process left in `processing`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let db_path = config.database_path().ok_or_else(|| {
            ScanforgeError::InvalidRequest(
                "no database_path configured and no home directory".to_string(),
            )
        })?;
        let db = Database::open(&db_path)?;

        let pipeline = FrameExtractionPipeline::from_settings(&ExtractionSettings::from_config(config));
        let engine = Arc::new(CommandEngine::from_config(&config.reconstruction));

        let orchestrator = Self::new(OrchestratorSettings::from_config(config), db, pipeline, engine)?;
        orchestrator.recover_interrupted()?;
        Ok(orchestrator)
    }

    pub fn new(
        settings: OrchestratorSettings,
        db: Database,
        pipeline: FrameExtractionPipeline,
        engine: Arc<dyn ReconstructionEngine>,
    ) -> Result<Self> {
        let broadcaster = JobProgressBroadcaster::default();
        let runner = Arc::new(JobRunner::new(
            db.clone(),
            pipeline,
            engine,
            Some(broadcaster.clone()),
            settings.reconstruction_timeout,
        ));
        let pool = WorkerPool::new(runner, settings.worker_count)?;

        Ok(Self {
            db,
            settings,
            pool: Mutex::new(Some(pool)),
            submitted: AtomicBool::new(false),
            broadcaster,
        })
    }

    /// Records a `processing` job and queues it. Returns the new job id
    /// without waiting for any work to happen.
    pub fn submit(
        &self,
        video_path: impl AsRef<Path>,
        name: &str,
        reference_metadata_path: Option<PathBuf>,
    ) -> Result<String> {
        let video_path = video_path.as_ref();
        if name.trim().is_empty() {
            return Err(ScanforgeError::InvalidRequest(
                "job name must not be empty".to_string(),
            ));
        }
        if video_path.as_os_str().is_empty() {
            return Err(ScanforgeError::InvalidRequest(
                "video path must not be empty".to_string(),
            ));
        }

        self.submitted.store(true, Ordering::SeqCst);
        let id = uuid::Uuid::new_v4().to_string();
        let key = sanitize::job_key(name, &id);
        let reference =
            reference_metadata_path.or_else(|| self.settings.default_reference_metadata.clone());

        let task = ConversionTask {
            id: id.clone(),
            name: name.to_string(),
            source_video_path: video_path.to_path_buf(),
            reference_metadata_path: reference.clone(),
            frames_dir: self.settings.output_directory.join(&key),
            model_dir: self.settings.output_directory.join(MODELS_DIR).join(&key),
        };

        let now = chrono::Utc::now().to_rfc3339();
        job_repo::insert(
            &self.db,
            &JobRow {
                id: id.clone(),
                name: name.to_string(),
                source_video_path: video_path.display().to_string(),
                reference_metadata_path: reference.map(|p| p.display().to_string()),
                output_model_path: None,
                status: job_repo::STATUS_PROCESSING.to_string(),
                failure_kind: None,
                failure_reason: None,
                frames_read: 0,
                frames_accepted: 0,
                created_at: now.clone(),
                updated_at: now,
                completed_at: None,
            },
        )?;

        self.broadcaster.start_job(&id, name);
        self.dispatch(task)?;

        info!(
            "Submitted job {} ({}) for {}",
            id,
            key,
            sanitize::redact_path(video_path)
        );
        Ok(id)
    }

    /// Hands a freshly inserted task to the pool. Each id is new, so this is
    /// the only dispatch it ever gets; the worker re-checks the stored status.
    fn dispatch(&self, task: ConversionTask) -> Result<()> {
        let submitted = match self.pool.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(pool) => pool.submit(task.clone()),
                None => Err(WorkerError::ChannelClosed),
            },
            Err(_) => Err(WorkerError::ChannelClosed),
        };

        if let Err(e) = submitted {
            let now = chrono::Utc::now().to_rfc3339();
            let failure = JobFailure::new(FailureKind::Internal, format!("dispatch failed: {}", e));
            job_repo::mark_failed(
                &self.db,
                &task.id,
                failure.kind.as_str(),
                &failure.message,
                &now,
            )?;
            self.broadcaster
                .tracker(&task.id, &task.name)
                .failed(failure.kind, &failure.message);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn get_status(&self, job_id: &str) -> Result<Option<JobStatus>> {
        Ok(self.get_job(job_id)?.map(|job| job.status))
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<ConversionJob>> {
        match job_repo::find_by_id(&self.db, job_id)? {
            Some(row) => Ok(Some(ConversionJob::try_from(row)?)),
            None => Ok(None),
        }
    }

    /// Jobs matching `filter`, newest first, plus the total match count.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<ConversionJob>, u64)> {
        let (rows, total) = job_repo::query(&self.db, filter)?;
        let jobs = rows
            .into_iter()
            .map(ConversionJob::try_from)
            .collect::<std::result::Result<Vec<_>, DatabaseError>>()?;
        Ok((jobs, total))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    pub fn broadcaster(&self) -> &JobProgressBroadcaster {
        &self.broadcaster
    }

    /// Fails every job left in `processing` by a process that stopped
    /// before finishing it. Only runs while none of this orchestrator's own
    /// jobs can be in flight: before the first submission or after shutdown.
    pub fn recover_interrupted(&self) -> Result<usize> {
        if self.submitted.load(Ordering::SeqCst) && self.pool_running() {
            return Err(ScanforgeError::InvalidRequest(
                "interrupted-job recovery only runs before the first submission or after shutdown"
                    .to_string(),
            ));
        }
        self.fail_processing_jobs()
    }

    fn pool_running(&self) -> bool {
        self.pool.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    fn fail_processing_jobs(&self) -> Result<usize> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut recovered = 0;
        for id in job_repo::ids_with_status(&self.db, job_repo::STATUS_PROCESSING)? {
            if job_repo::mark_failed(
                &self.db,
                &id,
                FailureKind::Interrupted.as_str(),
                "Job was still processing when the service stopped",
                &now,
            )? {
                recovered += 1;
            }
        }

        if recovered > 0 {
            warn!("Marked {} interrupted jobs as failed", recovered);
        }
        Ok(recovered)
    }

    /// Stops the pool after in-flight jobs finish. Jobs still queued are
    /// failed as interrupted rather than left in `processing`.
    pub fn shutdown(&self) -> Result<()> {
        let pool = self
            .pool
            .lock()
            .map_err(|_| ScanforgeError::Worker(WorkerError::ChannelClosed))?
            .take();
        let Some(pool) = pool else {
            return Ok(());
        };

        pool.shutdown();
        pool.wait();

        self.fail_processing_jobs()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconstructionError;
    use crate::frames::ImageSequenceDecoder;
    use crate::quality::SharpnessGate;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct ImmediateEngine;

    #[async_trait]
    impl ReconstructionEngine for ImmediateEngine {
        async fn invoke(
            &self,
            _input_dir: &Path,
            output_dir: &Path,
        ) -> std::result::Result<PathBuf, ReconstructionError> {
            Ok(output_dir.to_path_buf())
        }
    }

    fn orchestrator(tmp: &TempDir, db: Database) -> JobOrchestrator {
        let settings = OrchestratorSettings {
            output_directory: tmp.path().join("out"),
            worker_count: 1,
            default_reference_metadata: Some(tmp.path().join("default.heic")),
            reconstruction_timeout: None,
        };
        let pipeline = FrameExtractionPipeline::new(
            Arc::new(ImageSequenceDecoder::new()),
            SharpnessGate::default(),
            90,
        );
        JobOrchestrator::new(settings, db, pipeline, Arc::new(ImmediateEngine)).unwrap()
    }

    fn wait_terminal(orch: &JobOrchestrator, id: &str) -> JobStatus {
        for _ in 0..500 {
            if let Some(status) = orch.get_status(id).unwrap() {
                if status.is_terminal() {
                    return status;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("job {} did not finish", id);
    }

    #[test]
    fn test_submit_records_job_with_default_reference() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let orch = orchestrator(&tmp, db.clone());

        let id = orch.submit(tmp.path().join("missing.mov"), "chair", None).unwrap();

        let job = orch.get_job(&id).unwrap().unwrap();
        assert_eq!(job.name, "chair");
        assert_eq!(
            job.reference_metadata_path,
            Some(tmp.path().join("default.heic"))
        );
        orch.shutdown().unwrap();
    }

    #[test]
    fn test_missing_video_fails_unreadable() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, Database::open_in_memory().unwrap());

        let id = orch.submit(tmp.path().join("missing.mov"), "chair", None).unwrap();

        match wait_terminal(&orch, &id) {
            JobStatus::Failed { kind, .. } => assert_eq!(kind, FailureKind::UnreadableSource),
            other => panic!("Expected failure, got {:?}", other),
        }
        orch.shutdown().unwrap();
    }

    #[test]
    fn test_empty_name_rejected() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, Database::open_in_memory().unwrap());

        let result = orch.submit(tmp.path().join("clip.mov"), "   ", None);
        assert!(matches!(result, Err(ScanforgeError::InvalidRequest(_))));
        orch.shutdown().unwrap();
    }

    #[test]
    fn test_unknown_job_has_no_status() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, Database::open_in_memory().unwrap());
        assert!(orch.get_status("nope").unwrap().is_none());
        orch.shutdown().unwrap();
    }

    #[test]
    fn test_recover_interrupted_fails_stale_jobs() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        job_repo::insert(
            &db,
            &JobRow {
                id: "stale".to_string(),
                name: "old".to_string(),
                source_video_path: "/videos/old.mov".to_string(),
                reference_metadata_path: None,
                output_model_path: None,
                status: job_repo::STATUS_PROCESSING.to_string(),
                failure_kind: None,
                failure_reason: None,
                frames_read: 0,
                frames_accepted: 0,
                created_at: "2026-01-01T00:00:00+00:00".to_string(),
                updated_at: "2026-01-01T00:00:00+00:00".to_string(),
                completed_at: None,
            },
        )
        .unwrap();

        let orch = orchestrator(&tmp, db);
        assert_eq!(orch.recover_interrupted().unwrap(), 1);
        assert_eq!(orch.recover_interrupted().unwrap(), 0);

        match orch.get_status("stale").unwrap().unwrap() {
            JobStatus::Failed { kind, .. } => assert_eq!(kind, FailureKind::Interrupted),
            other => panic!("Expected interrupted, got {:?}", other),
        }
        orch.shutdown().unwrap();
    }

    #[test]
    fn test_recovery_refused_while_jobs_may_run() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, Database::open_in_memory().unwrap());

        let id = orch.submit(tmp.path().join("missing.mov"), "chair", None).unwrap();
        assert!(matches!(
            orch.recover_interrupted(),
            Err(ScanforgeError::InvalidRequest(_))
        ));

        // The live job ends on its own outcome, not as interrupted.
        match wait_terminal(&orch, &id) {
            JobStatus::Failed { kind, .. } => assert_eq!(kind, FailureKind::UnreadableSource),
            other => panic!("Expected failure, got {:?}", other),
        }

        orch.shutdown().unwrap();
        assert_eq!(orch.recover_interrupted().unwrap(), 0);
    }

    #[test]
    fn test_submit_after_shutdown_marks_failed() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, Database::open_in_memory().unwrap());
        orch.shutdown().unwrap();

        let result = orch.submit(tmp.path().join("clip.mov"), "late", None);
        assert!(matches!(result, Err(ScanforgeError::Worker(_))));

        let (jobs, total) = orch.list_jobs(&JobFilter::default()).unwrap();
        assert_eq!(total, 1);
        assert!(matches!(
            jobs[0].status,
            JobStatus::Failed {
                kind: FailureKind::Internal,
                ..
            }
        ));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let orch = orchestrator(&tmp, Database::open_in_memory().unwrap());
        orch.shutdown().unwrap();
        orch.shutdown().unwrap();
    }
}
