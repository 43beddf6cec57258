use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::{FailureKind, JobFailure, WorkerError};
use crate::worker::job::ConversionTask;
use crate::worker::runner::JobRunner;

/// Fixed set of OS threads pulling conversion tasks off a shared queue.
///
/// The queue is unbounded so `submit` never blocks the caller; each worker
/// runs one task at a time.
pub struct WorkerPool {
    job_sender: Sender<ConversionTask>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(runner: Arc<JobRunner>, worker_count: usize) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (job_sender, job_receiver) = unbounded::<ConversionTask>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_runner = Arc::clone(&runner);

            let handle = thread::Builder::new()
                .name(format!("scanforge-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, shutdown_flag, worker_runner))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            workers,
            shutdown,
        })
    }

    pub fn submit(&self, task: ConversionTask) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(task)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Tasks submitted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.job_sender.len()
    }

    /// Asks workers to stop after their current task. Queued tasks stay queued.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<ConversionTask>,
    shutdown: Arc<AtomicBool>,
    runner: Arc<JobRunner>,
) {
    debug!("Worker {} started", worker_id);

    // One current-thread runtime per worker drives the engine process and
    // its timeout without touching other workers.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Worker {} could not start its runtime: {}", worker_id, e);
            let message = format!("worker runtime unavailable: {}", e);
            while let Ok(task) = job_receiver.recv() {
                runner.fail(&task, JobFailure::new(FailureKind::Internal, message.clone()));
            }
            return;
        }
    };

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(task) => {
                debug!("Worker {} processing job {}", worker_id, task.id);
                runner.execute(&task, &runtime);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::frames::ImageSequenceDecoder;
    use crate::pipeline::FrameExtractionPipeline;
    use crate::quality::SharpnessGate;
    use crate::reconstruction::CommandEngine;

    fn test_runner() -> Arc<JobRunner> {
        let pipeline = FrameExtractionPipeline::new(
            Arc::new(ImageSequenceDecoder::new()),
            SharpnessGate::default(),
            90,
        );
        Arc::new(JobRunner::new(
            Database::open_in_memory().unwrap(),
            pipeline,
            Arc::new(CommandEngine::new("true")),
            None,
            None,
        ))
    }

    #[test]
    fn test_worker_pool_creation() {
        let pool = WorkerPool::new(test_runner(), 2).unwrap();
        assert!(!pool.is_shutdown());

        pool.shutdown();
        assert!(pool.is_shutdown());

        pool.wait();
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            WorkerPool::new(test_runner(), 0),
            Err(WorkerError::SpawnFailed(_))
        ));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(test_runner(), 1).unwrap();
        pool.shutdown();

        let task = ConversionTask {
            id: "job-1".to_string(),
            name: "chair".to_string(),
            source_video_path: "/videos/chair.mov".into(),
            reference_metadata_path: None,
            frames_dir: "/tmp/chair".into(),
            model_dir: "/tmp/models/chair".into(),
        };
        assert!(matches!(pool.submit(task), Err(WorkerError::ChannelClosed)));
        pool.wait();
    }

    #[test]
    fn test_unknown_job_is_skipped() {
        let pool = WorkerPool::new(test_runner(), 1).unwrap();
        let task = ConversionTask {
            id: "not-in-db".to_string(),
            name: "chair".to_string(),
            source_video_path: "/videos/chair.mov".into(),
            reference_metadata_path: None,
            frames_dir: "/nonexistent/frames".into(),
            model_dir: "/nonexistent/models".into(),
        };
        pool.submit(task).unwrap();
        // Dropping the sender lets the worker drain the queue and exit.
        pool.wait();
        assert!(!std::path::Path::new("/nonexistent/frames").exists());
    }
}
