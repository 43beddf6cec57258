//! Shared test utilities for scanforge integration tests.
//!
//! `TestHarness` gives each test an isolated temp directory, an in-memory
//! job database, and helpers to build frame sequences and stub engines.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use scanforge::db::Database;
use scanforge::frames::ImageSequenceDecoder;
use scanforge::pipeline::FrameExtractionPipeline;
use scanforge::quality::SharpnessGate;
use scanforge::reconstruction::ReconstructionEngine;
use scanforge::worker::{JobOrchestrator, JobStatus, OrchestratorSettings};

/// Test harness providing an isolated environment for job tests.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Where frame and model directories are created.
    pub output_dir: PathBuf,
    /// Where test sources and engine scripts are written.
    pub input_dir: PathBuf,
    pub db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let output_dir = temp_dir.path().join("output");
        let input_dir = temp_dir.path().join("input");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");

        Self {
            temp_dir,
            output_dir,
            input_dir,
            db: Database::open_in_memory().expect("Failed to open database"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a frame sequence directory with `sharp` high-detail frames
    /// followed by `blurry` flat gray frames.
    pub fn frame_sequence(&self, name: &str, sharp: usize, blurry: usize) -> PathBuf {
        let dir = self.input_dir.join(name);
        std::fs::create_dir_all(&dir).expect("Failed to create sequence dir");

        for i in 0..sharp + blurry {
            let img = if i < sharp {
                checkerboard(32, 4)
            } else {
                RgbImage::from_pixel(32, 32, Rgb([128, 128, 128]))
            };
            img.save(dir.join(format!("frame_{:04}.png", i)))
                .expect("Failed to save frame");
        }
        dir
    }

    /// Writes an executable `/bin/sh` script standing in for the engine.
    /// It receives `--input <dir> --output <dir>`.
    #[cfg(unix)]
    pub fn engine_script(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.input_dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod script");
        path
    }

    pub fn settings(&self, timeout: Option<Duration>) -> OrchestratorSettings {
        OrchestratorSettings {
            output_directory: self.output_dir.clone(),
            worker_count: 2,
            default_reference_metadata: None,
            reconstruction_timeout: timeout,
        }
    }

    /// Orchestrator reading image-sequence sources with the default gate.
    pub fn orchestrator(
        &self,
        engine: Arc<dyn ReconstructionEngine>,
        timeout: Option<Duration>,
    ) -> JobOrchestrator {
        let pipeline = FrameExtractionPipeline::new(
            Arc::new(ImageSequenceDecoder::new()),
            SharpnessGate::default(),
            90,
        );
        JobOrchestrator::new(self.settings(timeout), self.db.clone(), pipeline, engine)
            .expect("Failed to build orchestrator")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn checkerboard(size: u32, cell: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// Polls until the job leaves `processing` or `timeout` passes.
pub fn wait_for_terminal(orch: &JobOrchestrator, job_id: &str, timeout: Duration) -> JobStatus {
    let deadline = Instant::now() + timeout;
    loop {
        let status = orch
            .get_status(job_id)
            .expect("status query failed")
            .expect("job not found");
        if status.is_terminal() {
            return status;
        }
        if Instant::now() >= deadline {
            panic!("job {} still processing after {:?}", job_id, timeout);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Lists file names in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to read dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
