//! End-to-end tests: submit a job, let the pool extract and reconstruct,
//! then check the persisted outcome and what landed on disk.
//!
//! The engine is a `/bin/sh` script, so these only run on unix.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{file_names, wait_for_terminal, TestHarness};
use scanforge::broadcast::{JobPhase, ProgressStatus};
use scanforge::reconstruction::CommandEngine;
use scanforge::worker::{JobStatus, MODELS_DIR};
use scanforge::{FailureKind, JobFilter};

const WAIT: Duration = Duration::from_secs(30);

/// Lists its input directory into the model directory and writes a model.
const RECORDING_ENGINE: &str = r#"ls "$2" > "$4/inputs.txt"; echo mesh > "$4/model.obj""#;

#[test]
fn test_sharp_frames_reach_engine_and_job_completes() {
    let harness = TestHarness::new();
    let source = harness.frame_sequence("chair", 5, 5);
    let engine = harness.engine_script("engine.sh", RECORDING_ENGINE);
    let orch = harness.orchestrator(Arc::new(CommandEngine::new(engine)), None);

    let id = orch.submit(&source, "Red Chair", None).unwrap();
    let status = wait_for_terminal(&orch, &id, WAIT);

    let model_dir = match status {
        JobStatus::Completed { output_model_path } => output_model_path,
        other => panic!("Expected completed, got {:?}", other),
    };
    assert!(model_dir.starts_with(harness.output_dir.join(MODELS_DIR)));
    assert!(model_dir.join("model.obj").exists());

    let seen = std::fs::read_to_string(model_dir.join("inputs.txt")).unwrap();
    assert_eq!(seen.lines().count(), 5);
    assert!(seen.lines().all(|l| l.starts_with("Red_Chair_") && l.ends_with(".jpeg")));

    let job = orch.get_job(&id).unwrap().unwrap();
    assert_eq!(job.frames_read, 10);
    assert_eq!(job.frames_accepted, 5);
    assert!(job.completed_at.is_some());

    let key = model_dir.file_name().unwrap().to_owned();
    let frames = file_names(&harness.output_dir.join(key));
    assert_eq!(
        frames,
        (0..5)
            .map(|i| format!("Red_Chair_{}.jpeg", i))
            .collect::<Vec<_>>()
    );

    orch.shutdown().unwrap();
}

#[test]
fn test_unreadable_source_fails_without_output() {
    let harness = TestHarness::new();
    let engine = harness.engine_script("engine.sh", RECORDING_ENGINE);
    let orch = harness.orchestrator(Arc::new(CommandEngine::new(engine)), None);

    let id = orch
        .submit(harness.path().join("nope.mov"), "ghost", None)
        .unwrap();

    match wait_for_terminal(&orch, &id, WAIT) {
        JobStatus::Failed { kind, .. } => assert_eq!(kind, FailureKind::UnreadableSource),
        other => panic!("Expected failure, got {:?}", other),
    }
    assert!(!harness.output_dir.join(MODELS_DIR).exists());

    orch.shutdown().unwrap();
}

#[test]
fn test_engine_failure_marks_job_failed() {
    let harness = TestHarness::new();
    let source = harness.frame_sequence("lamp", 3, 0);
    let engine = harness.engine_script("engine.sh", "echo 'no features matched' >&2; exit 3");
    let orch = harness.orchestrator(Arc::new(CommandEngine::new(engine)), None);

    let id = orch.submit(&source, "lamp", None).unwrap();

    match wait_for_terminal(&orch, &id, WAIT) {
        JobStatus::Failed { kind, reason } => {
            assert_eq!(kind, FailureKind::Reconstruction);
            assert!(reason.contains("no features matched"), "reason: {}", reason);
        }
        other => panic!("Expected failure, got {:?}", other),
    }
    let job = orch.get_job(&id).unwrap().unwrap();
    assert!(job.output_model_path().is_none());
    assert_eq!(job.frames_accepted, 3);

    orch.shutdown().unwrap();
}

#[test]
fn test_all_blurry_never_launches_engine() {
    let harness = TestHarness::new();
    let source = harness.frame_sequence("fog", 0, 4);
    let marker = harness.path().join("engine-ran");
    let engine = harness.engine_script("engine.sh", &format!("touch '{}'", marker.display()));
    let orch = harness.orchestrator(Arc::new(CommandEngine::new(engine)), None);

    let id = orch.submit(&source, "fog", None).unwrap();

    match wait_for_terminal(&orch, &id, WAIT) {
        JobStatus::Failed { kind, .. } => assert_eq!(kind, FailureKind::NoUsableFrames),
        other => panic!("Expected failure, got {:?}", other),
    }
    assert!(!marker.exists());

    orch.shutdown().unwrap();
}

#[test]
fn test_hung_engine_times_out() {
    let harness = TestHarness::new();
    let source = harness.frame_sequence("statue", 2, 0);
    let engine = harness.engine_script("engine.sh", "exec sleep 60");
    let orch = harness.orchestrator(
        Arc::new(CommandEngine::new(engine)),
        Some(Duration::from_millis(500)),
    );

    let id = orch.submit(&source, "statue", None).unwrap();

    match wait_for_terminal(&orch, &id, WAIT) {
        JobStatus::Failed { kind, .. } => assert_eq!(kind, FailureKind::ReconstructionTimeout),
        other => panic!("Expected timeout, got {:?}", other),
    }

    orch.shutdown().unwrap();
}

#[test]
fn test_terminal_status_is_stable() {
    let harness = TestHarness::new();
    let source = harness.frame_sequence("vase", 2, 1);
    let engine = harness.engine_script("engine.sh", RECORDING_ENGINE);
    let orch = harness.orchestrator(Arc::new(CommandEngine::new(engine)), None);

    let id = orch.submit(&source, "vase", None).unwrap();
    let first = wait_for_terminal(&orch, &id, WAIT);

    for _ in 0..5 {
        assert_eq!(orch.get_status(&id).unwrap(), Some(first.clone()));
    }

    orch.shutdown().unwrap();
}

#[test]
fn test_concurrent_jobs_are_independent() {
    let harness = TestHarness::new();
    let good = harness.frame_sequence("good", 3, 2);
    let bad = harness.path().join("missing");
    let engine = harness.engine_script("engine.sh", RECORDING_ENGINE);
    let orch = harness.orchestrator(Arc::new(CommandEngine::new(engine)), None);

    let ids: Vec<String> = (0..3)
        .map(|i| orch.submit(&good, &format!("good {}", i), None).unwrap())
        .chain(std::iter::once(orch.submit(&bad, "bad", None).unwrap()))
        .collect();

    let statuses: Vec<JobStatus> = ids
        .iter()
        .map(|id| wait_for_terminal(&orch, id, WAIT))
        .collect();

    assert!(statuses[..3]
        .iter()
        .all(|s| matches!(s, JobStatus::Completed { .. })));
    assert!(matches!(statuses[3], JobStatus::Failed { .. }));

    let (jobs, total) = orch.list_jobs(&JobFilter::default()).unwrap();
    assert_eq!(total, 4);
    assert_eq!(jobs.len(), 4);

    let completed = JobFilter {
        status: Some("completed".to_string()),
        ..Default::default()
    };
    assert_eq!(orch.list_jobs(&completed).unwrap().1, 3);

    orch.shutdown().unwrap();
}

#[test]
fn test_progress_events_follow_job() {
    let harness = TestHarness::new();
    let source = harness.frame_sequence("cup", 2, 2);
    let engine = harness.engine_script("engine.sh", RECORDING_ENGINE);
    let orch = harness.orchestrator(Arc::new(CommandEngine::new(engine)), None);
    let mut rx = orch.subscribe();

    let id = orch.submit(&source, "cup", None).unwrap();

    let mut phases = Vec::new();
    loop {
        let event = rx.blocking_recv().unwrap();
        assert_eq!(event.job_id, id);
        phases.push(event.phase);
        if event.status != ProgressStatus::Processing {
            assert_eq!(event.status, ProgressStatus::Completed);
            assert!(event.output_model_path.is_some());
            break;
        }
    }

    assert_eq!(phases.first(), Some(&JobPhase::Queued));
    assert!(phases.contains(&JobPhase::Extracting));
    assert!(phases.contains(&JobPhase::Reconstructing));
    assert_eq!(phases.last(), Some(&JobPhase::Completed));

    orch.shutdown().unwrap();
}
