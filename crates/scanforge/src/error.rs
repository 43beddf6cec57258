use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanforgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Reconstruction error: {0}")]
    Reconstruction(#[from] ReconstructionError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Invalid job request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Whole-stage failures of frame extraction. Per-frame problems never
/// surface here; they are counted in `ExtractionStats` instead.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Unreadable video source '{path}': {reason}")]
    UnreadableSource { path: PathBuf, reason: String },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write frame '{path}': {reason}")]
    WriteFrame { path: PathBuf, reason: String },
}

/// Non-fatal failure while copying reference metadata onto a frame.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Reference metadata file not found: {0}")]
    ReferenceMissing(PathBuf),

    #[error("Failed to read EXIF from '{path}': {reason}")]
    ReadReference { path: PathBuf, reason: String },

    #[error("Frame '{0}' is not a JPEG file")]
    NotJpeg(PathBuf),

    #[error("EXIF payload too large for a JPEG APP1 segment ({0} bytes)")]
    PayloadTooLarge(usize),

    #[error("Failed to rewrite frame '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ReconstructionError {
    #[error("Failed to launch reconstruction engine '{binary}': {source}")]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create model directory '{path}': {source}")]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Reconstruction engine exited with code {exit_code:?}: {diagnostics}")]
    EngineFailed {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("Reconstruction engine timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

/// Machine-readable failure kind persisted alongside the human-readable reason.
///
/// Only job-ending failures have a kind. Per-frame problems (empty frames,
/// metadata copy errors) are absorbed and surface as `ExtractionStats`
/// counters instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnreadableSource,
    Storage,
    NoUsableFrames,
    Reconstruction,
    ReconstructionTimeout,
    Interrupted,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UnreadableSource => "unreadable_source",
            FailureKind::Storage => "storage",
            FailureKind::NoUsableFrames => "no_usable_frames",
            FailureKind::Reconstruction => "reconstruction",
            FailureKind::ReconstructionTimeout => "reconstruction_timeout",
            FailureKind::Interrupted => "interrupted",
            FailureKind::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "unreadable_source" => FailureKind::UnreadableSource,
            "storage" => FailureKind::Storage,
            "no_usable_frames" => FailureKind::NoUsableFrames,
            "reconstruction" => FailureKind::Reconstruction,
            "reconstruction_timeout" => FailureKind::ReconstructionTimeout,
            "interrupted" => FailureKind::Interrupted,
            "internal" => FailureKind::Internal,
            _ => return None,
        })
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage failure as recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<&ExtractionError> for JobFailure {
    fn from(err: &ExtractionError) -> Self {
        let kind = match err {
            ExtractionError::UnreadableSource { .. } => FailureKind::UnreadableSource,
            ExtractionError::CreateDirectory { .. } | ExtractionError::WriteFrame { .. } => {
                FailureKind::Storage
            }
        };
        JobFailure::new(kind, err.to_string())
    }
}

impl From<&ReconstructionError> for JobFailure {
    fn from(err: &ReconstructionError) -> Self {
        let kind = match err {
            ReconstructionError::Timeout(_) => FailureKind::ReconstructionTimeout,
            _ => FailureKind::Reconstruction,
        };
        JobFailure::new(kind, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanforgeError>;
