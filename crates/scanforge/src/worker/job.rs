use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::job_repo::{JobRow, STATUS_COMPLETED, STATUS_FAILED, STATUS_PROCESSING};
use crate::db::DatabaseError;
use crate::error::{FailureKind, JobFailure};

/// Lifecycle state of a conversion job. Payload only on the arm it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed { output_model_path: PathBuf },
    Failed { kind: FailureKind, reason: String },
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => STATUS_PROCESSING,
            JobStatus::Completed { .. } => STATUS_COMPLETED,
            JobStatus::Failed { .. } => STATUS_FAILED,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }

    pub fn output_model_path(&self) -> Option<&PathBuf> {
        match self {
            JobStatus::Completed { output_model_path } => Some(output_model_path),
            _ => None,
        }
    }
}

/// A job record as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionJob {
    pub id: String,
    pub name: String,
    pub source_video_path: PathBuf,
    pub reference_metadata_path: Option<PathBuf>,
    pub status: JobStatus,
    pub frames_read: u64,
    pub frames_accepted: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConversionJob {
    pub fn output_model_path(&self) -> Option<&PathBuf> {
        self.status.output_model_path()
    }
}

impl TryFrom<JobRow> for ConversionJob {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let invalid = |reason: String| DatabaseError::InvalidRow {
            id: row.id.clone(),
            reason,
        };

        let status = match row.status.as_str() {
            STATUS_PROCESSING => JobStatus::Processing,
            STATUS_COMPLETED => {
                let path = row
                    .output_model_path
                    .as_ref()
                    .ok_or_else(|| invalid("completed without output_model_path".to_string()))?;
                JobStatus::Completed {
                    output_model_path: PathBuf::from(path),
                }
            }
            STATUS_FAILED => {
                let kind = row
                    .failure_kind
                    .as_deref()
                    .and_then(FailureKind::parse)
                    .unwrap_or(FailureKind::Internal);
                JobStatus::Failed {
                    kind,
                    reason: row.failure_reason.clone().unwrap_or_default(),
                }
            }
            other => return Err(invalid(format!("unknown status '{}'", other))),
        };

        let created_at = parse_timestamp(&row.created_at).map_err(&invalid)?;
        let updated_at = parse_timestamp(&row.updated_at).map_err(&invalid)?;
        let completed_at = row
            .completed_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(&invalid)?;

        Ok(Self {
            id: row.id.clone(),
            name: row.name.clone(),
            source_video_path: PathBuf::from(&row.source_video_path),
            reference_metadata_path: row.reference_metadata_path.as_ref().map(PathBuf::from),
            status,
            frames_read: row.frames_read.max(0) as u64,
            frames_accepted: row.frames_accepted.max(0) as u64,
            created_at,
            updated_at,
            completed_at,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", value, e))
}

/// Work item handed to the pool: one job with its resolved directories.
#[derive(Debug, Clone)]
pub struct ConversionTask {
    pub id: String,
    pub name: String,
    pub source_video_path: PathBuf,
    pub reference_metadata_path: Option<PathBuf>,
    pub frames_dir: PathBuf,
    pub model_dir: PathBuf,
}

/// How a task ended, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { output_model_path: PathBuf },
    Failed(JobFailure),
}

impl JobOutcome {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        JobOutcome::Failed(JobFailure::new(kind, message))
    }
}
