//! Job repository for the `conversion_jobs` table.
//!
//! Terminal transitions are single conditional updates guarded by
//! `status = 'processing'`; they report whether a row actually moved.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub name: String,
    pub source_video_path: String,
    pub reference_metadata_path: Option<String>,
    pub output_model_path: Option<String>,
    pub status: String,
    pub failure_kind: Option<String>,
    pub failure_reason: Option<String>,
    pub frames_read: i64,
    pub frames_accepted: i64,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            source_video_path: row.get("source_video_path")?,
            reference_metadata_path: row.get("reference_metadata_path")?,
            output_model_path: row.get("output_model_path")?,
            status: row.get("status")?,
            failure_kind: row.get("failure_kind")?,
            failure_reason: row.get("failure_reason")?,
            frames_read: row.get("frames_read")?,
            frames_accepted: row.get("frames_accepted")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub name: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO conversion_jobs (id, name, source_video_path, reference_metadata_path,
             output_model_path, status, failure_kind, failure_reason, frames_read,
             frames_accepted, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                job.id,
                job.name,
                job.source_video_path,
                job.reference_metadata_path,
                job.output_model_path,
                job.status,
                job.failure_kind,
                job.failure_reason,
                job.frames_read,
                job.frames_accepted,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM conversion_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref name) = filter.name {
            conditions.push(format!("name = ?{}", param_values.len() + 1));
            param_values.push(Box::new(name.clone()));
        }
        if let Some(ref from_date) = filter.from_date {
            conditions.push(format!("created_at >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(from_date.clone()));
        }
        if let Some(ref to_date) = filter.to_date {
            conditions.push(format!("created_at <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(to_date.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM conversion_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM conversion_jobs {} ORDER BY created_at DESC, id LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM conversion_jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// IDs of every job currently in `status`, oldest first.
pub fn ids_with_status(db: &Database, status: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM conversion_jobs WHERE status = ?1 ORDER BY created_at, id",
        )?;
        let ids = stmt
            .query_map(params![status], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Stores extraction counters on a job that is still processing.
pub fn record_frame_counts(
    db: &Database,
    id: &str,
    frames_read: u64,
    frames_accepted: u64,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE conversion_jobs SET frames_read = ?2, frames_accepted = ?3, updated_at = ?4
             WHERE id = ?1 AND status = 'processing'",
            params![id, frames_read as i64, frames_accepted as i64, updated_at],
        )?;
        Ok(changed == 1)
    })
}

/// `processing → completed`. Returns false if the job was not processing.
pub fn mark_completed(
    db: &Database,
    id: &str,
    output_model_path: &str,
    at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE conversion_jobs
             SET status = 'completed', output_model_path = ?2, updated_at = ?3, completed_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![id, output_model_path, at],
        )?;
        Ok(changed == 1)
    })
}

/// `processing → failed`. Returns false if the job was not processing.
pub fn mark_failed(
    db: &Database,
    id: &str,
    failure_kind: &str,
    failure_reason: &str,
    at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE conversion_jobs
             SET status = 'failed', failure_kind = ?2, failure_reason = ?3,
                 updated_at = ?4, completed_at = ?4
             WHERE id = ?1 AND status = 'processing'",
            params![id, failure_kind, failure_reason, at],
        )?;
        Ok(changed == 1)
    })
}
