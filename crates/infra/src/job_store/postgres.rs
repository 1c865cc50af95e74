//! Postgres-backed job store.
//!
//! The compare-and-swap `transition` is pushed down into a single
//! `UPDATE … WHERE id = $1 AND status = ANY(…)` statement, so the
//! check-and-apply is atomic at the database level and safe across any
//! number of API processes and workers sharing the pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use sibyl_core::{Job, JobId, JobStatus, SourceRef};

use super::{JobStore, JobStoreError};

/// Postgres job store.
///
/// Uses the SQLx connection pool, which handles thread-safe connection
/// management; the store itself is `Send + Sync` and cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `jobs` table if it does not exist (idempotent).
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id          UUID PRIMARY KEY,
                question    TEXT NOT NULL,
                status      TEXT NOT NULL,
                created_at  TIMESTAMPTZ NOT NULL,
                updated_at  TIMESTAMPTZ NOT NULL,
                result_text TEXT,
                sources     JSONB
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ensure_schema", e))?;

        Ok(())
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, question), fields(job_id = %id), err)]
    async fn create(&self, id: JobId, question: &str) -> Result<Job, JobStoreError> {
        let job = Job::new(id, question);

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, question, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(&job.question)
        .bind(status_as_str(job.status))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::DuplicateId(id));
        }

        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, question, status, created_at, updated_at, result_text, sources
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => Err(JobStoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self, result_text, sources), fields(job_id = %id, to = %to), err)]
    async fn transition(
        &self,
        id: JobId,
        from_allowed: &[JobStatus],
        to: JobStatus,
        result_text: Option<String>,
        sources: Option<Vec<SourceRef>>,
    ) -> Result<bool, JobStoreError> {
        // Restrict the CAS to origins from which `to` is a legal forward
        // step; terminal absorption falls out because a terminal status
        // allows no further move.
        let from: Vec<String> = from_allowed
            .iter()
            .filter(|s| s.allows(to))
            .map(|s| status_as_str(*s).to_string())
            .collect();

        let sources_json = match (to, sources) {
            (JobStatus::Completed, Some(refs)) => Some(
                serde_json::to_value(refs)
                    .map_err(|e| JobStoreError::Storage(format!("encode sources: {e}")))?,
            ),
            _ => None,
        };

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                result_text = COALESCE($3, result_text),
                sources = CASE WHEN $2 = 'COMPLETED' THEN $4 ELSE sources END,
                updated_at = GREATEST(updated_at, $5)
            WHERE id = $1 AND status = ANY($6)
            "#,
        )
        .bind(id.as_uuid())
        .bind(status_as_str(to))
        .bind(result_text)
        .bind(sources_json)
        .bind(Utc::now())
        .bind(&from)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition", e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Nothing matched: distinguish a missing record from a CAS conflict.
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM jobs WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("transition", e))?;

        if exists {
            Ok(false)
        } else {
            Err(JobStoreError::NotFound(id))
        }
    }
}

fn status_as_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "PENDING",
        JobStatus::Processing => "PROCESSING",
        JobStatus::Completed => "COMPLETED",
        JobStatus::Failed => "FAILED",
    }
}

fn status_from_str(s: &str) -> Result<JobStatus, JobStoreError> {
    match s {
        "PENDING" => Ok(JobStatus::Pending),
        "PROCESSING" => Ok(JobStatus::Processing),
        "COMPLETED" => Ok(JobStatus::Completed),
        "FAILED" => Ok(JobStatus::Failed),
        other => Err(JobStoreError::Storage(format!("unknown status: {other}"))),
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    let id: Uuid = column(row, "id")?;
    let question: String = column(row, "question")?;
    let status: String = column(row, "status")?;
    let created_at: DateTime<Utc> = column(row, "created_at")?;
    let updated_at: DateTime<Utc> = column(row, "updated_at")?;
    let result_text: Option<String> = column(row, "result_text")?;
    let sources_json: Option<serde_json::Value> = column(row, "sources")?;

    let sources = match sources_json {
        Some(value) => Some(
            serde_json::from_value::<Vec<SourceRef>>(value)
                .map_err(|e| JobStoreError::Storage(format!("decode sources: {e}")))?,
        ),
        None => None,
    };

    Ok(Job {
        id: JobId::from_uuid(id),
        question,
        status: status_from_str(&status)?,
        created_at,
        updated_at,
        result_text,
        sources,
    })
}

fn column<'r, T>(row: &'r sqlx::postgres::PgRow, name: &str) -> Result<T, JobStoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name)
        .map_err(|e| JobStoreError::Storage(format!("column {name}: {e}")))
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("{operation}: {e}"))
}
