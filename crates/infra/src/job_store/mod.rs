//! Durable keyed job storage, the sole source of truth for job status.

use async_trait::async_trait;

use sibyl_core::{Job, JobId, JobStatus, SourceRef};

mod in_memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use in_memory::InMemoryJobStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresJobStore;

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    DuplicateId(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Keyed record of job state.
///
/// `transition` is the concurrency safeguard for at-least-once delivery:
/// two executors racing on the same job can both attempt
/// Processing → Completed, but only one succeeds. The loser observes
/// `false` and must not overwrite the terminal result.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a fresh pending job. Fails with [`JobStoreError::DuplicateId`]
    /// if the id already exists.
    async fn create(&self, id: JobId, question: &str) -> Result<Job, JobStoreError>;

    /// Fetch a job by id.
    async fn get(&self, id: JobId) -> Result<Job, JobStoreError>;

    /// Compare-and-swap status update.
    ///
    /// Atomically checks that the record's current status is in
    /// `from_allowed` and not terminal; if so, applies `to` plus the given
    /// fields, bumps `updated_at`, and returns `Ok(true)`. Otherwise no
    /// mutation happens and `Ok(false)` is returned. That is a conflict
    /// signal, not an error: someone else already finished this job.
    ///
    /// `sources` is only applied when `to` is Completed (a job carries
    /// sources if and only if it completed).
    async fn transition(
        &self,
        id: JobId,
        from_allowed: &[JobStatus],
        to: JobStatus,
        result_text: Option<String>,
        sources: Option<Vec<SourceRef>>,
    ) -> Result<bool, JobStoreError>;
}
