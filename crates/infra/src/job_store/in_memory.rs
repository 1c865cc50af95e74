//! In-memory job store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use sibyl_core::{Job, JobId, JobStatus, SourceRef};

use super::{JobStore, JobStoreError};

/// In-memory job store.
///
/// - No IO; a `RwLock<HashMap>` behind the async trait
/// - The whole `transition` check-and-apply runs under the write lock, so
///   it is atomic with respect to concurrent executors
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored jobs (test/dev visibility).
    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, id: JobId, question: &str) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&id) {
            return Err(JobStoreError::DuplicateId(id));
        }
        let job = Job::new(id, question);
        jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(&id).cloned().ok_or(JobStoreError::NotFound(id))
    }

    async fn transition(
        &self,
        id: JobId,
        from_allowed: &[JobStatus],
        to: JobStatus,
        result_text: Option<String>,
        sources: Option<Vec<SourceRef>>,
    ) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;

        // Terminal absorption falls out of `allows`: a terminal status
        // allows no further move.
        if !from_allowed.contains(&job.status) || !job.status.allows(to) {
            return Ok(false);
        }

        job.status = to;
        if let Some(text) = result_text {
            job.result_text = Some(text);
        }
        if to == JobStatus::Completed {
            job.sources = sources;
        }
        // Monotone even under clock skew.
        job.updated_at = job.updated_at.max(Utc::now());

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_ref() -> SourceRef {
        SourceRef {
            source_id: "d1".to_string(),
            chunk_id: "c1".to_string(),
            relevance_score: 0.9,
            url: None,
        }
    }

    #[tokio::test]
    async fn get_before_create_is_not_found() {
        let store = InMemoryJobStore::new();
        assert!(matches!(
            store.get(JobId::new()).await,
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_yields_pending_with_no_result() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        let job = store.create(id, "what is rust?").await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result_text.is_none());
        assert_eq!(store.get(id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        store.create(id, "q").await.unwrap();

        assert!(matches!(
            store.create(id, "q again").await,
            Err(JobStoreError::DuplicateId(_))
        ));
    }

    #[tokio::test]
    async fn transition_walks_the_state_machine() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        store.create(id, "q").await.unwrap();

        let claimed = store
            .transition(
                id,
                &[JobStatus::Pending, JobStatus::Processing],
                JobStatus::Processing,
                None,
                None,
            )
            .await
            .unwrap();
        assert!(claimed);

        let completed = store
            .transition(
                id,
                &[JobStatus::Processing],
                JobStatus::Completed,
                Some("answer".to_string()),
                Some(vec![source_ref()]),
            )
            .await
            .unwrap();
        assert!(completed);

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_text.as_deref(), Some("answer"));
        assert_eq!(job.sources.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn terminal_state_absorbs_further_transitions() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        store.create(id, "q").await.unwrap();
        store
            .transition(id, &[JobStatus::Pending], JobStatus::Processing, None, None)
            .await
            .unwrap();
        store
            .transition(
                id,
                &[JobStatus::Processing],
                JobStatus::Completed,
                Some("answer".to_string()),
                Some(vec![]),
            )
            .await
            .unwrap();

        let before = store.get(id).await.unwrap();

        // The racing executor loses and must not overwrite.
        let won = store
            .transition(
                id,
                &[JobStatus::Processing],
                JobStatus::Failed,
                Some("late failure".to_string()),
                None,
            )
            .await
            .unwrap();
        assert!(!won);

        // Even an explicitly terminal `from_allowed` does not bypass the guard.
        let won = store
            .transition(
                id,
                &[JobStatus::Completed],
                JobStatus::Failed,
                Some("late failure".to_string()),
                None,
            )
            .await
            .unwrap();
        assert!(!won);

        let after = store.get(id).await.unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.result_text, before.result_text);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn conflict_when_status_not_in_allowed_set() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        store.create(id, "q").await.unwrap();

        // Job is still Pending; a Processing-only CAS must not fire.
        let won = store
            .transition(
                id,
                &[JobStatus::Processing],
                JobStatus::Completed,
                Some("answer".to_string()),
                None,
            )
            .await
            .unwrap();
        assert!(!won);
        assert_eq!(store.get(id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn updated_at_never_decreases() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        let created = store.create(id, "q").await.unwrap();

        store
            .transition(id, &[JobStatus::Pending], JobStatus::Processing, None, None)
            .await
            .unwrap();
        let job = store.get(id).await.unwrap();
        assert!(job.updated_at >= created.created_at);
        assert_eq!(job.created_at, created.created_at);
    }

    #[tokio::test]
    async fn sources_only_applied_on_completion() {
        let store = InMemoryJobStore::new();
        let id = JobId::new();
        store.create(id, "q").await.unwrap();
        store
            .transition(id, &[JobStatus::Pending], JobStatus::Processing, None, None)
            .await
            .unwrap();

        store
            .transition(
                id,
                &[JobStatus::Processing],
                JobStatus::Failed,
                Some("diagnostic".to_string()),
                Some(vec![source_ref()]),
            )
            .await
            .unwrap();

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.sources.is_none());
    }
}
