//! Job submission: create the record and publish the work item.

use std::sync::Arc;

use tracing::{error, info};

use sibyl_core::{DomainError, JobId, JobStatus, validate_question};

use crate::job_store::{JobStore, JobStoreError};
use crate::task_channel::{TaskChannel, TaskMessage};

/// Submission error.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("failed to enqueue job {id}: {reason}")]
    Publish { id: JobId, reason: String },
}

/// Creates the job record and publishes it to the task channel as one
/// logical operation.
///
/// A record whose publish failed would be an orphan: Pending forever, with
/// no consumer ever assigned. Publish failure is therefore submission
/// failure: the submitter compensates by failing the record before
/// surfacing the error.
pub struct Submitter {
    store: Arc<dyn JobStore>,
    channel: Arc<dyn TaskChannel>,
}

impl Submitter {
    pub fn new(store: Arc<dyn JobStore>, channel: Arc<dyn TaskChannel>) -> Self {
        Self { store, channel }
    }

    /// Validate, create, publish. Returns the handle the caller polls with.
    pub async fn submit(&self, question: &str) -> Result<JobId, SubmitError> {
        validate_question(question)?;

        let id = JobId::new();
        self.store.create(id, question).await?;

        let message = TaskMessage {
            job_id: id,
            question: question.to_string(),
        };
        if let Err(publish_err) = self.channel.publish(message).await {
            error!(job_id = %id, error = %publish_err, "publish failed; compensating");
            let compensated = self
                .store
                .transition(
                    id,
                    &[JobStatus::Pending],
                    JobStatus::Failed,
                    Some("The job could not be queued for processing.".to_string()),
                    None,
                )
                .await;
            if let Err(store_err) = compensated {
                error!(job_id = %id, error = %store_err, "compensation failed; job may be orphaned");
            }
            return Err(SubmitError::Publish {
                id,
                reason: publish_err.to_string(),
            });
        }

        info!(job_id = %id, "job submitted");
        Ok(id)
    }
}
