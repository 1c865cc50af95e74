//! The job record and its state machine.
//!
//! A [`Job`] is the unit of work tracked from submission to terminal
//! outcome. Its status only ever walks forward:
//!
//! ```text
//! Pending → Processing → Completed
//!                      ↘ Failed
//! ```
//!
//! Processing may be re-entered by a retry of the *same* job, never after a
//! terminal state. The compare-and-swap guard that enforces this under
//! concurrent deliveries lives in the store (`sibyl-infra`); this module
//! only describes the shape and the allowed moves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::JobId;

/// Inclusive bounds on an accepted question, in characters.
pub const QUESTION_MIN_LEN: usize = 3;
pub const QUESTION_MAX_LEN: usize = 1000;

/// Job execution status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Created, waiting to be picked up by a worker.
    Pending,
    /// A worker holds a delivery for this job.
    Processing,
    /// Answered successfully (terminal).
    Completed,
    /// Ended without a usable answer (terminal).
    Failed,
}

impl JobStatus {
    /// Terminal states absorb: no further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a move from `self` to `to` is a legal forward step.
    ///
    /// `Processing → Processing` is legal (retry of the same job).
    pub fn allows(&self, to: JobStatus) -> bool {
        match (self, to) {
            (JobStatus::Pending, JobStatus::Processing) => true,
            (JobStatus::Processing, JobStatus::Processing) => true,
            (JobStatus::Processing, JobStatus::Completed) => true,
            (JobStatus::Processing, JobStatus::Failed) => true,
            // Pending → Failed covers submission compensation (enqueue failed).
            (JobStatus::Pending, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persisted subset of a retrieved passage, embedded in a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_id: String,
    pub chunk_id: String,
    pub relevance_score: f64,
    pub url: Option<String>,
}

/// A tracked question-answering job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id, immutable.
    pub id: JobId,
    /// The question as submitted, immutable.
    pub question: String,
    /// Current status.
    pub status: JobStatus,
    /// When the job was created (set once).
    pub created_at: DateTime<Utc>,
    /// When the job was last updated; never decreases.
    pub updated_at: DateTime<Utc>,
    /// Generated answer, or a safe diagnostic when failed. Non-null once
    /// terminal.
    pub result_text: Option<String>,
    /// Supporting sources; set if and only if the job completed.
    pub sources: Option<Vec<SourceRef>>,
}

impl Job {
    /// Create a fresh pending job.
    pub fn new(id: JobId, question: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            question: question.into(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            result_text: None,
            sources: None,
        }
    }

    /// Wall-clock seconds between creation and the terminal update.
    ///
    /// `None` while the job is still in flight.
    pub fn processing_time_seconds(&self) -> Option<f64> {
        if !self.status.is_terminal() {
            return None;
        }
        let millis = (self.updated_at - self.created_at).num_milliseconds().max(0);
        Some((millis as f64 / 1000.0 * 100.0).round() / 100.0)
    }
}

/// Validate a submitted question before any job record exists.
pub fn validate_question(question: &str) -> Result<(), DomainError> {
    let len = question.chars().count();
    if len < QUESTION_MIN_LEN || len > QUESTION_MAX_LEN {
        return Err(DomainError::validation(format!(
            "question must be between {QUESTION_MIN_LEN} and {QUESTION_MAX_LEN} characters"
        )));
    }
    if question.trim().is_empty() {
        return Err(DomainError::validation(
            "question cannot be empty or whitespace",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_is_pending_with_no_result() {
        let job = Job::new(JobId::new(), "why is the sky blue?");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result_text.is_none());
        assert!(job.sources.is_none());
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn status_walks_forward_only() {
        use JobStatus::*;

        assert!(Pending.allows(Processing));
        assert!(Processing.allows(Processing));
        assert!(Processing.allows(Completed));
        assert!(Processing.allows(Failed));
        assert!(Pending.allows(Failed));

        // No backward or post-terminal moves.
        assert!(!Processing.allows(Pending));
        assert!(!Completed.allows(Processing));
        assert!(!Completed.allows(Failed));
        assert!(!Failed.allows(Completed));
        assert!(!Failed.allows(Processing));
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn processing_time_only_for_terminal_jobs() {
        let mut job = Job::new(JobId::new(), "what is entropy?");
        assert!(job.processing_time_seconds().is_none());

        job.status = JobStatus::Completed;
        job.updated_at = job.created_at + chrono::Duration::milliseconds(2540);
        assert_eq!(job.processing_time_seconds(), Some(2.54));
    }

    #[test]
    fn question_validation_bounds() {
        assert!(validate_question("ok").is_err());
        assert!(validate_question("   ").is_err());
        assert!(validate_question("why?").is_ok());
        assert!(validate_question(&"x".repeat(1000)).is_ok());
        assert!(validate_question(&"x".repeat(1001)).is_err());
    }
}
