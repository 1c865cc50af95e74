//! Pipeline error classification.

use thiserror::Error;

use crate::adapter::AdapterError;

/// A failure while producing a job outcome.
///
/// The split decides the executor's behavior: transient failures are
/// retried with backoff until attempts are exhausted; permanent failures
/// terminate the job immediately.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Downstream unreachable or timed out; retrying may succeed.
    #[error("transient pipeline failure: {0}")]
    Transient(String),

    /// The input or output is unusable; retrying will not help.
    #[error("permanent pipeline failure: {0}")]
    Permanent(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }

    /// A caller-safe diagnostic for storing in `result_text`. Never leaks
    /// internal addresses or payloads.
    pub fn diagnostic(&self) -> String {
        match self {
            PipelineError::Transient(_) => {
                "The answer could not be produced because a required service was unavailable."
                    .to_string()
            }
            PipelineError::Permanent(reason) => {
                format!("The question could not be answered: {reason}")
            }
        }
    }
}

impl From<AdapterError> for PipelineError {
    fn from(err: AdapterError) -> Self {
        if err.is_transient() {
            PipelineError::Transient(err.to_string())
        } else {
            PipelineError::Permanent(err.to_string())
        }
    }
}
