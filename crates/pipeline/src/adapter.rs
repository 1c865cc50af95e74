//! External capability seams: passage search and text generation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A ranked candidate returned by a search service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: String,
    /// Higher = more relevant.
    pub score: f64,
    pub text: String,
    pub document_id: String,
    pub source_url: Option<String>,
}

/// Ranked passage search over an indexed corpus.
#[async_trait]
pub trait SearchAdapter: Send + Sync {
    /// Return up to `k` candidates for `text`, best first.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>, AdapterError>;
}

/// Generation parameters, resolved once from configuration per deployment,
/// never inferred from a model-name string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 500,
            temperature: 0.1,
            top_p: 0.9,
        }
    }
}

/// Text generation from a prompt.
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    /// Generate a continuation for `prompt`. An empty string is a valid
    /// adapter-level result; the orchestrator decides what it means.
    async fn generate(&self, prompt: &str, params: &GenerationParams)
    -> Result<String, AdapterError>;
}

/// Failure reported by a search or generation adapter.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The downstream service could not be reached.
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete within the allotted time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The service explicitly rejected the input.
    #[error("input rejected: {0}")]
    Rejected(String),

    /// The service answered, but the response could not be understood.
    #[error("malformed response: {0}")]
    InvalidResponse(String),
}

impl AdapterError {
    /// Transient failures are worth retrying; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Unreachable(_) | AdapterError::Timeout(_))
    }
}
