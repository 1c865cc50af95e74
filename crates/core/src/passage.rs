//! Retrieved passages (transient pipeline data).

use serde::{Deserialize, Serialize};

use crate::job::SourceRef;

/// Which retrieval path produced a passage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Semantic,
    Keyword,
}

/// A retrieved unit of source text with an identifier and relevance score.
///
/// Passages are transient: they flow from retrieval into prompt
/// construction and are persisted only as [`SourceRef`]s on a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub chunk_id: String,
    pub text: String,
    /// Higher = more relevant. Scores are not comparable across methods.
    pub score: f64,
    pub source_id: String,
    pub url: Option<String>,
    pub retrieval_method: RetrievalMethod,
}

impl Passage {
    pub fn to_source_ref(&self) -> SourceRef {
        SourceRef {
            source_id: self.source_id.clone(),
            chunk_id: self.chunk_id.clone(),
            relevance_score: self.score,
            url: self.url.clone(),
        }
    }
}

impl From<&Passage> for SourceRef {
    fn from(p: &Passage) -> Self {
        p.to_source_ref()
    }
}
