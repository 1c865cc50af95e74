//! Best-effort passage retrieval with merge/dedupe/truncate.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use sibyl_core::{Passage, RetrievalMethod};

use crate::adapter::{SearchAdapter, SearchHit};

/// Calls the configured search adapters and folds their candidates into a
/// single ranked passage list.
///
/// Retrieval is best-effort: an adapter error is logged and treated as zero
/// results rather than failing the pipeline. An empty result list is a
/// valid, non-error outcome; the answer path has a fallback prompt for it.
pub struct RetrievalOrchestrator {
    semantic: Arc<dyn SearchAdapter>,
    keyword: Option<Arc<dyn SearchAdapter>>,
    top_k: usize,
}

impl RetrievalOrchestrator {
    pub fn new(semantic: Arc<dyn SearchAdapter>, top_k: usize) -> Self {
        Self {
            semantic,
            keyword: None,
            top_k,
        }
    }

    /// Add a secondary keyword adapter, merged after semantic results.
    pub fn with_keyword(mut self, keyword: Arc<dyn SearchAdapter>) -> Self {
        self.keyword = Some(keyword);
        self
    }

    /// Retrieve up to `top_k` passages for `question`, best first.
    pub async fn retrieve(&self, question: &str) -> Vec<Passage> {
        let semantic = self
            .run_adapter(&*self.semantic, question, RetrievalMethod::Semantic)
            .await;
        let keyword = match &self.keyword {
            Some(adapter) => {
                self.run_adapter(&**adapter, question, RetrievalMethod::Keyword)
                    .await
            }
            None => Vec::new(),
        };

        // Merge by chunk_id, first-seen wins: semantic candidates are folded
        // in before keyword ones, so they take priority on collision and
        // scores are never re-computed.
        let mut seen: HashSet<String> = HashSet::new();
        let mut merged: Vec<Passage> = Vec::with_capacity(semantic.len() + keyword.len());
        for passage in semantic.into_iter().chain(keyword) {
            if seen.insert(passage.chunk_id.clone()) {
                merged.push(passage);
            }
        }

        // Stable sort keeps first-seen order among equal scores.
        merged.sort_by(|a, b| b.score.total_cmp(&a.score));
        merged.truncate(self.top_k);

        debug!(count = merged.len(), "retrieval produced passages");
        merged
    }

    async fn run_adapter(
        &self,
        adapter: &dyn SearchAdapter,
        question: &str,
        method: RetrievalMethod,
    ) -> Vec<Passage> {
        match adapter.query(question, self.top_k).await {
            Ok(hits) => hits
                .into_iter()
                .map(|hit| into_passage(hit, method))
                .collect(),
            Err(e) => {
                warn!(?method, error = %e, "search adapter failed; treating as zero results");
                Vec::new()
            }
        }
    }
}

fn into_passage(hit: SearchHit, method: RetrievalMethod) -> Passage {
    Passage {
        chunk_id: hit.chunk_id,
        text: hit.text,
        score: hit.score,
        source_id: hit.document_id,
        url: hit.source_url,
        retrieval_method: method,
    }
}
