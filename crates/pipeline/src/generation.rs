//! Answer orchestration: prompt → generation → job-ending outcome.

use std::sync::Arc;

use tracing::{debug, warn};

use sibyl_core::{Passage, SourceRef};

use crate::adapter::{GenerationAdapter, GenerationParams};
use crate::error::PipelineError;
use crate::prompt::build_prompt;

/// A usable generated answer together with the passages that supported it.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

/// Builds the prompt, invokes the generation adapter, and maps the outcome.
///
/// Generation producing no usable text is a pipeline failure, not a
/// successful empty answer: the job must end Failed, never Completed with a
/// placeholder sentence.
pub struct AnswerOrchestrator {
    generation: Arc<dyn GenerationAdapter>,
    params: GenerationParams,
}

impl AnswerOrchestrator {
    pub fn new(generation: Arc<dyn GenerationAdapter>, params: GenerationParams) -> Self {
        Self { generation, params }
    }

    pub async fn answer(
        &self,
        question: &str,
        passages: &[Passage],
    ) -> Result<Answer, PipelineError> {
        if passages.is_empty() {
            warn!("no passages retrieved; using fallback prompt");
        }

        let prompt = build_prompt(question, passages);
        let text = self.generation.generate(&prompt, &self.params).await?;

        let text = text.trim();
        if text.is_empty() {
            // A model hiccup may clear on a later attempt; retry until
            // attempts are exhausted, then the job fails.
            return Err(PipelineError::Transient(
                "generation returned no text".to_string(),
            ));
        }

        debug!(chars = text.len(), "generation produced an answer");
        Ok(Answer {
            text: text.to_string(),
            sources: passages.iter().map(SourceRef::from).collect(),
        })
    }
}
