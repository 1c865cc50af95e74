//! Text generation service client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sibyl_pipeline::{AdapterError, GenerationAdapter, GenerationParams};

use super::{check_status, map_transport_error};

/// Client for the text generation service.
///
/// Wire contract: `POST {base}/generate {prompt, max_new_tokens,
/// temperature, top_p}` → `{text}`. An empty `text` is passed through
/// unchanged; classifying it is the orchestrator's job.
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_new_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    text: String,
}

impl HttpGenerationClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl GenerationAdapter for HttpGenerationClient {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, AdapterError> {
        let response = self
            .http
            .post(format!("{}/generate", self.base_url))
            .timeout(self.timeout)
            .json(&GenerateRequest {
                prompt,
                max_new_tokens: params.max_new_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
            })
            .send()
            .await
            .map_err(|e| map_transport_error(self.timeout, e))?;

        let response = check_status(response)?;
        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        debug!(chars = body.text.len(), "generation service responded");
        Ok(body.text)
    }
}
