//! Semantic search service client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sibyl_pipeline::{AdapterError, SearchAdapter, SearchHit};

use super::{check_status, map_transport_error};

/// Client for the passage search service.
///
/// Wire contract: `POST {base}/query {query, top_k}` →
/// `{hits: [{chunk_id, score, text, document_id, source_url?}]}`.
#[derive(Debug, Clone)]
pub struct HttpSearchClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct QueryResponse {
    hits: Vec<SearchHit>,
}

impl HttpSearchClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl SearchAdapter for HttpSearchClient {
    async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>, AdapterError> {
        let response = self
            .http
            .post(format!("{}/query", self.base_url))
            .timeout(self.timeout)
            .json(&QueryRequest { query: text, top_k: k })
            .send()
            .await
            .map_err(|e| map_transport_error(self.timeout, e))?;

        let response = check_status(response)?;
        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?;

        debug!(hits = body.hits.len(), "search service responded");
        Ok(body.hits)
    }
}
