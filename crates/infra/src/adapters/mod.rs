//! HTTP clients for the external search and generation services.
//!
//! These implement the `sibyl-pipeline` adapter traits and are constructed
//! explicitly at startup and injected into the orchestrators; no global
//! service handles.

use std::time::Duration;

use sibyl_pipeline::AdapterError;

mod generation_http;
mod search_http;

pub use generation_http::HttpGenerationClient;
pub use search_http::HttpSearchClient;

fn map_transport_error(timeout: Duration, e: reqwest::Error) -> AdapterError {
    if e.is_timeout() {
        AdapterError::Timeout(timeout)
    } else {
        AdapterError::Unreachable(e.to_string())
    }
}

/// Map HTTP status classes onto the adapter taxonomy: 4xx is an explicit
/// rejection (permanent), 5xx means the service is unhealthy (transient).
fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_client_error() {
        Err(AdapterError::Rejected(format!("status {status}")))
    } else if status.is_server_error() {
        Err(AdapterError::Unreachable(format!("status {status}")))
    } else {
        Ok(response)
    }
}
