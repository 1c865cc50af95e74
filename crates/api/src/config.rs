//! Service configuration, resolved once at startup from the environment.

use std::time::Duration;

use sibyl_infra::RetryPolicy;
use sibyl_pipeline::GenerationParams;

/// Runtime configuration.
///
/// Generation parameters are explicit deployment values, never inferred
/// from a model-name string.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Base URL of the passage search service.
    pub search_url: String,
    /// Base URL of the text generation service.
    pub generation_url: String,
    /// Passages kept after merge/truncate.
    pub top_k: usize,
    /// Executor workers per process.
    pub workers: usize,
    /// Total delivery attempts per job.
    pub max_attempts: u32,
    /// Backoff base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
    /// Upper bound on one retrieval pass, seconds.
    pub retrieval_timeout_secs: u64,
    /// Upper bound on one generation pass, seconds.
    pub generation_timeout_secs: u64,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    /// Postgres connection string; absent means the in-memory store.
    pub database_url: Option<String>,
    /// Redis connection string; absent means the in-memory channel.
    pub redis_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            search_url: "http://localhost:8001".to_string(),
            generation_url: "http://localhost:8002".to_string(),
            top_k: 5,
            workers: 4,
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            retrieval_timeout_secs: 10,
            generation_timeout_secs: 60,
            max_new_tokens: 500,
            temperature: 0.1,
            top_p: 0.9,
            database_url: None,
            redis_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr),
            search_url: env_or("SEARCH_URL", defaults.search_url),
            generation_url: env_or("GENERATION_URL", defaults.generation_url),
            top_k: env_parse("RETRIEVAL_TOP_K", defaults.top_k),
            workers: env_parse("WORKERS", defaults.workers),
            max_attempts: env_parse("MAX_ATTEMPTS", defaults.max_attempts),
            base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", defaults.base_delay_ms),
            max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", defaults.max_delay_ms),
            retrieval_timeout_secs: env_parse(
                "RETRIEVAL_TIMEOUT_SECS",
                defaults.retrieval_timeout_secs,
            ),
            generation_timeout_secs: env_parse(
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout_secs,
            ),
            max_new_tokens: env_parse("GENERATION_MAX_NEW_TOKENS", defaults.max_new_tokens),
            temperature: env_parse("GENERATION_TEMPERATURE", defaults.temperature),
            top_p: env_parse("GENERATION_TOP_P", defaults.top_p),
            database_url: std::env::var("DATABASE_URL").ok(),
            redis_url: std::env::var("REDIS_URL").ok(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable value; using default {default}");
            default
        }),
        Err(_) => default,
    }
}
