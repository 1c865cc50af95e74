//! Application wiring and router construction.
//!
//! Services are explicitly constructed at startup and injected: the store,
//! channel, and adapters are owned by the process, not global handles. The
//! same router serves the in-memory wiring (dev/tests) and the persistent
//! wiring (Postgres + Redis, feature-gated), mirroring how the executors and
//! submitter only ever see the trait objects.

use std::sync::Arc;

use axum::{
    Extension, Router,
    routing::{get, post},
};

use sibyl_infra::{
    ExecutorConfig, ExecutorHandle, InMemoryJobStore, InMemoryTaskChannel, JobExecutor, JobStore,
    Submitter, TaskChannel, TaskConsumer,
};
use sibyl_pipeline::{
    AnswerOrchestrator, GenerationAdapter, RetrievalOrchestrator, SearchAdapter,
};

use crate::config::Config;

pub mod dto;
pub mod errors;
pub mod routes;

/// Shared application state.
///
/// Holds the executor handles so the worker loops live exactly as long as
/// the application.
pub struct AppState {
    pub submitter: Submitter,
    pub store: Arc<dyn JobStore>,
    _executors: Vec<ExecutorHandle>,
}

/// Wire submitter + executor workers over the given store, channel, and
/// adapters.
pub fn build_state(
    config: &Config,
    store: Arc<dyn JobStore>,
    channel: Arc<dyn TaskChannel>,
    consumer: Arc<dyn TaskConsumer>,
    search: Arc<dyn SearchAdapter>,
    generation: Arc<dyn GenerationAdapter>,
) -> Arc<AppState> {
    let submitter = Submitter::new(store.clone(), channel);

    let mut executors = Vec::with_capacity(config.workers);
    for i in 0..config.workers {
        let executor = Arc::new(JobExecutor::new(
            store.clone(),
            RetrievalOrchestrator::new(search.clone(), config.top_k),
            AnswerOrchestrator::new(generation.clone(), config.generation_params()),
            ExecutorConfig {
                retry: config.retry_policy(),
                retrieval_timeout: config.retrieval_timeout(),
                generation_timeout: config.generation_timeout(),
                name: format!("job-executor-{i}"),
            },
        ));
        executors.push(executor.spawn(consumer.clone()));
    }

    Arc::new(AppState {
        submitter,
        store,
        _executors: executors,
    })
}

/// The HTTP router over an already-wired state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/ask", post(routes::ask))
        .route("/ask/:id", get(routes::get_job))
        .layer(Extension(state))
}

/// Build the application with wiring chosen from configuration.
pub async fn build_app(config: &Config) -> anyhow::Result<Router> {
    #[cfg(all(feature = "postgres", feature = "redis"))]
    if let (Some(database_url), Some(redis_url)) = (&config.database_url, &config.redis_url) {
        tracing::info!("using postgres job store and redis task channel");
        return build_persistent(config, database_url, redis_url).await;
    }

    if config.database_url.is_some() || config.redis_url.is_some() {
        tracing::warn!(
            "DATABASE_URL/REDIS_URL set but persistent backends are not fully \
             configured or compiled in; falling back to in-memory wiring"
        );
    } else {
        tracing::info!("using in-memory job store and task channel");
    }
    Ok(build_in_memory(config))
}

fn build_in_memory(config: &Config) -> Router {
    let store = InMemoryJobStore::arc();
    let channel = Arc::new(InMemoryTaskChannel::new());
    let (search, generation) = http_adapters(config);

    router(build_state(
        config,
        store,
        channel.clone(),
        channel,
        search,
        generation,
    ))
}

#[cfg(all(feature = "postgres", feature = "redis"))]
async fn build_persistent(
    config: &Config,
    database_url: &str,
    redis_url: &str,
) -> anyhow::Result<Router> {
    use sibyl_infra::job_store::PostgresJobStore;
    use sibyl_infra::task_channel::RedisStreamsTaskChannel;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await?;
    let store = PostgresJobStore::new(pool);
    store.ensure_schema().await?;

    let channel = Arc::new(
        RedisStreamsTaskChannel::connect(
            redis_url,
            None,
            "sibyl.executors",
            format!("worker-{}", std::process::id()),
        )
        .await?,
    );
    let (search, generation) = http_adapters(config);

    Ok(router(build_state(
        config,
        Arc::new(store),
        channel.clone(),
        channel,
        search,
        generation,
    )))
}

fn http_adapters(config: &Config) -> (Arc<dyn SearchAdapter>, Arc<dyn GenerationAdapter>) {
    use sibyl_infra::{HttpGenerationClient, HttpSearchClient};

    let http = reqwest::Client::new();
    let search = Arc::new(HttpSearchClient::new(
        http.clone(),
        config.search_url.as_str(),
        config.retrieval_timeout(),
    ));
    let generation = Arc::new(HttpGenerationClient::new(
        http,
        config.generation_url.as_str(),
        config.generation_timeout(),
    ));
    (search, generation)
}
