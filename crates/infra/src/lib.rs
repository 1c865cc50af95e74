//! `sibyl-infra` — stores, task channel, executor, submitter.
//!
//! ## Design
//!
//! - The job store is the sole source of truth for job status; its
//!   compare-and-swap `transition` makes duplicate delivery safe without
//!   in-process locking
//! - The task channel delivers work at-least-once; consumers acknowledge
//!   only after a terminal outcome (late ack)
//! - The executor owns the retry policy: an explicit function of attempt
//!   count and error classification, independent of channel technology
//! - External search/generation services are reached through HTTP clients
//!   implementing the `sibyl-pipeline` adapter traits
//!
//! In-memory store and channel serve tests/dev; Postgres and Redis Streams
//! backends sit behind the `postgres` and `redis` features.

pub mod adapters;
pub mod executor;
pub mod job_store;
pub mod retry;
pub mod submitter;
pub mod task_channel;

pub use adapters::{HttpGenerationClient, HttpSearchClient};
pub use executor::{ExecutorConfig, ExecutorError, ExecutorHandle, ExecutorStats, JobExecutor};
pub use job_store::{InMemoryJobStore, JobStore, JobStoreError};
pub use retry::RetryPolicy;
pub use submitter::{SubmitError, Submitter};
pub use task_channel::{
    ChannelError, Delivery, InMemoryTaskChannel, Receipt, TaskChannel, TaskConsumer, TaskMessage,
};
