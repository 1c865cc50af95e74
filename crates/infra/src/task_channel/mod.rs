//! At-least-once work-item delivery between submitters and executors.
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a worker crash or channel failure may cause the
//!   same `(job_id, question)` to be delivered again; the store's CAS
//!   transition makes that safe
//! - **No ordering** across distinct job ids
//! - **Late acknowledgement**: a delivered item is settled only once the
//!   consumer acknowledges it, which the executor does after reaching a
//!   terminal outcome (or scheduling a retry)
//!
//! The retry attempt counter travels with the delivery, never on the job
//! record.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sibyl_core::JobId;

mod in_memory;
#[cfg(feature = "redis")]
mod redis_streams;

pub use in_memory::InMemoryTaskChannel;
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsTaskChannel;

/// The work item: which job to run and the question to answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub job_id: JobId,
    pub question: String,
}

/// Opaque settlement token for one delivered item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(String);

impl Receipt {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One delivery of a task message to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: TaskMessage,
    /// 1-based delivery attempt for this job.
    pub attempt: u32,
    pub receipt: Receipt,
}

/// Channel error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("channel backend error: {0}")]
    Backend(String),
}

/// Producer half: enqueue a work item addressed by its job id.
#[async_trait]
pub trait TaskChannel: Send + Sync {
    async fn publish(&self, message: TaskMessage) -> Result<(), ChannelError>;
}

/// Consumer half, used by executor workers.
#[async_trait]
pub trait TaskConsumer: Send + Sync {
    /// Wait for the next delivery. Multiple consumers may share one
    /// channel; each item goes to exactly one of them.
    async fn next(&self) -> Result<Delivery, ChannelError>;

    /// Settle a delivery after a terminal outcome.
    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    /// Settle the current delivery and schedule the same message again
    /// with `attempt + 1` after `delay`.
    async fn redeliver_after(
        &self,
        delivery: Delivery,
        delay: Duration,
    ) -> Result<(), ChannelError>;
}
