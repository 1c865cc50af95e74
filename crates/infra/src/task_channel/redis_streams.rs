//! Redis Streams-backed task channel (durable, at-least-once delivery).
//!
//! Uses Redis Streams with a consumer group:
//! - `XADD` publishes the work item; `XREADGROUP` hands each entry to one
//!   consumer in the group
//! - An entry stays pending until `XACK`; a worker crash leaves it pending,
//!   and another consumer reclaims it via `XPENDING`/`XCLAIM` once it has
//!   been idle longer than `pending_timeout` (redelivery instead of loss)
//! - Scheduled retries settle the current entry and re-`XADD` the message
//!   with a bumped `attempt` field, so the counter travels with the
//!   delivery

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::Value;
use redis::aio::MultiplexedConnection;
use tracing::{debug, warn};

use super::{ChannelError, Delivery, Receipt, TaskChannel, TaskConsumer, TaskMessage};

/// Default stream key for work items.
const DEFAULT_STREAM_KEY: &str = "sibyl:tasks";

/// Default idle time after which a pending entry is reclaimed.
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 60_000;

/// How long one `XREADGROUP` blocks before we look for stalled entries again.
const READ_BLOCK_MS: u64 = 1_000;

#[derive(Clone)]
pub struct RedisStreamsTaskChannel {
    conn: MultiplexedConnection,
    stream_key: String,
    group: String,
    consumer_name: String,
    pending_timeout_ms: u64,
}

impl RedisStreamsTaskChannel {
    /// Connect and ensure the stream + consumer group exist (idempotent).
    pub async fn connect(
        redis_url: impl AsRef<str>,
        stream_key: Option<String>,
        group: impl Into<String>,
        consumer_name: impl Into<String>,
    ) -> Result<Self, ChannelError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| ChannelError::Backend(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ChannelError::Backend(e.to_string()))?;

        let channel = Self {
            conn,
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            group: group.into(),
            consumer_name: consumer_name.into(),
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        };
        channel.ensure_consumer_group().await?;
        Ok(channel)
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout_ms = timeout.as_millis() as u64;
        self
    }

    async fn ensure_consumer_group(&self) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();

        // BUSYGROUP means the group already exists; that is fine.
        let created: Result<String, _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(ChannelError::Backend(e.to_string())),
        }
    }

    async fn add_entry(
        conn: &mut MultiplexedConnection,
        stream_key: &str,
        message: &TaskMessage,
        attempt: u32,
    ) -> Result<String, ChannelError> {
        redis::cmd("XADD")
            .arg(stream_key)
            .arg("*")
            .arg("job_id")
            .arg(message.job_id.to_string())
            .arg("question")
            .arg(&message.question)
            .arg("attempt")
            .arg(attempt.to_string())
            .query_async(conn)
            .await
            .map_err(|e| ChannelError::Publish(e.to_string()))
    }

    /// Reclaim one entry that has been pending longer than the timeout.
    async fn claim_stalled(&self) -> Result<Option<Delivery>, ChannelError> {
        let mut conn = self.conn.clone();

        let pending: Value = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("IDLE")
            .arg(self.pending_timeout_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(|e| ChannelError::Backend(e.to_string()))?;

        let Some((entry_id, delivery_count)) = parse_pending_row(&pending) else {
            return Ok(None);
        };

        let claimed: Value = redis::cmd("XCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.consumer_name)
            .arg(self.pending_timeout_ms)
            .arg(&entry_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| ChannelError::Backend(e.to_string()))?;

        // Another consumer may have won the claim in the meantime.
        let Some((id, fields)) = parse_entries(&claimed).into_iter().next() else {
            return Ok(None);
        };

        debug!(entry_id = %id, delivery_count, "reclaimed stalled task entry");
        Ok(Some(delivery_from_fields(id, fields, delivery_count)?))
    }
}

#[async_trait]
impl TaskChannel for RedisStreamsTaskChannel {
    async fn publish(&self, message: TaskMessage) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();
        let entry_id = Self::add_entry(&mut conn, &self.stream_key, &message, 1).await?;
        debug!(job_id = %message.job_id, entry_id = %entry_id, "published task");
        Ok(())
    }
}

#[async_trait]
impl TaskConsumer for RedisStreamsTaskChannel {
    async fn next(&self) -> Result<Delivery, ChannelError> {
        loop {
            if let Some(delivery) = self.claim_stalled().await? {
                return Ok(delivery);
            }

            let mut conn = self.conn.clone();
            let read: Value = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.group)
                .arg(&self.consumer_name)
                .arg("BLOCK")
                .arg(READ_BLOCK_MS)
                .arg("COUNT")
                .arg(1)
                .arg("STREAMS")
                .arg(&self.stream_key)
                .arg(">")
                .query_async(&mut conn)
                .await
                .map_err(|e| ChannelError::Backend(e.to_string()))?;

            let entries = match &read {
                Value::Nil => continue,
                Value::Bulk(streams) => match streams.first() {
                    Some(Value::Bulk(stream)) if stream.len() == 2 => parse_entries(&stream[1]),
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };

            if let Some((id, fields)) = entries.into_iter().next() {
                return delivery_from_fields(id, fields, 1);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(delivery.receipt.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| ChannelError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn redeliver_after(
        &self,
        delivery: Delivery,
        delay: Duration,
    ) -> Result<(), ChannelError> {
        // Settle the current entry first: the retry is a fresh entry, not a
        // still-pending one, so the stall-reclaim path cannot double it.
        self.ack(&delivery).await?;

        let mut conn = self.conn.clone();
        let stream_key = self.stream_key.clone();
        let attempt = delivery.attempt + 1;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = Self::add_entry(&mut conn, &stream_key, &delivery.message, attempt).await
            {
                warn!(job_id = %delivery.message.job_id, error = %e, "scheduled redelivery failed");
            }
        });

        Ok(())
    }
}

fn delivery_from_fields(
    entry_id: String,
    fields: HashMap<String, String>,
    delivery_count: u32,
) -> Result<Delivery, ChannelError> {
    let job_id = fields
        .get("job_id")
        .ok_or_else(|| ChannelError::Backend(format!("entry {entry_id} missing job_id")))?
        .parse()
        .map_err(|e| ChannelError::Backend(format!("entry {entry_id}: {e}")))?;
    let question = fields
        .get("question")
        .ok_or_else(|| ChannelError::Backend(format!("entry {entry_id} missing question")))?
        .clone();
    let attempt = fields
        .get("attempt")
        .and_then(|a| a.parse().ok())
        .unwrap_or(1);

    Ok(Delivery {
        message: TaskMessage { job_id, question },
        // A reclaimed entry may have been delivered more often than its
        // attempt field records.
        attempt: attempt.max(delivery_count),
        receipt: Receipt::new(entry_id),
    })
}

/// Parse XRANGE-shaped entries: `[[id, [k, v, k, v, …]], …]`.
fn parse_entries(value: &Value) -> Vec<(String, HashMap<String, String>)> {
    let Value::Bulk(entries) = value else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let Value::Bulk(parts) = entry else {
                return None;
            };
            let id = as_string(parts.first()?)?;
            let Value::Bulk(flat) = parts.get(1)? else {
                return None;
            };
            let mut fields = HashMap::new();
            for pair in flat.chunks(2) {
                if let (Some(k), Some(v)) = (as_string(&pair[0]), pair.get(1).and_then(as_string)) {
                    fields.insert(k, v);
                }
            }
            Some((id, fields))
        })
        .collect()
}

/// First row of an extended XPENDING reply: `[id, consumer, idle, count]`.
fn parse_pending_row(value: &Value) -> Option<(String, u32)> {
    let Value::Bulk(rows) = value else {
        return None;
    };
    let Value::Bulk(row) = rows.first()? else {
        return None;
    };
    let id = as_string(row.first()?)?;
    let count = match row.get(3) {
        Some(Value::Int(n)) => *n as u32,
        _ => 1,
    };
    Some((id, count))
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}
