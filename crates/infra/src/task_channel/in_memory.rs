//! In-memory task channel for tests/dev.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChannelError, Delivery, Receipt, TaskChannel, TaskConsumer, TaskMessage};

/// In-memory at-least-once channel.
///
/// - Deliveries are handed to whichever consumer polls first
/// - `redeliver_after` settles the delivery and re-enqueues the message
///   with `attempt + 1` once the delay elapses
/// - Crash-redelivery of never-settled items is the durable backends' job;
///   here the in-flight set exists for test visibility
#[derive(Debug)]
pub struct InMemoryTaskChannel {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>,
    in_flight: Mutex<HashSet<Receipt>>,
    next_token: AtomicU64,
}

impl InMemoryTaskChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            in_flight: Mutex::new(HashSet::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Items delivered but not yet settled (test visibility).
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    fn enqueue(&self, message: TaskMessage, attempt: u32) -> Result<(), ChannelError> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let delivery = Delivery {
            message,
            attempt,
            receipt: Receipt::new(token.to_string()),
        };
        self.tx
            .send(delivery)
            .map_err(|e| ChannelError::Publish(e.to_string()))
    }

    fn settle(&self, receipt: &Receipt) {
        self.in_flight.lock().unwrap().remove(receipt);
    }
}

impl Default for InMemoryTaskChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskChannel for InMemoryTaskChannel {
    async fn publish(&self, message: TaskMessage) -> Result<(), ChannelError> {
        self.enqueue(message, 1)
    }
}

#[async_trait]
impl TaskConsumer for InMemoryTaskChannel {
    async fn next(&self) -> Result<Delivery, ChannelError> {
        let mut rx = self.rx.lock().await;
        let delivery = rx.recv().await.ok_or(ChannelError::Closed)?;
        self.in_flight
            .lock()
            .unwrap()
            .insert(delivery.receipt.clone());
        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        self.settle(&delivery.receipt);
        Ok(())
    }

    async fn redeliver_after(
        &self,
        delivery: Delivery,
        delay: Duration,
    ) -> Result<(), ChannelError> {
        self.settle(&delivery.receipt);

        let tx = self.tx.clone();
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let redelivery = Delivery {
            message: delivery.message,
            attempt: delivery.attempt + 1,
            receipt: Receipt::new(token.to_string()),
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the process is shutting down.
            let _ = tx.send(redelivery);
        });

        Ok(())
    }
}
