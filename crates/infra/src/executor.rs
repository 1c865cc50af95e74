//! Job executor: drives deliveries through the job state machine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use sibyl_core::JobStatus;
use sibyl_pipeline::{Answer, AnswerOrchestrator, PipelineError, RetrievalOrchestrator};

use crate::job_store::{JobStore, JobStoreError};
use crate::retry::RetryPolicy;
use crate::task_channel::{ChannelError, Delivery, TaskConsumer, TaskMessage};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Retry policy for transient pipeline failures.
    pub retry: RetryPolicy,
    /// Upper bound on one retrieval pass.
    pub retrieval_timeout: Duration,
    /// Upper bound on one generation pass.
    pub generation_timeout: Duration,
    /// Name for logging.
    pub name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            retrieval_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(60),
            name: "job-executor".to_string(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub deliveries_handled: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub retries_scheduled: u64,
    pub duplicate_deliveries: u64,
}

/// Handle to control a spawned executor worker.
#[derive(Debug)]
pub struct ExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ExecutorHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Consumes task deliveries and drives each job to a terminal state.
///
/// Every invocation ends in either an acknowledged terminal transition or a
/// scheduled redelivery; a downstream failure never escapes to corrupt
/// store state. Any number of executors may run concurrently; duplicate
/// deliveries are made safe by the store's CAS transition, not by
/// in-process locking.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    retrieval: RetrievalOrchestrator,
    answerer: AnswerOrchestrator,
    config: ExecutorConfig,
    stats: Mutex<ExecutorStats>,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        retrieval: RetrievalOrchestrator,
        answerer: AnswerOrchestrator,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            retrieval,
            answerer,
            config,
            stats: Mutex::new(ExecutorStats::default()),
        }
    }

    /// Current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats.lock().unwrap().clone()
    }

    /// Spawn a worker loop consuming from `consumer`.
    pub fn spawn(self: Arc<Self>, consumer: Arc<dyn TaskConsumer>) -> ExecutorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let name = self.config.name.clone();

        let join = tokio::spawn(async move {
            info!(executor = %name, "job executor started");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    next = consumer.next() => match next {
                        Ok(delivery) => {
                            if let Err(e) = self.handle_delivery(&*consumer, delivery).await {
                                error!(executor = %name, error = %e, "delivery handling failed");
                            }
                        }
                        Err(ChannelError::Closed) => break,
                        Err(e) => {
                            error!(executor = %name, error = %e, "failed to receive delivery");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
            info!(executor = %name, "job executor stopped");
        });

        ExecutorHandle {
            shutdown: shutdown_tx,
            join,
        }
    }

    /// Process one delivery to completion, retry scheduling, or failure.
    pub async fn handle_delivery(
        &self,
        consumer: &dyn TaskConsumer,
        delivery: Delivery,
    ) -> Result<(), ExecutorError> {
        let id = delivery.message.job_id;
        let attempt = delivery.attempt;
        self.stats.lock().unwrap().deliveries_handled += 1;

        let claimed = match self
            .store
            .transition(
                id,
                &[JobStatus::Pending, JobStatus::Processing],
                JobStatus::Processing,
                None,
                None,
            )
            .await
        {
            Ok(claimed) => claimed,
            Err(JobStoreError::NotFound(_)) => {
                // A message for a record that never existed (or was cleaned
                // up externally) would otherwise redeliver forever.
                warn!(job_id = %id, "delivery for unknown job; acknowledging");
                consumer.ack(&delivery).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !claimed {
            // Duplicate delivery after a terminal outcome: idempotent skip,
            // no adapter calls.
            debug!(job_id = %id, attempt, "job already terminal; acknowledging duplicate");
            self.stats.lock().unwrap().duplicate_deliveries += 1;
            consumer.ack(&delivery).await?;
            return Ok(());
        }

        debug!(job_id = %id, attempt, "processing job");

        match self.run_pipeline(&delivery.message).await {
            Ok(answer) => {
                let won = self
                    .store
                    .transition(
                        id,
                        &[JobStatus::Processing],
                        JobStatus::Completed,
                        Some(answer.text),
                        Some(answer.sources),
                    )
                    .await?;
                if won {
                    info!(job_id = %id, attempt, "job completed");
                    self.stats.lock().unwrap().jobs_completed += 1;
                } else {
                    debug!(job_id = %id, "another delivery finished this job first");
                }
                consumer.ack(&delivery).await?;
            }
            Err(e) if e.is_retryable() && self.config.retry.should_retry(attempt) => {
                let delay = self.config.retry.delay_for_attempt(attempt);
                warn!(
                    job_id = %id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure; scheduling redelivery"
                );
                // The job stays Processing; the retry is a fresh delivery.
                consumer.redeliver_after(delivery, delay).await?;
                self.stats.lock().unwrap().retries_scheduled += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(job_id = %id, attempt, error = %e, "retries exhausted; failing job");
                } else {
                    warn!(job_id = %id, attempt, error = %e, "permanent failure; failing job");
                }
                let won = self
                    .store
                    .transition(
                        id,
                        &[JobStatus::Processing],
                        JobStatus::Failed,
                        Some(e.diagnostic()),
                        None,
                    )
                    .await?;
                if won {
                    self.stats.lock().unwrap().jobs_failed += 1;
                }
                consumer.ack(&delivery).await?;
            }
        }

        Ok(())
    }

    async fn run_pipeline(&self, message: &TaskMessage) -> Result<Answer, PipelineError> {
        let passages = timeout(
            self.config.retrieval_timeout,
            self.retrieval.retrieve(&message.question),
        )
        .await
        .map_err(|_| {
            PipelineError::Transient(format!(
                "retrieval timed out after {:?}",
                self.config.retrieval_timeout
            ))
        })?;

        timeout(
            self.config.generation_timeout,
            self.answerer.answer(&message.question, &passages),
        )
        .await
        .map_err(|_| {
            PipelineError::Transient(format!(
                "generation timed out after {:?}",
                self.config.generation_timeout
            ))
        })?
    }
}

/// Executor error: store or channel trouble outside the pipeline itself.
///
/// These bubble to the worker loop; the unacknowledged delivery comes back
/// later, which is the at-least-once safety net.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use sibyl_core::JobId;
    use sibyl_pipeline::{
        AdapterError, GenerationAdapter, GenerationParams, SearchAdapter, SearchHit,
    };

    use crate::job_store::InMemoryJobStore;
    use crate::task_channel::Receipt;

    /// Consumer double that records settlements instead of queueing.
    #[derive(Default)]
    struct RecordingConsumer {
        acked: Mutex<Vec<Receipt>>,
        redeliveries: Mutex<Vec<(Delivery, Duration)>>,
    }

    impl RecordingConsumer {
        fn acks(&self) -> usize {
            self.acked.lock().unwrap().len()
        }

        fn redelivery_delays(&self) -> Vec<Duration> {
            self.redeliveries
                .lock()
                .unwrap()
                .iter()
                .map(|(_, d)| *d)
                .collect()
        }
    }

    #[async_trait]
    impl TaskConsumer for RecordingConsumer {
        async fn next(&self) -> Result<Delivery, ChannelError> {
            Err(ChannelError::Closed)
        }

        async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
            self.acked.lock().unwrap().push(delivery.receipt.clone());
            Ok(())
        }

        async fn redeliver_after(
            &self,
            delivery: Delivery,
            delay: Duration,
        ) -> Result<(), ChannelError> {
            self.redeliveries.lock().unwrap().push((delivery, delay));
            Ok(())
        }
    }

    struct FixedSearch(Vec<SearchHit>);

    #[async_trait]
    impl SearchAdapter for FixedSearch {
        async fn query(&self, _text: &str, _k: usize) -> Result<Vec<SearchHit>, AdapterError> {
            Ok(self.0.clone())
        }
    }

    struct CountingGenerator {
        reply: Result<String, AdapterError>,
        calls: AtomicUsize,
    }

    impl CountingGenerator {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(err: AdapterError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(err),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationAdapter for CountingGenerator {
        async fn generate(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    fn boiling_point_hit() -> SearchHit {
        SearchHit {
            chunk_id: "c1".to_string(),
            score: 0.9,
            text: "Water boils at 100°C at sea level.".to_string(),
            document_id: "d1".to_string(),
            source_url: None,
        }
    }

    fn executor(
        store: Arc<InMemoryJobStore>,
        hits: Vec<SearchHit>,
        generator: Arc<CountingGenerator>,
        retry: RetryPolicy,
    ) -> JobExecutor {
        JobExecutor::new(
            store,
            RetrievalOrchestrator::new(Arc::new(FixedSearch(hits)), 5),
            AnswerOrchestrator::new(generator, GenerationParams::default()),
            ExecutorConfig::default().with_retry(retry),
        )
    }

    fn delivery(id: JobId, question: &str, attempt: u32) -> Delivery {
        Delivery {
            message: TaskMessage {
                job_id: id,
                question: question.to_string(),
            },
            attempt,
            receipt: Receipt::new(format!("t-{attempt}")),
        }
    }

    #[tokio::test]
    async fn completes_a_job_end_to_end() {
        let store = InMemoryJobStore::arc();
        let generator = CountingGenerator::replying("Water boils at 100°C. [Source: d1, Chunk: c1]");
        let executor = executor(
            store.clone(),
            vec![boiling_point_hit()],
            generator.clone(),
            RetryPolicy::default(),
        );

        let question = "What is the boiling point of water at sea level?";
        let id = JobId::new();
        store.create(id, question).await.unwrap();

        let consumer = RecordingConsumer::default();
        executor
            .handle_delivery(&consumer, delivery(id, question, 1))
            .await
            .unwrap();

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            job.result_text.as_deref(),
            Some("Water boils at 100°C. [Source: d1, Chunk: c1]")
        );

        let sources = job.sources.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_id, "d1");
        assert_eq!(sources[0].chunk_id, "c1");
        assert_eq!(sources[0].relevance_score, 0.9);

        assert_eq!(generator.calls(), 1);
        assert_eq!(consumer.acks(), 1);
        assert_eq!(executor.stats().jobs_completed, 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_after_completion_is_a_no_op() {
        let store = InMemoryJobStore::arc();
        let generator = CountingGenerator::replying("answer");
        let executor = executor(
            store.clone(),
            vec![boiling_point_hit()],
            generator.clone(),
            RetryPolicy::default(),
        );

        let id = JobId::new();
        store.create(id, "q").await.unwrap();

        let consumer = RecordingConsumer::default();
        executor
            .handle_delivery(&consumer, delivery(id, "q", 1))
            .await
            .unwrap();
        let before = store.get(id).await.unwrap();

        // Redelivery of the same message after the terminal outcome.
        executor
            .handle_delivery(&consumer, delivery(id, "q", 1))
            .await
            .unwrap();

        let after = store.get(id).await.unwrap();
        assert_eq!(after.status, JobStatus::Completed);
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(generator.calls(), 1, "no duplicate generation call");
        assert_eq!(consumer.acks(), 2, "duplicate is acknowledged");
        assert_eq!(executor.stats().duplicate_deliveries, 1);
    }

    #[tokio::test]
    async fn empty_retrieval_still_terminates_via_fallback() {
        let store = InMemoryJobStore::arc();
        let generator = CountingGenerator::replying("General knowledge answer.");
        let executor = executor(store.clone(), vec![], generator, RetryPolicy::default());

        let id = JobId::new();
        store.create(id, "q").await.unwrap();

        let consumer = RecordingConsumer::default();
        executor
            .handle_delivery(&consumer, delivery(id, "q", 1))
            .await
            .unwrap();

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.sources.as_deref(), Some(&[] as &[_]));
    }

    #[tokio::test]
    async fn transient_failures_back_off_then_fail() {
        let store = InMemoryJobStore::arc();
        let generator =
            CountingGenerator::failing(AdapterError::Unreachable("generation down".into()));
        let base = Duration::from_millis(100);
        let retry = RetryPolicy::new(3, base, Duration::from_secs(10));
        let executor = executor(store.clone(), vec![], generator.clone(), retry.clone());

        let id = JobId::new();
        store.create(id, "q").await.unwrap();

        let consumer = RecordingConsumer::default();
        for attempt in 1..=3 {
            executor
                .handle_delivery(&consumer, delivery(id, "q", attempt))
                .await
                .unwrap();
        }

        // Exactly max_attempts adapter calls, then terminal failure.
        assert_eq!(generator.calls(), 3);
        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result_text.is_some());

        // Backoff doubles per failed attempt.
        assert_eq!(consumer.redelivery_delays(), vec![base, base * 2]);
        assert_eq!(retry.delay_for_attempt(3), base * 4);
        assert_eq!(consumer.acks(), 1, "only the terminal delivery is acked");
        assert_eq!(executor.stats().retries_scheduled, 2);
    }

    #[tokio::test]
    async fn job_stays_processing_between_retries() {
        let store = InMemoryJobStore::arc();
        let generator = CountingGenerator::failing(AdapterError::Unreachable("down".into()));
        let executor = executor(
            store.clone(),
            vec![],
            generator,
            RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(1)),
        );

        let id = JobId::new();
        store.create(id, "q").await.unwrap();

        let consumer = RecordingConsumer::default();
        executor
            .handle_delivery(&consumer, delivery(id, "q", 1))
            .await
            .unwrap();

        assert_eq!(store.get(id).await.unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn permanent_failure_fails_without_retry() {
        let store = InMemoryJobStore::arc();
        let generator = CountingGenerator::failing(AdapterError::Rejected("bad prompt".into()));
        let executor = executor(store.clone(), vec![], generator.clone(), RetryPolicy::default());

        let id = JobId::new();
        store.create(id, "q").await.unwrap();

        let consumer = RecordingConsumer::default();
        executor
            .handle_delivery(&consumer, delivery(id, "q", 1))
            .await
            .unwrap();

        assert_eq!(generator.calls(), 1);
        assert!(consumer.redelivery_delays().is_empty());
        assert_eq!(store.get(id).await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn empty_generation_output_ends_failed_not_completed() {
        let store = InMemoryJobStore::arc();
        let generator = CountingGenerator::replying("");
        let executor = executor(
            store.clone(),
            vec![boiling_point_hit()],
            generator,
            RetryPolicy::no_retry(),
        );

        let id = JobId::new();
        store.create(id, "q").await.unwrap();

        let consumer = RecordingConsumer::default();
        executor
            .handle_delivery(&consumer, delivery(id, "q", 1))
            .await
            .unwrap();

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.sources.is_none());
    }

    #[tokio::test]
    async fn unknown_job_is_acknowledged_and_skipped() {
        let store = InMemoryJobStore::arc();
        let generator = CountingGenerator::replying("answer");
        let executor = executor(store, vec![], generator.clone(), RetryPolicy::default());

        let consumer = RecordingConsumer::default();
        executor
            .handle_delivery(&consumer, delivery(JobId::new(), "q", 1))
            .await
            .unwrap();

        assert_eq!(generator.calls(), 0);
        assert_eq!(consumer.acks(), 1);
    }

    #[tokio::test]
    async fn worker_loop_drains_a_real_channel() {
        use crate::task_channel::{InMemoryTaskChannel, TaskChannel};

        let store = InMemoryJobStore::arc();
        let generator = CountingGenerator::replying("looped answer");
        let executor = Arc::new(executor(
            store.clone(),
            vec![boiling_point_hit()],
            generator,
            RetryPolicy::default(),
        ));

        let channel = Arc::new(InMemoryTaskChannel::new());
        let handle = executor.clone().spawn(channel.clone());

        let id = JobId::new();
        store.create(id, "q").await.unwrap();
        channel
            .publish(TaskMessage {
                job_id: id,
                question: "q".to_string(),
            })
            .await
            .unwrap();

        // Poll until the worker has driven the job terminal.
        for _ in 0..100 {
            if store.get(id).await.unwrap().status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(store.get(id).await.unwrap().status, JobStatus::Completed);
        handle.shutdown().await;
    }
}
