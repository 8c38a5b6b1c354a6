//! Executor runtime: a fixed pool of consume loops on one durable consumer.
//!
//! Each worker owns its own handle on the durable, so the workers of one
//! process (and of every other process using the same durable name) compete
//! for messages. The per-delivery flow is:
//!
//! `Received -> Rendering -> Executing -> {Acked | NackRetry | NackDeadLetter}`
//!
//! Permanent failures are acked so they are never redelivered; transient
//! failures are nak'd with backoff until `max_deliver` is reached, then
//! terminated into the consumer's dead letters.

use std::sync::Arc;
use std::time::Duration;

use actionflow_observe::attrs::SPAN_EXECUTE;
use actionflow_types::config::{ExecutorConfig, StreamConfig};
use actionflow_types::task::Task;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

use crate::channel::{ChannelError, Delivery, DurableConsumer, MessageChannel};

use super::dedup::DedupCache;
use super::handler::{ActionError, ActionHandler, ActionOutcome, DeliveryState, decode_content};
use super::stats::{ExecutorStats, StatsSnapshot};

/// Pause after a channel error before a worker asks for the next message.
const CHANNEL_ERROR_PAUSE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub dedup_capacity: usize,
    pub max_deliver: u32,
    pub backoff: Vec<Duration>,
}

impl ExecutorSettings {
    pub fn from_config(executor: &ExecutorConfig, stream: &StreamConfig) -> Self {
        Self {
            workers: executor.workers.max(1),
            dedup_capacity: executor.dedup_capacity,
            max_deliver: stream.max_deliver,
            backoff: stream
                .backoff_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }

    /// `backoff[min(attempt - 1, len - 1)]`, zero for an empty schedule.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let Some(last) = self.backoff.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        self.backoff[(attempt.saturating_sub(1) as usize).min(last)]
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&ExecutorConfig::default(), &StreamConfig::default())
    }
}

// ---------------------------------------------------------------------------
// ExecutorRuntime
// ---------------------------------------------------------------------------

struct RuntimeShared<H> {
    handler: H,
    settings: ExecutorSettings,
    stats: ExecutorStats,
    dedup: DedupCache,
}

/// Drives one [`ActionHandler`] from a durable consumer.
pub struct ExecutorRuntime<H> {
    shared: Arc<RuntimeShared<H>>,
}

impl<H> Clone for ExecutorRuntime<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<H: ActionHandler + 'static> ExecutorRuntime<H> {
    pub fn new(handler: H, settings: ExecutorSettings) -> Self {
        let dedup = DedupCache::new(settings.dedup_capacity);
        Self {
            shared: Arc::new(RuntimeShared {
                handler,
                settings,
                stats: ExecutorStats::default(),
                dedup,
            }),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.shared.settings
    }

    /// Run `workers` consume loops on `durable` until `cancel` fires.
    ///
    /// Returns the final stats. Deliveries in flight when cancelled finish
    /// processing first; anything claimed but not settled is redelivered by
    /// the stream after `ack_wait`.
    pub async fn run<C: MessageChannel>(
        &self,
        channel: &C,
        durable: &str,
        cancel: CancellationToken,
    ) -> Result<StatsSnapshot, ChannelError> {
        let action_type = self.shared.handler.action_type();
        let subject = action_type.subject();
        let workers = self.shared.settings.workers.max(1);

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let consumer = channel.subscribe(&subject, durable).await?;
            let runtime = self.clone();
            let cancel = cancel.clone();
            set.spawn(async move { runtime.worker_loop(worker, consumer, cancel).await });
        }

        tracing::info!(
            %action_type,
            durable,
            subject = %subject,
            workers,
            "executor started"
        );

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "executor worker panicked");
            }
        }

        let stats = self.stats();
        tracing::info!(?stats, "executor stopped");
        Ok(stats)
    }

    async fn worker_loop<K: DurableConsumer>(
        &self,
        worker: usize,
        consumer: K,
        cancel: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = consumer.next() => next,
            };
            match next {
                Ok(delivery) => {
                    self.process_delivery(&consumer, delivery).await;
                }
                Err(e) => {
                    tracing::warn!(worker, durable = consumer.durable(), error = %e, "consume failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(CHANNEL_ERROR_PAUSE) => {}
                    }
                }
            }
        }
        tracing::debug!(worker, "executor worker stopped");
    }

    /// Handle one delivery end to end and settle it on `consumer`.
    pub async fn process_delivery<K: DurableConsumer>(
        &self,
        consumer: &K,
        delivery: Delivery,
    ) -> DeliveryState {
        let stats = &self.shared.stats;
        stats.record_received();

        let task = match Task::from_payload(&delivery.payload) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(
                    seq = delivery.seq,
                    subject = %delivery.subject,
                    error = %e,
                    "undecodable task payload"
                );
                stats.record_permanent_failure();
                return settle_ack(consumer, &delivery).await;
            }
        };

        let span = info_span!(
            SPAN_EXECUTE,
            actionflow.workflow_id = %task.workflow_id,
            actionflow.step_index = task.step_index,
            actionflow.task_id = %task.task_id,
            actionflow.action_type = %task.action_type,
            actionflow.attempt = delivery.attempt,
        );
        self.process_task(consumer, &delivery, &task)
            .instrument(span)
            .await
    }

    async fn process_task<K: DurableConsumer>(
        &self,
        consumer: &K,
        delivery: &Delivery,
        task: &Task,
    ) -> DeliveryState {
        let shared = &self.shared;
        tracing::debug!(state = %DeliveryState::Received, seq = delivery.seq, "task received");

        if shared.dedup.contains(&task.task_id) {
            shared.stats.record_duplicate();
            tracing::debug!("task already completed, acking redelivery");
            return settle_ack(consumer, delivery).await;
        }

        tracing::trace!(state = %DeliveryState::Rendering);
        if let Err(e) = decode_content(task, shared.handler.action_type()) {
            return self.permanent(consumer, delivery, task, &e).await;
        }

        tracing::trace!(state = %DeliveryState::Executing);
        match shared.handler.execute(task).await {
            Ok(outcome) => {
                match outcome {
                    ActionOutcome::Delivered => shared.stats.record_succeeded(),
                    ActionOutcome::Simulated => shared.stats.record_simulated(),
                }
                shared.dedup.insert(task.task_id);
                tracing::info!(?outcome, "task completed");
                settle_ack(consumer, delivery).await
            }
            Err(e @ ActionError::Permanent(_)) => self.permanent(consumer, delivery, task, &e).await,
            Err(ActionError::Transient(reason)) => {
                if delivery.attempt >= shared.settings.max_deliver {
                    shared.stats.record_dead_lettered();
                    tracing::error!(
                        workflow_id = %task.workflow_id,
                        step_index = task.step_index,
                        task_id = %task.task_id,
                        attempt = delivery.attempt,
                        error = %reason,
                        "task exhausted deliveries, dead-lettering"
                    );
                    if let Err(e) = consumer.term(delivery, &reason).await {
                        tracing::warn!(error = %e, "term failed; stream will redeliver");
                    }
                    DeliveryState::NackDeadLetter
                } else {
                    let delay = shared.settings.backoff_for(delivery.attempt);
                    shared.stats.record_retried();
                    tracing::warn!(
                        attempt = delivery.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "transient failure, retrying"
                    );
                    if let Err(e) = consumer.nak(delivery, delay).await {
                        tracing::warn!(error = %e, "nak failed; stream will redeliver after ack wait");
                    }
                    DeliveryState::NackRetry
                }
            }
        }
    }

    async fn permanent<K: DurableConsumer>(
        &self,
        consumer: &K,
        delivery: &Delivery,
        task: &Task,
        error: &ActionError,
    ) -> DeliveryState {
        self.shared.stats.record_permanent_failure();
        self.shared.dedup.insert(task.task_id);
        tracing::error!(
            workflow_id = %task.workflow_id,
            step_index = task.step_index,
            task_id = %task.task_id,
            error = %error,
            "task failed permanently"
        );
        settle_ack(consumer, delivery).await
    }
}

async fn settle_ack<K: DurableConsumer>(consumer: &K, delivery: &Delivery) -> DeliveryState {
    if let Err(e) = consumer.ack(delivery).await {
        tracing::warn!(seq = delivery.seq, error = %e, "ack failed; stream will redeliver");
    }
    tracing::debug!(state = %DeliveryState::Acked, seq = delivery.seq);
    DeliveryState::Acked
}
