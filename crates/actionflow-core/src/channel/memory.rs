//! In-memory durable stream.
//!
//! Single-process implementation of [`MessageChannel`] used by tests and
//! embedded setups. All state lives behind one mutex; waiting consumers are
//! woken through a [`Notify`] and otherwise re-check on the configured poll
//! interval. Time is measured with `tokio::time::Instant` so tests can drive
//! ack-wait and backoff with a paused clock.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use actionflow_types::config::StreamConfig;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::subject::{matches, matches_any, validate_filter, validate_subject};
use super::{
    ChannelError, ConsumerInfo, DeadLetter, Delivery, DurableConsumer, MessageChannel, PublishAck,
    StreamInfo,
};

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct StoredMessage {
    seq: u64,
    subject: String,
    payload: Vec<u8>,
    published_at: DateTime<Utc>,
    stored_at: Instant,
    /// Durables that acked or terminated this message.
    done_by: HashSet<String>,
}

#[derive(Debug, Clone, Copy)]
enum Tracking {
    Waiting { available_at: Instant },
    InFlight { deadline: Instant },
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    attempts: u32,
    tracking: Tracking,
}

struct ConsumerState {
    filter: String,
    progress: HashMap<u64, Progress>,
    /// Oldest first, capped at the stream's `max_msgs`.
    dead: VecDeque<DeadLetter>,
}

#[derive(Default)]
struct State {
    last_seq: u64,
    messages: BTreeMap<u64, StoredMessage>,
    bytes: u64,
    consumers: BTreeMap<String, ConsumerState>,
}

impl State {
    /// Expire aged messages and time out overdue deliveries.
    fn reap(&mut self, config: &StreamConfig, now: Instant) {
        if config.max_age_secs > 0 {
            let max_age = config.max_age();
            let expired: Vec<u64> = self
                .messages
                .values()
                .filter(|m| now.saturating_duration_since(m.stored_at) >= max_age)
                .map(|m| m.seq)
                .collect();
            for seq in expired {
                self.remove_message(seq);
            }
        }

        let mut exhausted = Vec::new();
        for (durable, consumer) in self.consumers.iter_mut() {
            for (seq, p) in consumer.progress.iter_mut() {
                if let Tracking::InFlight { deadline } = p.tracking {
                    if deadline > now {
                        continue;
                    }
                    if p.attempts >= config.max_deliver {
                        exhausted.push((durable.clone(), *seq));
                    } else {
                        p.tracking = Tracking::Waiting { available_at: now };
                    }
                }
            }
        }
        for (durable, seq) in exhausted {
            self.dead_letter(
                &durable,
                seq,
                "ack wait expired after max deliveries",
                config.max_msgs,
            );
        }
    }

    fn claim(&mut self, durable: &str, config: &StreamConfig, now: Instant) -> Option<Delivery> {
        let State {
            messages,
            consumers,
            ..
        } = self;
        let consumer = consumers.get_mut(durable)?;

        for m in messages.values() {
            if m.done_by.contains(durable) || !matches(&consumer.filter, &m.subject) {
                continue;
            }
            let attempt = match consumer.progress.get(&m.seq) {
                None => 1,
                Some(Progress {
                    attempts,
                    tracking: Tracking::Waiting { available_at },
                }) if *available_at <= now => attempts + 1,
                Some(_) => continue,
            };
            consumer.progress.insert(
                m.seq,
                Progress {
                    attempts: attempt,
                    tracking: Tracking::InFlight {
                        deadline: now + config.ack_wait(),
                    },
                },
            );
            return Some(Delivery {
                seq: m.seq,
                subject: m.subject.clone(),
                payload: m.payload.clone(),
                attempt,
                published_at: m.published_at,
            });
        }
        None
    }

    /// Earliest instant at which this consumer's tracked state changes.
    fn next_wake(&self, durable: &str) -> Option<Instant> {
        self.consumers.get(durable).and_then(|c| {
            c.progress
                .values()
                .map(|p| match p.tracking {
                    Tracking::Waiting { available_at } => available_at,
                    Tracking::InFlight { deadline } => deadline,
                })
                .min()
        })
    }

    /// Record `seq` as a dead letter, dropping the oldest entries beyond
    /// `limit` (0 keeps everything).
    fn dead_letter(&mut self, durable: &str, seq: u64, reason: &str, limit: u64) {
        let Some(consumer) = self.consumers.get_mut(durable) else {
            return;
        };
        let attempts = consumer.progress.remove(&seq).map(|p| p.attempts).unwrap_or(0);
        if let Some(m) = self.messages.get(&seq) {
            if limit > 0 {
                while consumer.dead.len() as u64 >= limit {
                    consumer.dead.pop_front();
                }
            }
            consumer.dead.push_back(DeadLetter {
                seq,
                subject: m.subject.clone(),
                payload: String::from_utf8_lossy(&m.payload).into_owned(),
                attempts,
                reason: reason.to_string(),
                dead_at: Utc::now(),
            });
            tracing::warn!(durable, seq, attempts, reason, "message dead-lettered");
        }
        self.mark_done(durable, seq);
    }

    fn mark_done(&mut self, durable: &str, seq: u64) {
        if let Some(consumer) = self.consumers.get_mut(durable) {
            consumer.progress.remove(&seq);
        }
        let Some(m) = self.messages.get_mut(&seq) else {
            return;
        };
        m.done_by.insert(durable.to_string());

        let mut interested = self
            .consumers
            .iter()
            .filter(|(_, c)| matches(&c.filter, &m.subject))
            .map(|(name, _)| name)
            .peekable();
        let has_interest = interested.peek().is_some();
        let all_done = interested.all(|name| m.done_by.contains(name));
        if has_interest && all_done {
            self.remove_message(seq);
        }
    }

    fn remove_message(&mut self, seq: u64) {
        if let Some(m) = self.messages.remove(&seq) {
            self.bytes = self.bytes.saturating_sub(m.payload.len() as u64);
        }
        for consumer in self.consumers.values_mut() {
            consumer.progress.remove(&seq);
        }
    }
}

struct Shared {
    config: StreamConfig,
    state: Mutex<State>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, State>, ChannelError> {
        self.state.lock().map_err(poison_err)
    }
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> ChannelError {
    ChannelError::Storage("stream lock poisoned".to_string())
}

// ---------------------------------------------------------------------------
// InMemoryStream
// ---------------------------------------------------------------------------

/// Cloneable handle to a shared in-memory stream.
#[derive(Clone)]
pub struct InMemoryStream {
    shared: Arc<Shared>,
}

impl InMemoryStream {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }
}

impl Default for InMemoryStream {
    fn default() -> Self {
        Self::new(StreamConfig::default())
    }
}

impl MessageChannel for InMemoryStream {
    type Consumer = InMemoryConsumer;

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, ChannelError> {
        validate_subject(subject)?;
        let config = &self.shared.config;
        if !matches_any(&config.subjects, subject) {
            return Err(ChannelError::NoStream(subject.to_string()));
        }

        let seq = {
            let mut state = self.shared.lock()?;
            let now = Instant::now();
            state.reap(config, now);

            if config.max_msgs > 0 && state.messages.len() as u64 >= config.max_msgs {
                return Err(ChannelError::StorageFull(format!(
                    "max_msgs {} reached",
                    config.max_msgs
                )));
            }
            let size = payload.len() as u64;
            if config.max_bytes > 0 && state.bytes + size > config.max_bytes {
                return Err(ChannelError::StorageFull(format!(
                    "max_bytes {} would be exceeded",
                    config.max_bytes
                )));
            }

            state.last_seq += 1;
            let seq = state.last_seq;
            state.bytes += size;
            state.messages.insert(
                seq,
                StoredMessage {
                    seq,
                    subject: subject.to_string(),
                    payload,
                    published_at: Utc::now(),
                    stored_at: now,
                    done_by: HashSet::new(),
                },
            );
            seq
        };

        self.shared.notify.notify_waiters();
        tracing::trace!(subject, seq, "published");
        Ok(PublishAck { seq })
    }

    async fn subscribe(&self, filter: &str, durable: &str) -> Result<InMemoryConsumer, ChannelError> {
        validate_filter(filter)?;
        if durable.is_empty() {
            return Err(ChannelError::InvalidSubject("empty durable name".to_string()));
        }

        let mut state = self.shared.lock()?;
        match state.consumers.get(durable) {
            Some(existing) if existing.filter != filter => {
                return Err(ChannelError::ConsumerConflict {
                    durable: durable.to_string(),
                    existing: existing.filter.clone(),
                });
            }
            Some(_) => {}
            None => {
                state.consumers.insert(
                    durable.to_string(),
                    ConsumerState {
                        filter: filter.to_string(),
                        progress: HashMap::new(),
                        dead: VecDeque::new(),
                    },
                );
                tracing::debug!(durable, filter, "registered durable consumer");
            }
        }
        drop(state);

        Ok(InMemoryConsumer {
            shared: Arc::clone(&self.shared),
            durable: durable.to_string(),
        })
    }

    async fn stream_info(&self) -> Result<StreamInfo, ChannelError> {
        let mut state = self.shared.lock()?;
        state.reap(&self.shared.config, Instant::now());

        let consumers = state
            .consumers
            .iter()
            .map(|(durable, c)| {
                let mut pending = 0;
                let mut in_flight = 0;
                for m in state.messages.values() {
                    if m.done_by.contains(durable) || !matches(&c.filter, &m.subject) {
                        continue;
                    }
                    match c.progress.get(&m.seq).map(|p| p.tracking) {
                        Some(Tracking::InFlight { .. }) => in_flight += 1,
                        _ => pending += 1,
                    }
                }
                ConsumerInfo {
                    durable: durable.clone(),
                    filter: c.filter.clone(),
                    pending,
                    in_flight,
                    dead_letters: c.dead.len() as u64,
                }
            })
            .collect();

        Ok(StreamInfo {
            subjects: self.shared.config.subjects.clone(),
            messages: state.messages.len() as u64,
            bytes: state.bytes,
            first_seq: state.messages.keys().next().copied(),
            last_seq: state.messages.keys().next_back().copied(),
            consumers,
        })
    }

    async fn dead_letters(&self, durable: &str) -> Result<Vec<DeadLetter>, ChannelError> {
        let state = self.shared.lock()?;
        Ok(state
            .consumers
            .get(durable)
            .map(|c| c.dead.iter().cloned().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// InMemoryConsumer
// ---------------------------------------------------------------------------

/// One handle on a durable consumer of an [`InMemoryStream`].
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    durable: String,
}

impl DurableConsumer for InMemoryConsumer {
    async fn next(&self) -> Result<Delivery, ChannelError> {
        let config = &self.shared.config;
        loop {
            // Created before the claim attempt so a publish in between still wakes us.
            let notified = self.shared.notify.notified();
            let wait = {
                let mut state = self.shared.lock()?;
                let now = Instant::now();
                state.reap(config, now);
                if let Some(delivery) = state.claim(&self.durable, config, now) {
                    return Ok(delivery);
                }
                state
                    .next_wake(&self.durable)
                    .map(|at| at.saturating_duration_since(now))
                    .unwrap_or(config.poll_interval())
                    .min(config.poll_interval())
            };

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut state = self.shared.lock()?;
        state.mark_done(&self.durable, delivery.seq);
        Ok(())
    }

    async fn nak(&self, delivery: &Delivery, delay: Duration) -> Result<(), ChannelError> {
        let config = &self.shared.config;
        {
            let mut state = self.shared.lock()?;
            let current = state
                .consumers
                .get(&self.durable)
                .and_then(|c| c.progress.get(&delivery.seq).copied());

            // Stale handles (already redelivered elsewhere) are ignored.
            match current {
                Some(Progress {
                    attempts,
                    tracking: Tracking::InFlight { .. },
                }) if attempts == delivery.attempt => {
                    if attempts >= config.max_deliver {
                        state.dead_letter(
                            &self.durable,
                            delivery.seq,
                            "max deliveries reached",
                            config.max_msgs,
                        );
                    } else if let Some(c) = state.consumers.get_mut(&self.durable) {
                        c.progress.insert(
                            delivery.seq,
                            Progress {
                                attempts,
                                tracking: Tracking::Waiting {
                                    available_at: Instant::now() + delay,
                                },
                            },
                        );
                    }
                }
                _ => return Ok(()),
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn term(&self, delivery: &Delivery, reason: &str) -> Result<(), ChannelError> {
        let mut state = self.shared.lock()?;
        let tracked = state
            .consumers
            .get(&self.durable)
            .is_some_and(|c| c.progress.contains_key(&delivery.seq));
        if tracked {
            let limit = self.shared.config.max_msgs;
            state.dead_letter(&self.durable, delivery.seq, reason, limit);
        }
        Ok(())
    }

    fn durable(&self) -> &str {
        &self.durable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_with(f: impl FnOnce(&mut StreamConfig)) -> InMemoryStream {
        let mut config = StreamConfig::default();
        f(&mut config);
        InMemoryStream::new(config)
    }

    async fn no_delivery(consumer: &InMemoryConsumer, within: Duration) -> bool {
        tokio::time::timeout(within, consumer.next()).await.is_err()
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_consume_ack() {
        let stream = InMemoryStream::default();
        let consumer = stream.subscribe("actions.email", "email-executor").await.unwrap();

        let ack = stream.publish("actions.email", b"hello".to_vec()).await.unwrap();
        assert_eq!(ack.seq, 1);

        let d = consumer.next().await.unwrap();
        assert_eq!(d.seq, 1);
        assert_eq!(d.attempt, 1);
        assert_eq!(d.payload, b"hello");
        consumer.ack(&d).await.unwrap();

        // Acked: never redelivered, even after ack_wait passes.
        assert!(no_delivery(&consumer, Duration::from_secs(120)).await);
        assert_eq!(stream.stream_info().await.unwrap().messages, 0);
    }

    #[tokio::test]
    async fn test_publish_without_stream_fails() {
        let stream = InMemoryStream::default();
        let err = stream.publish("audit.log", b"x".to_vec()).await.unwrap_err();
        assert_eq!(err, ChannelError::NoStream("audit.log".to_string()));
        assert!(!err.is_retryable());

        let err = stream.publish("actions.*", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidSubject(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_redelivered_after_ack_wait() {
        let stream = InMemoryStream::default();
        let consumer = stream.subscribe("actions.webhook", "webhook-executor").await.unwrap();
        stream.publish("actions.webhook", b"t".to_vec()).await.unwrap();

        let first = consumer.next().await.unwrap();
        assert_eq!(first.attempt, 1);

        // Not redelivered before ack_wait (30s).
        assert!(no_delivery(&consumer, Duration::from_secs(20)).await);

        let second = consumer.next().await.unwrap();
        assert_eq!(second.seq, first.seq);
        assert_eq!(second.attempt, 2);
        consumer.ack(&second).await.unwrap();
        assert!(no_delivery(&consumer, Duration::from_secs(120)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nak_delays_redelivery() {
        let stream = InMemoryStream::default();
        let consumer = stream.subscribe("actions.>", "all").await.unwrap();
        stream.publish("actions.email", b"t".to_vec()).await.unwrap();

        let d = consumer.next().await.unwrap();
        consumer.nak(&d, Duration::from_secs(5)).await.unwrap();

        let start = Instant::now();
        let again = consumer.next().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_deliver_dead_letters() {
        let stream = stream_with(|c| c.max_deliver = 2);
        let consumer = stream.subscribe("actions.email", "email-executor").await.unwrap();
        stream.publish("actions.email", b"poison".to_vec()).await.unwrap();

        let d1 = consumer.next().await.unwrap();
        consumer.nak(&d1, Duration::ZERO).await.unwrap();
        let d2 = consumer.next().await.unwrap();
        assert_eq!(d2.attempt, 2);
        consumer.nak(&d2, Duration::ZERO).await.unwrap();

        assert!(no_delivery(&consumer, Duration::from_secs(120)).await);
        let dead = stream.dead_letters("email-executor").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, "poison");
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(stream.stream_info().await.unwrap().messages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_wait_timeouts_count_towards_max_deliver() {
        let stream = stream_with(|c| c.max_deliver = 1);
        let consumer = stream.subscribe("actions.email", "email-executor").await.unwrap();
        stream.publish("actions.email", b"slow".to_vec()).await.unwrap();

        let _ = consumer.next().await.unwrap();
        assert!(no_delivery(&consumer, Duration::from_secs(120)).await);
        assert_eq!(stream.dead_letters("email-executor").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_term_moves_to_dead_letters() {
        let stream = InMemoryStream::default();
        let consumer = stream.subscribe("actions.email", "email-executor").await.unwrap();
        stream.publish("actions.email", b"x".to_vec()).await.unwrap();

        let d = consumer.next().await.unwrap();
        consumer.term(&d, "handler gave up").await.unwrap();

        let dead = stream.dead_letters("email-executor").await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "handler gave up");
        assert!(no_delivery(&consumer, Duration::from_secs(120)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letters_keep_newest_within_max_msgs() {
        let stream = stream_with(|c| c.max_msgs = 2);
        let consumer = stream.subscribe("actions.email", "email-executor").await.unwrap();

        for payload in ["a", "b", "c"] {
            stream.publish("actions.email", payload.as_bytes().to_vec()).await.unwrap();
            let d = consumer.next().await.unwrap();
            consumer.term(&d, "rejected").await.unwrap();
        }

        let dead = stream.dead_letters("email-executor").await.unwrap();
        let payloads: Vec<&str> = dead.iter().map(|d| d.payload.as_str()).collect();
        assert_eq!(payloads, ["b", "c"]);
        let info = stream.stream_info().await.unwrap();
        assert_eq!(info.consumers[0].dead_letters, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_competing_consumers_split_messages() {
        let stream = InMemoryStream::default();
        let a = stream.subscribe("actions.email", "email-executor").await.unwrap();
        let b = stream.subscribe("actions.email", "email-executor").await.unwrap();
        stream.publish("actions.email", b"1".to_vec()).await.unwrap();
        stream.publish("actions.email", b"2".to_vec()).await.unwrap();

        let da = a.next().await.unwrap();
        let db = b.next().await.unwrap();
        assert_ne!(da.seq, db.seq);
        a.ack(&da).await.unwrap();
        b.ack(&db).await.unwrap();
        assert_eq!(stream.stream_info().await.unwrap().messages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_retained_until_every_interested_consumer_acks() {
        let stream = InMemoryStream::default();
        let email = stream.subscribe("actions.email", "email-executor").await.unwrap();
        let audit = stream.subscribe("actions.>", "audit").await.unwrap();
        stream.publish("actions.email", b"x".to_vec()).await.unwrap();

        let d = email.next().await.unwrap();
        email.ack(&d).await.unwrap();
        assert_eq!(stream.stream_info().await.unwrap().messages, 1);

        let d = audit.next().await.unwrap();
        audit.ack(&d).await.unwrap();
        assert_eq!(stream.stream_info().await.unwrap().messages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_without_interest_wait_for_consumer() {
        let stream = InMemoryStream::default();
        stream.publish("actions.email", b"early".to_vec()).await.unwrap();
        assert_eq!(stream.stream_info().await.unwrap().messages, 1);

        let consumer = stream.subscribe("actions.email", "email-executor").await.unwrap();
        let d = consumer.next().await.unwrap();
        assert_eq!(d.payload, b"early");
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_age_expires_messages() {
        let stream = stream_with(|c| c.max_age_secs = 60);
        stream.publish("events.customer.created", b"x".to_vec()).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(stream.stream_info().await.unwrap().messages, 0);
    }

    #[tokio::test]
    async fn test_storage_full_is_retryable() {
        let stream = stream_with(|c| c.max_msgs = 1);
        stream.publish("actions.email", b"1".to_vec()).await.unwrap();
        let err = stream.publish("actions.email", b"2".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChannelError::StorageFull(_)));
        assert!(err.is_retryable());

        let stream = stream_with(|c| c.max_bytes = 4);
        let err = stream.publish("actions.email", b"12345".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChannelError::StorageFull(_)));
    }

    #[tokio::test]
    async fn test_durable_filter_conflict() {
        let stream = InMemoryStream::default();
        stream.subscribe("actions.email", "d").await.unwrap();
        assert!(stream.subscribe("actions.email", "d").await.is_ok());
        let err = stream.subscribe("actions.webhook", "d").await.err().unwrap();
        assert!(matches!(err, ChannelError::ConsumerConflict { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_info_counts() {
        let stream = InMemoryStream::default();
        let consumer = stream.subscribe("actions.email", "email-executor").await.unwrap();
        stream.publish("actions.email", b"1".to_vec()).await.unwrap();
        stream.publish("actions.email", b"22".to_vec()).await.unwrap();
        stream.publish("actions.webhook", b"333".to_vec()).await.unwrap();

        let _d = consumer.next().await.unwrap();
        let info = stream.stream_info().await.unwrap();
        assert_eq!(info.messages, 3);
        assert_eq!(info.bytes, 6);
        assert_eq!(info.first_seq, Some(1));
        assert_eq!(info.last_seq, Some(3));
        assert_eq!(info.consumers.len(), 1);
        assert_eq!(info.consumers[0].in_flight, 1);
        assert_eq!(info.consumers[0].pending, 1);
        assert_eq!(info.consumers[0].dead_letters, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_consumer_woken_by_publish() {
        let stream = InMemoryStream::default();
        let consumer = stream.subscribe("actions.email", "email-executor").await.unwrap();

        let publisher = stream.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            publisher.publish("actions.email", b"late".to_vec()).await.unwrap();
        });

        let d = consumer.next().await.unwrap();
        assert_eq!(d.payload, b"late");
        handle.await.unwrap();
    }
}
