//! SQLite implementation of the durable message stream.
//!
//! Messages, durable consumers and per-consumer delivery state live in the
//! `stream_*` tables, so a stream survives restarts and can be shared by the
//! API process and any number of executor processes pointed at the same file.
//!
//! Every state transition is a single conditional statement on the writer
//! pool (`INSERT .. ON CONFLICT DO NOTHING`, `UPDATE .. WHERE state = ..`)
//! whose `rows_affected` decides who won. Competing handles, in this process
//! or another, therefore never claim the same delivery twice. Consumers in
//! this process are woken on publish; other processes notice new messages on
//! the next poll.
//!
//! Times are wall-clock milliseconds. `max_msgs`/`max_bytes` are checked
//! before insert and are soft limits when several processes publish at once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actionflow_core::channel::subject::{matches, matches_any, validate_filter, validate_subject};
use actionflow_core::channel::{
    ChannelError, ConsumerInfo, DeadLetter, Delivery, DurableConsumer, MessageChannel, PublishAck,
    StreamInfo,
};
use actionflow_types::config::StreamConfig;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tokio::sync::Notify;

use super::pool::DatabasePool;

/// Candidate rows scanned per claim query.
const CLAIM_PAGE: i64 = 64;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

struct DeadLetterRow {
    seq: i64,
    subject: String,
    payload: Vec<u8>,
    attempts: i64,
    reason: String,
    dead_at: String,
}

impl DeadLetterRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            seq: row.try_get("seq")?,
            subject: row.try_get("subject")?,
            payload: row.try_get("payload")?,
            attempts: row.try_get("attempts")?,
            reason: row.try_get("reason")?,
            dead_at: row.try_get("dead_at")?,
        })
    }

    fn into_dead_letter(self) -> Result<DeadLetter, ChannelError> {
        Ok(DeadLetter {
            seq: self.seq as u64,
            subject: self.subject,
            payload: String::from_utf8_lossy(&self.payload).into_owned(),
            attempts: self.attempts.max(0) as u32,
            reason: self.reason,
            dead_at: parse_datetime(&self.dead_at)?,
        })
    }
}

/// A message a consumer may try to claim.
struct Candidate {
    seq: i64,
    subject: String,
    attempts: Option<i64>,
}

impl Candidate {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            seq: row.try_get("seq")?,
            subject: row.try_get("subject")?,
            attempts: row.try_get("attempts")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage_err(e: sqlx::Error) -> ChannelError {
    ChannelError::Storage(e.to_string())
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, ChannelError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ChannelError::Storage(format!("invalid datetime '{s}': {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// `LIKE` pattern covering every subject `filter` can match.
///
/// Only the literal tokens before the first wildcard narrow the scan; exact
/// matching still goes through [`matches`].
fn like_pattern(filter: &str) -> String {
    let tokens: Vec<&str> = filter.split('.').collect();
    let literal = tokens
        .iter()
        .take_while(|t| **t != "*" && **t != ">")
        .count();
    let prefix = if literal == tokens.len() {
        filter.to_string()
    } else if literal == 0 {
        String::new()
    } else {
        format!("{}.", tokens[..literal].join("."))
    };

    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

// ---------------------------------------------------------------------------
// Shared store
// ---------------------------------------------------------------------------

struct Store {
    pool: DatabasePool,
    config: StreamConfig,
    notify: Notify,
}

impl Store {
    /// Drop messages older than `max_age`. Their delivery rows cascade.
    async fn purge_expired(&self, now: i64) -> Result<(), ChannelError> {
        if self.config.max_age_secs == 0 {
            return Ok(());
        }
        let cutoff = now.saturating_sub(duration_ms(self.config.max_age()));
        let result = sqlx::query("DELETE FROM stream_messages WHERE published_ms <= ?")
            .bind(cutoff)
            .execute(&self.pool.writer)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() > 0 {
            tracing::debug!(removed = result.rows_affected(), "expired aged messages");
        }
        Ok(())
    }

    /// Time out overdue in-flight deliveries of `durable`.
    async fn reap_deliveries(&self, durable: &str, now: i64) -> Result<(), ChannelError> {
        let max_deliver = i64::from(self.config.max_deliver);

        let exhausted = sqlx::query(
            "SELECT seq, attempts FROM stream_deliveries \
             WHERE durable = ? AND state = 'inflight' AND deadline_ms <= ? AND attempts >= ?",
        )
        .bind(durable)
        .bind(now)
        .bind(max_deliver)
        .fetch_all(&self.pool.writer)
        .await
        .map_err(storage_err)?;
        for row in &exhausted {
            let seq: i64 = row.try_get("seq").map_err(storage_err)?;
            let attempts: i64 = row.try_get("attempts").map_err(storage_err)?;
            self.dead_letter(
                durable,
                seq,
                Some(attempts),
                "ack wait expired after max deliveries",
            )
            .await?;
        }

        sqlx::query(
            "UPDATE stream_deliveries SET state = 'pending', available_ms = ? \
             WHERE durable = ? AND state = 'inflight' AND deadline_ms <= ? AND attempts < ?",
        )
        .bind(now)
        .bind(durable)
        .bind(now)
        .bind(max_deliver)
        .execute(&self.pool.writer)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    /// Claim the oldest deliverable message for `durable`.
    async fn claim(
        &self,
        durable: &str,
        filter: &str,
        pattern: &str,
        now: i64,
    ) -> Result<Option<Delivery>, ChannelError> {
        let deadline = now.saturating_add(duration_ms(self.config.ack_wait()));
        let mut cursor = 0_i64;

        loop {
            let rows = sqlx::query(
                r"SELECT m.seq, m.subject, d.attempts
                  FROM stream_messages m
                  LEFT JOIN stream_deliveries d ON d.seq = m.seq AND d.durable = ?
                  WHERE m.seq > ?
                    AND m.subject LIKE ? ESCAPE '\'
                    AND (d.state IS NULL OR (d.state = 'pending' AND d.available_ms <= ?))
                  ORDER BY m.seq
                  LIMIT ?",
            )
            .bind(durable)
            .bind(cursor)
            .bind(pattern)
            .bind(now)
            .bind(CLAIM_PAGE)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(storage_err)?;

            if rows.is_empty() {
                return Ok(None);
            }
            let page_len = rows.len() as i64;

            for row in &rows {
                let candidate = Candidate::from_row(row).map_err(storage_err)?;
                cursor = candidate.seq;
                if !matches(filter, &candidate.subject) {
                    continue;
                }

                let (result, attempt) = match candidate.attempts {
                    None => (
                        sqlx::query(
                            "INSERT INTO stream_deliveries \
                               (durable, seq, attempts, state, available_ms, deadline_ms) \
                             SELECT ?, seq, 1, 'inflight', ?, ? FROM stream_messages WHERE seq = ? \
                             ON CONFLICT (durable, seq) DO NOTHING",
                        )
                        .bind(durable)
                        .bind(now)
                        .bind(deadline)
                        .bind(candidate.seq)
                        .execute(&self.pool.writer)
                        .await,
                        1,
                    ),
                    Some(attempts) => (
                        sqlx::query(
                            "UPDATE stream_deliveries \
                             SET state = 'inflight', attempts = attempts + 1, deadline_ms = ? \
                             WHERE durable = ? AND seq = ? AND state = 'pending' \
                               AND attempts = ? AND available_ms <= ?",
                        )
                        .bind(deadline)
                        .bind(durable)
                        .bind(candidate.seq)
                        .bind(attempts)
                        .bind(now)
                        .execute(&self.pool.writer)
                        .await,
                        attempts + 1,
                    ),
                };
                if result.map_err(storage_err)?.rows_affected() == 0 {
                    // Another handle got there first.
                    continue;
                }

                let Some(message) = sqlx::query(
                    "SELECT subject, payload, published_at FROM stream_messages WHERE seq = ?",
                )
                .bind(candidate.seq)
                .fetch_optional(&self.pool.writer)
                .await
                .map_err(storage_err)?
                else {
                    continue;
                };

                let published_at: String = message.try_get("published_at").map_err(storage_err)?;
                return Ok(Some(Delivery {
                    seq: candidate.seq as u64,
                    subject: message.try_get("subject").map_err(storage_err)?,
                    payload: message.try_get("payload").map_err(storage_err)?,
                    attempt: attempt.max(1) as u32,
                    published_at: parse_datetime(&published_at)?,
                }));
            }

            if page_len < CLAIM_PAGE {
                return Ok(None);
            }
        }
    }

    /// Move a tracked delivery to the dead letters.
    ///
    /// With `expected_attempts` set, only a delivery still in flight at that
    /// attempt is moved, so a stale handle cannot dead-letter a redelivery.
    /// Returns whether this call performed the transition.
    async fn dead_letter(
        &self,
        durable: &str,
        seq: i64,
        expected_attempts: Option<i64>,
        reason: &str,
    ) -> Result<bool, ChannelError> {
        let mut tx = self.pool.writer.begin().await.map_err(storage_err)?;

        let moved = match expected_attempts {
            Some(attempts) => sqlx::query(
                "UPDATE stream_deliveries SET state = 'done' \
                 WHERE durable = ? AND seq = ? AND state = 'inflight' AND attempts = ? \
                 RETURNING attempts",
            )
            .bind(durable)
            .bind(seq)
            .bind(attempts),
            None => sqlx::query(
                "UPDATE stream_deliveries SET state = 'done' \
                 WHERE durable = ? AND seq = ? AND state != 'done' \
                 RETURNING attempts",
            )
            .bind(durable)
            .bind(seq),
        }
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_err)?;

        let Some(row) = moved else {
            tx.rollback().await.map_err(storage_err)?;
            return Ok(false);
        };
        let attempts: i64 = row.try_get("attempts").map_err(storage_err)?;

        sqlx::query(
            "INSERT INTO stream_dead_letters (durable, seq, subject, payload, attempts, reason, dead_at) \
             SELECT ?, seq, subject, payload, ?, ?, ? FROM stream_messages WHERE seq = ?",
        )
        .bind(durable)
        .bind(attempts)
        .bind(reason)
        .bind(format_datetime(&Utc::now()))
        .bind(seq)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        tracing::warn!(durable, seq, attempts, reason, "message dead-lettered");

        self.release_if_settled(seq).await?;
        Ok(true)
    }

    /// Delete a message once every consumer whose filter captures it is done.
    async fn release_if_settled(&self, seq: i64) -> Result<(), ChannelError> {
        let Some(row) = sqlx::query("SELECT subject FROM stream_messages WHERE seq = ?")
            .bind(seq)
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(storage_err)?
        else {
            return Ok(());
        };
        let subject: String = row.try_get("subject").map_err(storage_err)?;

        let consumers = sqlx::query(
            "SELECT c.filter, d.state FROM stream_consumers c \
             LEFT JOIN stream_deliveries d ON d.durable = c.durable AND d.seq = ?",
        )
        .bind(seq)
        .fetch_all(&self.pool.writer)
        .await
        .map_err(storage_err)?;

        let mut interested = false;
        for row in &consumers {
            let filter: String = row.try_get("filter").map_err(storage_err)?;
            if !matches(&filter, &subject) {
                continue;
            }
            interested = true;
            let state: Option<String> = row.try_get("state").map_err(storage_err)?;
            if state.as_deref() != Some("done") {
                return Ok(());
            }
        }

        if interested {
            sqlx::query("DELETE FROM stream_messages WHERE seq = ?")
                .bind(seq)
                .execute(&self.pool.writer)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SqliteStream
// ---------------------------------------------------------------------------

/// Cloneable handle to a SQLite-backed stream.
#[derive(Clone)]
pub struct SqliteStream {
    store: Arc<Store>,
}

impl SqliteStream {
    pub fn new(pool: DatabasePool, config: StreamConfig) -> Self {
        Self {
            store: Arc::new(Store {
                pool,
                config,
                notify: Notify::new(),
            }),
        }
    }

    /// Open the stream database at `path`, creating and migrating it if needed.
    pub async fn open(path: &Path, config: StreamConfig) -> Result<Self, ChannelError> {
        let pool = DatabasePool::open(path).await.map_err(storage_err)?;
        tracing::debug!(path = %path.display(), "opened stream database");
        Ok(Self::new(pool, config))
    }

    pub fn config(&self) -> &StreamConfig {
        &self.store.config
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.store.pool
    }
}

impl MessageChannel for SqliteStream {
    type Consumer = SqliteConsumer;

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, ChannelError> {
        validate_subject(subject)?;
        let store = &self.store;
        let config = &store.config;
        if !matches_any(&config.subjects, subject) {
            return Err(ChannelError::NoStream(subject.to_string()));
        }

        let now = Utc::now();
        store.purge_expired(now.timestamp_millis()).await?;

        if config.max_msgs > 0 || config.max_bytes > 0 {
            let usage = sqlx::query(
                "SELECT COUNT(*) AS messages, COALESCE(SUM(size), 0) AS bytes FROM stream_messages",
            )
            .fetch_one(&store.pool.writer)
            .await
            .map_err(storage_err)?;
            let messages: i64 = usage.try_get("messages").map_err(storage_err)?;
            let bytes: i64 = usage.try_get("bytes").map_err(storage_err)?;

            if config.max_msgs > 0 && messages.max(0) as u64 >= config.max_msgs {
                return Err(ChannelError::StorageFull(format!(
                    "max_msgs {} reached",
                    config.max_msgs
                )));
            }
            if config.max_bytes > 0 && bytes.max(0) as u64 + payload.len() as u64 > config.max_bytes
            {
                return Err(ChannelError::StorageFull(format!(
                    "max_bytes {} would be exceeded",
                    config.max_bytes
                )));
            }
        }

        let size = payload.len() as i64;
        let result = sqlx::query(
            "INSERT INTO stream_messages (subject, payload, size, published_at, published_ms) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(subject)
        .bind(payload)
        .bind(size)
        .bind(format_datetime(&now))
        .bind(now.timestamp_millis())
        .execute(&store.pool.writer)
        .await
        .map_err(storage_err)?;

        let seq = result.last_insert_rowid() as u64;
        store.notify.notify_waiters();
        tracing::trace!(subject, seq, "published");
        Ok(PublishAck { seq })
    }

    async fn subscribe(&self, filter: &str, durable: &str) -> Result<SqliteConsumer, ChannelError> {
        validate_filter(filter)?;
        if durable.is_empty() {
            return Err(ChannelError::InvalidSubject("empty durable name".to_string()));
        }
        let writer = &self.store.pool.writer;

        let inserted = sqlx::query(
            "INSERT INTO stream_consumers (durable, filter, created_at) VALUES (?, ?, ?) \
             ON CONFLICT (durable) DO NOTHING",
        )
        .bind(durable)
        .bind(filter)
        .bind(format_datetime(&Utc::now()))
        .execute(writer)
        .await
        .map_err(storage_err)?;

        if inserted.rows_affected() == 1 {
            tracing::debug!(durable, filter, "registered durable consumer");
        } else {
            let existing: String =
                sqlx::query_scalar("SELECT filter FROM stream_consumers WHERE durable = ?")
                    .bind(durable)
                    .fetch_one(writer)
                    .await
                    .map_err(storage_err)?;
            if existing != filter {
                return Err(ChannelError::ConsumerConflict {
                    durable: durable.to_string(),
                    existing,
                });
            }
        }

        Ok(SqliteConsumer {
            store: Arc::clone(&self.store),
            durable: durable.to_string(),
            filter: filter.to_string(),
            pattern: like_pattern(filter),
        })
    }

    async fn stream_info(&self) -> Result<StreamInfo, ChannelError> {
        let store = &self.store;
        store.purge_expired(now_ms()).await?;
        let writer = &store.pool.writer;

        let totals = sqlx::query(
            "SELECT COUNT(*) AS messages, COALESCE(SUM(size), 0) AS bytes, \
                    MIN(seq) AS first_seq, MAX(seq) AS last_seq \
             FROM stream_messages",
        )
        .fetch_one(writer)
        .await
        .map_err(storage_err)?;
        let messages: i64 = totals.try_get("messages").map_err(storage_err)?;
        let bytes: i64 = totals.try_get("bytes").map_err(storage_err)?;
        let first_seq: Option<i64> = totals.try_get("first_seq").map_err(storage_err)?;
        let last_seq: Option<i64> = totals.try_get("last_seq").map_err(storage_err)?;

        let registered: Vec<(String, String)> =
            sqlx::query_as("SELECT durable, filter FROM stream_consumers ORDER BY durable")
                .fetch_all(writer)
                .await
                .map_err(storage_err)?;

        let mut consumers = Vec::with_capacity(registered.len());
        for (durable, filter) in registered {
            let progress: Vec<(String, Option<String>)> = sqlx::query_as(
                "SELECT m.subject, d.state FROM stream_messages m \
                 LEFT JOIN stream_deliveries d ON d.seq = m.seq AND d.durable = ?",
            )
            .bind(&durable)
            .fetch_all(writer)
            .await
            .map_err(storage_err)?;

            let mut pending = 0;
            let mut in_flight = 0;
            for (subject, state) in &progress {
                if !matches(&filter, subject) {
                    continue;
                }
                match state.as_deref() {
                    Some("done") => {}
                    Some("inflight") => in_flight += 1,
                    _ => pending += 1,
                }
            }

            let dead: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM stream_dead_letters WHERE durable = ?")
                    .bind(&durable)
                    .fetch_one(writer)
                    .await
                    .map_err(storage_err)?;

            consumers.push(ConsumerInfo {
                durable,
                filter,
                pending,
                in_flight,
                dead_letters: dead.max(0) as u64,
            });
        }

        Ok(StreamInfo {
            subjects: store.config.subjects.clone(),
            messages: messages.max(0) as u64,
            bytes: bytes.max(0) as u64,
            first_seq: first_seq.map(|s| s as u64),
            last_seq: last_seq.map(|s| s as u64),
            consumers,
        })
    }

    async fn dead_letters(&self, durable: &str) -> Result<Vec<DeadLetter>, ChannelError> {
        let rows = sqlx::query(
            "SELECT seq, subject, payload, attempts, reason, dead_at \
             FROM stream_dead_letters WHERE durable = ? ORDER BY id",
        )
        .bind(durable)
        .fetch_all(&self.store.pool.reader)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                DeadLetterRow::from_row(row)
                    .map_err(storage_err)
                    .and_then(DeadLetterRow::into_dead_letter)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SqliteConsumer
// ---------------------------------------------------------------------------

/// One handle on a durable consumer of a [`SqliteStream`].
pub struct SqliteConsumer {
    store: Arc<Store>,
    durable: String,
    filter: String,
    pattern: String,
}

impl SqliteConsumer {
    async fn poll_once(&self) -> Result<Option<Delivery>, ChannelError> {
        let now = now_ms();
        self.store.purge_expired(now).await?;
        self.store.reap_deliveries(&self.durable, now).await?;
        self.store
            .claim(&self.durable, &self.filter, &self.pattern, now)
            .await
    }
}

impl DurableConsumer for SqliteConsumer {
    async fn next(&self) -> Result<Delivery, ChannelError> {
        loop {
            // Registered before polling so a local publish in between still wakes us.
            let notified = self.store.notify.notified();
            if let Some(delivery) = self.poll_once().await? {
                return Ok(delivery);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.store.config.poll_interval()) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let seq = delivery.seq as i64;
        sqlx::query(
            "UPDATE stream_deliveries SET state = 'done' \
             WHERE durable = ? AND seq = ? AND state != 'done'",
        )
        .bind(&self.durable)
        .bind(seq)
        .execute(&self.store.pool.writer)
        .await
        .map_err(storage_err)?;
        self.store.release_if_settled(seq).await
    }

    async fn nak(&self, delivery: &Delivery, delay: Duration) -> Result<(), ChannelError> {
        let seq = delivery.seq as i64;
        let attempt = i64::from(delivery.attempt);

        if delivery.attempt >= self.store.config.max_deliver {
            self.store
                .dead_letter(&self.durable, seq, Some(attempt), "max deliveries reached")
                .await?;
            return Ok(());
        }

        let available = now_ms().saturating_add(duration_ms(delay));
        // Stale handles (already redelivered elsewhere) match no row.
        sqlx::query(
            "UPDATE stream_deliveries SET state = 'pending', available_ms = ? \
             WHERE durable = ? AND seq = ? AND state = 'inflight' AND attempts = ?",
        )
        .bind(available)
        .bind(&self.durable)
        .bind(seq)
        .bind(attempt)
        .execute(&self.store.pool.writer)
        .await
        .map_err(storage_err)?;
        self.store.notify.notify_waiters();
        Ok(())
    }

    async fn term(&self, delivery: &Delivery, reason: &str) -> Result<(), ChannelError> {
        self.store
            .dead_letter(&self.durable, delivery.seq as i64, None, reason)
            .await?;
        Ok(())
    }

    fn durable(&self) -> &str {
        &self.durable
    }
}
