//! Durable message channel abstraction.
//!
//! A stream captures every subject matching its configured filters. Durable
//! consumers bind a filter to a name; handles sharing a name compete for
//! messages. Deliveries must be acknowledged within `ack_wait` or they are
//! redelivered, up to `max_deliver` times, after which they are moved to the
//! consumer's dead-letter record.
//!
//! Two implementations share these semantics: [`memory::InMemoryStream`] here
//! and the SQLite-backed stream in `actionflow-infra`.

pub mod memory;
pub mod subject;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub use memory::InMemoryStream;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from message channel operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// No stream captures the subject. Permanent.
    #[error("no stream captures subject '{0}'")]
    NoStream(String),

    /// `max_msgs` or `max_bytes` would be exceeded. Retryable.
    #[error("stream storage full: {0}")]
    StorageFull(String),

    #[error("invalid subject '{0}'")]
    InvalidSubject(String),

    /// A durable already exists with a different filter.
    #[error("consumer '{durable}' already bound to '{existing}'")]
    ConsumerConflict { durable: String, existing: String },

    /// The backing store failed or is unreachable. Retryable.
    #[error("stream storage error: {0}")]
    Storage(String),
}

impl ChannelError {
    /// Whether a caller may reasonably retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChannelError::StorageFull(_) | ChannelError::Storage(_))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Acknowledgement of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublishAck {
    /// Stream sequence assigned to the message.
    pub seq: u64,
}

/// A message handed to a durable consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub seq: u64,
    pub subject: String,
    pub payload: Vec<u8>,
    /// 1-based delivery count for this consumer.
    pub attempt: u32,
    pub published_at: DateTime<Utc>,
}

/// A message a consumer gave up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub seq: u64,
    pub subject: String,
    pub payload: String,
    pub attempts: u32,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}

/// Snapshot of stream occupancy and consumer progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub subjects: Vec<String>,
    pub messages: u64,
    pub bytes: u64,
    pub first_seq: Option<u64>,
    pub last_seq: Option<u64>,
    pub consumers: Vec<ConsumerInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerInfo {
    pub durable: String,
    pub filter: String,
    /// Matching messages waiting for delivery (including those backing off).
    pub pending: u64,
    pub in_flight: u64,
    pub dead_letters: u64,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A durable, subject-addressed message stream.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait MessageChannel: Send + Sync {
    type Consumer: DurableConsumer + 'static;

    /// Append a message. Fails with `NoStream` if no stream filter captures
    /// `subject`, or `StorageFull` when limits would be exceeded.
    fn publish(
        &self,
        subject: &str,
        payload: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<PublishAck, ChannelError>> + Send;

    /// Bind (or re-bind) a durable consumer and return a handle to it.
    ///
    /// Every handle with the same `durable` competes for the same messages.
    fn subscribe(
        &self,
        filter: &str,
        durable: &str,
    ) -> impl std::future::Future<Output = Result<Self::Consumer, ChannelError>> + Send;

    fn stream_info(
        &self,
    ) -> impl std::future::Future<Output = Result<StreamInfo, ChannelError>> + Send;

    fn dead_letters(
        &self,
        durable: &str,
    ) -> impl std::future::Future<Output = Result<Vec<DeadLetter>, ChannelError>> + Send;
}

/// One handle on a durable consumer.
pub trait DurableConsumer: Send + Sync {
    /// Wait for the next deliverable message and mark it in flight.
    fn next(&self) -> impl std::future::Future<Output = Result<Delivery, ChannelError>> + Send;

    /// Mark the message processed; it is never redelivered to this consumer.
    fn ack(
        &self,
        delivery: &Delivery,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Release the message for redelivery after `delay`. Once the delivery
    /// count has reached `max_deliver` the message is dead-lettered instead.
    fn nak(
        &self,
        delivery: &Delivery,
        delay: Duration,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Stop delivery and move the message to this consumer's dead letters.
    fn term(
        &self,
        delivery: &Delivery,
        reason: &str,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    fn durable(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ChannelError::StorageFull("max_msgs".into()).is_retryable());
        assert!(ChannelError::Storage("disk".into()).is_retryable());
        assert!(!ChannelError::NoStream("x.y".into()).is_retryable());
        assert!(!ChannelError::InvalidSubject("".into()).is_retryable());
    }
}
