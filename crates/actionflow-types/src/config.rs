//! Configuration types for Actionflow.
//!
//! `ActionflowConfig` represents the `actionflow.toml` file that controls the
//! stream, the trigger server, the catalog and entity collaborators, and the
//! per-type executor settings. Every field has a default so an empty (or
//! absent) file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ActionflowConfig {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub entity: EntityConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub executors: ExecutorsConfig,
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// Durable stream settings shared by every stream backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// SQLite database file. Defaults to `<data_dir>/stream.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Subject filters captured by the stream.
    #[serde(default = "default_subjects")]
    pub subjects: Vec<String>,

    /// Seconds a delivery may stay unacknowledged before redelivery.
    #[serde(default = "default_ack_wait_secs")]
    pub ack_wait_secs: u64,

    /// Maximum deliveries per message per consumer before dead-lettering.
    #[serde(default = "default_max_deliver")]
    pub max_deliver: u32,

    /// Nak delays in seconds, indexed by `min(attempt - 1, len - 1)`.
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: Vec<u64>,

    /// Retention bounds. Zero disables the bound.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    #[serde(default = "default_max_msgs")]
    pub max_msgs: u64,

    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// How often idle consumers re-check the store.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_subjects() -> Vec<String> {
    vec!["actions.>".to_string(), "events.>".to_string()]
}

fn default_ack_wait_secs() -> u64 {
    30
}

fn default_max_deliver() -> u32 {
    5
}

fn default_backoff_secs() -> Vec<u64> {
    vec![1, 5, 30]
}

fn default_max_age_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_max_msgs() -> u64 {
    1_000_000
}

fn default_max_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            subjects: default_subjects(),
            ack_wait_secs: default_ack_wait_secs(),
            max_deliver: default_max_deliver(),
            backoff_secs: default_backoff_secs(),
            max_age_secs: default_max_age_secs(),
            max_msgs: default_max_msgs(),
            max_bytes: default_max_bytes(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl StreamConfig {
    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Backoff before the next delivery after `attempt` failed.
    ///
    /// `attempt` is 1-based. An empty schedule means immediate redelivery.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if self.backoff_secs.is_empty() {
            return Duration::ZERO;
        }
        let idx = (attempt.saturating_sub(1) as usize).min(self.backoff_secs.len() - 1);
        Duration::from_secs(self.backoff_secs[idx])
    }
}

// ---------------------------------------------------------------------------
// Server / collaborators
// ---------------------------------------------------------------------------

/// Trigger HTTP server bind address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where workflow definitions and action templates come from.
///
/// `file` wins over `base_url` when both are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            file: None,
            base_url: None,
            timeout_secs: default_client_timeout_secs(),
        }
    }
}

/// Entity lookup service. Without a `base_url` the trigger attributes are
/// the whole snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_client_timeout_secs(),
        }
    }
}

fn default_client_timeout_secs() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Executor runtime settings common to all action types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    /// Concurrent consume loops per process.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Completed task ids remembered for deduplication.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

fn default_workers() -> usize {
    1
}

fn default_dedup_capacity() -> usize {
    10_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

/// Per-action-type handler settings.
#[derive(Debug, Default, Deserialize)]
pub struct ExecutorsConfig {
    #[serde(default)]
    pub webhook: WebhookExecutorConfig,
    #[serde(default)]
    pub email: EmailExecutorConfig,
    #[serde(default)]
    pub custom_api_call: ApiCallExecutorConfig,
}

#[derive(Debug, Deserialize)]
pub struct WebhookExecutorConfig {
    #[serde(default = "default_handler_timeout_secs")]
    pub timeout_secs: u64,
    /// When set, requests carry an HMAC-SHA256 signature header.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub signing_secret: Option<SecretString>,
}

impl Default for WebhookExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_handler_timeout_secs(),
            signing_secret: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailExecutorConfig {
    /// HTTP mail relay endpoint. Unset means simulation mode.
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_from")]
    pub default_from: String,
    #[serde(default = "default_handler_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_from() -> String {
    "noreply@actionflow.local".to_string()
}

impl Default for EmailExecutorConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            api_key: None,
            default_from: default_from(),
            timeout_secs: default_handler_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiCallExecutorConfig {
    /// Base URL the template `path` is appended to. Unset means simulation mode.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub bearer_token: Option<SecretString>,
    #[serde(default = "default_handler_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiCallExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            bearer_token: None,
            timeout_secs: default_handler_timeout_secs(),
        }
    }
}

fn default_handler_timeout_secs() -> u64 {
    30
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}
