//! Action handler trait and per-delivery outcome types.

use std::fmt;

use actionflow_types::action::{ActionContent, ActionType, ContentError};
use actionflow_types::task::Task;
use thiserror::Error;

use crate::render::{AddressError, RenderError};

/// What a handler did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The side effect reached its downstream target.
    Delivered,
    /// No downstream target is configured; the rendered output was logged.
    Simulated,
}

/// Handler failure, classified by whether redelivery could help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// Network error, timeout, remote 5xx/408/429, channel backpressure.
    #[error("transient: {0}")]
    Transient(String),

    /// Render error, invalid recipient, remote 4xx, undecodable task.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ActionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ActionError::Transient(_))
    }
}

impl From<RenderError> for ActionError {
    fn from(err: RenderError) -> Self {
        ActionError::Permanent(format!("render failed: {err}"))
    }
}

impl From<AddressError> for ActionError {
    fn from(err: AddressError) -> Self {
        ActionError::Permanent(err.to_string())
    }
}

impl From<ContentError> for ActionError {
    fn from(err: ContentError) -> Self {
        ActionError::Permanent(err.to_string())
    }
}

/// Executes tasks of one action type.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> ActionType;

    fn execute(
        &self,
        task: &Task,
    ) -> impl std::future::Future<Output = Result<ActionOutcome, ActionError>> + Send;
}

/// Decode a task's template content, checking it belongs to `expected`.
pub fn decode_content(task: &Task, expected: ActionType) -> Result<ActionContent, ActionError> {
    if task.action_type != expected {
        return Err(ActionError::Permanent(format!(
            "task {} is {} but handler serves {expected}",
            task.task_id, task.action_type
        )));
    }
    Ok(ActionContent::decode(task.action_type, &task.template_content)?)
}

/// Per-message state machine, logged as the runtime moves through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Rendering,
    Executing,
    Acked,
    NackRetry,
    NackDeadLetter,
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeliveryState::Received => "received",
            DeliveryState::Rendering => "rendering",
            DeliveryState::Executing => "executing",
            DeliveryState::Acked => "acked",
            DeliveryState::NackRetry => "nack_retry",
            DeliveryState::NackDeadLetter => "nack_dead_letter",
        })
    }
}
