//! Dispatch outcome of one workflow trigger.

use actionflow_types::action::ActionType;
use actionflow_types::error::{CatalogError, EntityError};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Step outcomes
// ---------------------------------------------------------------------------

/// A step whose task reached the stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedStep {
    pub step_index: usize,
    pub action_template_id: String,
    pub action_type: ActionType,
    pub task_id: Uuid,
    pub subject: String,
    pub stream_seq: u64,
}

/// Why a step could not be dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailureKind {
    TemplateNotFound,
    Validation { reason: String },
    Catalog { reason: String },
    Publish { reason: String, retryable: bool },
}

/// A step that was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub step_index: usize,
    pub action_template_id: String,
    #[serde(flatten)]
    pub kind: StepFailureKind,
}

impl StepFailure {
    /// Retrying the trigger later could plausibly dispatch this step.
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            StepFailureKind::Publish { retryable, .. } => *retryable,
            StepFailureKind::Catalog { .. } => true,
            StepFailureKind::TemplateNotFound | StepFailureKind::Validation { .. } => false,
        }
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {} ({}): ", self.step_index, self.action_template_id)?;
        match &self.kind {
            StepFailureKind::TemplateNotFound => write!(f, "action template not found"),
            StepFailureKind::Validation { reason } => write!(f, "validation failed: {reason}"),
            StepFailureKind::Catalog { reason } => write!(f, "catalog error: {reason}"),
            StepFailureKind::Publish { reason, .. } => write!(f, "publish failed: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchReport
// ---------------------------------------------------------------------------

/// Everything that happened while dispatching one trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchReport {
    pub trigger_id: Uuid,
    pub workflow_id: String,
    pub published: Vec<PublishedStep>,
    pub failures: Vec<StepFailure>,
}

impl DispatchReport {
    pub fn new(trigger_id: Uuid, workflow_id: impl Into<String>) -> Self {
        Self {
            trigger_id,
            workflow_id: workflow_id.into(),
            published: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Every step was published.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn has_retryable_failure(&self) -> bool {
        self.failures.iter().any(StepFailure::is_retryable)
    }

    pub fn failed_step_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.step_index).collect()
    }

    /// Convert a partially failed report into `OrchestratorError::StepsFailed`.
    pub fn into_result(self) -> Result<DispatchReport, OrchestratorError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(OrchestratorError::StepsFailed(Box::new(self)))
        }
    }
}

// ---------------------------------------------------------------------------
// OrchestratorError
// ---------------------------------------------------------------------------

/// Errors surfaced to whoever triggered a workflow.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No enabled workflow resolves, or the trigger's entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("entity resolution failed: {0}")]
    Entity(EntityError),

    #[error("{} of {} steps failed for workflow '{}'",
        .0.failures.len(),
        .0.failures.len() + .0.published.len(),
        .0.workflow_id)]
    StepsFailed(Box<DispatchReport>),
}

impl From<EntityError> for OrchestratorError {
    fn from(err: EntityError) -> Self {
        match err {
            EntityError::NotFound { .. } => OrchestratorError::NotFound(err.to_string()),
            other => OrchestratorError::Entity(other),
        }
    }
}
