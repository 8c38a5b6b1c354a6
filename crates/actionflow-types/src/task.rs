//! The `Task` wire envelope published for every dispatched workflow step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::ActionType;
use crate::attribute::AttributeMap;

/// One unit of work derived from a single workflow step.
///
/// Serialized as JSON onto `actions.<action_type>`. A task is created at
/// publish time and never mutated afterwards; executors treat `task_id` as
/// the deduplication key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// UUIDv7, time-sortable.
    pub task_id: Uuid,
    pub workflow_id: String,
    /// Position of the originating step in the workflow's action sequence.
    pub step_index: usize,
    pub action_template_id: String,
    pub action_type: ActionType,
    /// Raw template content, re-decoded by the executor.
    pub template_content: serde_json::Value,
    /// Entity snapshot taken once per trigger. Absent when the trigger
    /// carried no entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<AttributeMap>,
    /// Rendered step parameters. Always present, possibly empty.
    #[serde(default)]
    pub params: AttributeMap,
    pub published_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with a fresh v7 id stamped now.
    pub fn new(
        workflow_id: impl Into<String>,
        step_index: usize,
        action_template_id: impl Into<String>,
        action_type: ActionType,
        template_content: serde_json::Value,
        entity: Option<AttributeMap>,
        params: AttributeMap,
    ) -> Self {
        Self {
            task_id: Uuid::now_v7(),
            workflow_id: workflow_id.into(),
            step_index,
            action_template_id: action_template_id.into(),
            action_type,
            template_content,
            entity,
            params,
            published_at: Utc::now(),
        }
    }

    /// Subject this task is published on.
    pub fn subject(&self) -> String {
        self.action_type.subject()
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
