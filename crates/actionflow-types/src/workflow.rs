//! Workflow domain types.
//!
//! A `WorkflowDefinition` is owned by the external metadata catalog; the
//! orchestrator only reads it. Its `action_sequence` is an ordered list of
//! steps, and that order is preserved from parse through dispatch.

use serde::{Deserialize, Serialize};

use crate::attribute::AttributeMap;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A declarative workflow: an ordered sequence of action steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    /// Opaque catalog identifier.
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Disabled workflows do not resolve for triggering.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ordered steps. Index in this vector is the step index on the wire.
    #[serde(default)]
    pub action_sequence: Vec<ActionStep>,
}

fn default_enabled() -> bool {
    true
}

/// One step of a workflow: a reference to an action template plus the
/// parameters that become the `Params` context when rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionStep {
    /// ID of the `ActionTemplate` this step executes.
    pub action_template_id: String,
    /// Step-level parameters. String values may themselves reference
    /// `Entity` fields and are rendered at dispatch time.
    #[serde(default)]
    pub parameters: AttributeMap,
}

// ---------------------------------------------------------------------------
// Trigger payload
// ---------------------------------------------------------------------------

/// Input supplied by whoever triggers a workflow (HTTP caller, CLI, scheduler).
///
/// When `entity_type`/`entity_id` are present the entity resolver looks the
/// entity up; `attributes` are merged on top of (or stand in for) the
/// resolved snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl TriggerPayload {
    /// Whether this trigger refers to an entity at all.
    ///
    /// A trigger with neither an entity reference nor attributes carries no
    /// entity, and templates referencing `Entity` will fail to render.
    pub fn has_entity(&self) -> bool {
        self.entity_id.is_some() || !self.attributes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeValue;

    #[test]
    fn test_definition_defaults() {
        let json = r#"{"id": "wf-1", "name": "onboarding"}"#;
        let def: WorkflowDefinition = serde_json::from_str(json).unwrap();
        assert!(def.enabled);
        assert!(def.action_sequence.is_empty());
        assert!(def.description.is_none());
    }

    #[test]
    fn test_action_sequence_order_preserved() {
        let json = r#"{
            "id": "wf-1",
            "name": "onboarding",
            "action_sequence": [
                {"action_template_id": "t-3"},
                {"action_template_id": "t-1", "parameters": {"cc": "ops@x.com"}},
                {"action_template_id": "t-2"}
            ]
        }"#;
        let def: WorkflowDefinition = serde_json::from_str(json).unwrap();
        let ids: Vec<&str> = def
            .action_sequence
            .iter()
            .map(|s| s.action_template_id.as_str())
            .collect();
        assert_eq!(ids, vec!["t-3", "t-1", "t-2"]);
        assert_eq!(
            def.action_sequence[1].parameters.get("cc"),
            Some(&AttributeValue::from("ops@x.com"))
        );
    }

    #[test]
    fn test_trigger_has_entity() {
        assert!(!TriggerPayload::default().has_entity());

        let by_id = TriggerPayload {
            entity_type: Some("customer".to_string()),
            entity_id: Some("c-1".to_string()),
            ..Default::default()
        };
        assert!(by_id.has_entity());

        let mut by_attrs = TriggerPayload::default();
        by_attrs.attributes.insert("name".to_string(), "Acme".into());
        assert!(by_attrs.has_entity());
    }
}
