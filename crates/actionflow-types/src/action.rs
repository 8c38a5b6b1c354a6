//! Action templates and their type-specific content.
//!
//! The catalog stores `template_content` as an untyped JSON object. The
//! orchestrator decodes it with [`ActionContent::decode`] before publishing so
//! that malformed templates fail at dispatch time (per step) instead of
//! bouncing around the stream; executors decode it again on receipt.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Subject prefix under which every action task is published.
pub const ACTION_SUBJECT_PREFIX: &str = "actions";

// ---------------------------------------------------------------------------
// ActionType
// ---------------------------------------------------------------------------

/// The kind of side effect an action template performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Webhook,
    Email,
    NatsPublish,
    CustomApiCall,
}

impl ActionType {
    /// All supported action types, in a stable order.
    pub const ALL: [ActionType; 4] = [
        ActionType::Webhook,
        ActionType::Email,
        ActionType::NatsPublish,
        ActionType::CustomApiCall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Webhook => "webhook",
            ActionType::Email => "email",
            ActionType::NatsPublish => "nats_publish",
            ActionType::CustomApiCall => "custom_api_call",
        }
    }

    /// The subject tasks of this type are published on (`actions.<type>`).
    pub fn subject(&self) -> String {
        format!("{ACTION_SUBJECT_PREFIX}.{}", self.as_str())
    }

    /// Default durable consumer name for executors of this type.
    pub fn default_durable(&self) -> String {
        format!("{}-executor", self.as_str().replace('_', "-"))
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(ActionType::Webhook),
            "email" => Ok(ActionType::Email),
            "nats_publish" => Ok(ActionType::NatsPublish),
            "custom_api_call" => Ok(ActionType::CustomApiCall),
            other => Err(ContentError::UnsupportedActionType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionTemplate
// ---------------------------------------------------------------------------

/// A reusable, parameterized definition of one side-effecting action.
///
/// `action_type` is kept as the raw catalog string: an unknown type is a
/// per-step validation failure, not a deserialization failure of the whole
/// catalog response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionTemplate {
    pub id: String,
    pub action_type: String,
    #[serde(default)]
    pub template_content: serde_json::Value,
}

impl ActionTemplate {
    /// Parse and validate this template into its typed form.
    pub fn decode(&self) -> Result<(ActionType, ActionContent), ContentError> {
        let action_type: ActionType = self.action_type.parse()?;
        let content = ActionContent::decode(action_type, &self.template_content)?;
        Ok((action_type, content))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Template content could not be interpreted.
#[derive(Debug, Error, PartialEq)]
pub enum ContentError {
    #[error("unsupported action type '{0}'")]
    UnsupportedActionType(String),

    #[error("malformed {action_type} template content: {reason}")]
    Malformed { action_type: ActionType, reason: String },
}

// ---------------------------------------------------------------------------
// Typed content
// ---------------------------------------------------------------------------

/// Email body content type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    #[default]
    Plain,
    Html,
}

impl BodyType {
    pub fn mime_type(&self) -> &'static str {
        match self {
            BodyType::Plain => "text/plain",
            BodyType::Html => "text/html",
        }
    }
}

/// Email action: every string field is a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailContent {
    pub subject: String,
    pub body: String,
    /// Comma-separated recipient template.
    pub recipients: String,
    #[serde(default, alias = "bodyType")]
    pub body_type: BodyType,
    /// Overrides the executor's default sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

/// Outbound HTTP call to a URL given by the template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookContent {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Call against the executor's configured API base URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiCallContent {
    /// Path template appended to the configured base URL.
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Re-publish a rendered payload onto another subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishContent {
    pub subject: String,
    pub payload: String,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Decoded, type-specific template content.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionContent {
    Webhook(WebhookContent),
    Email(EmailContent),
    NatsPublish(PublishContent),
    CustomApiCall(ApiCallContent),
}

impl ActionContent {
    /// Decode raw template content for the given action type.
    pub fn decode(
        action_type: ActionType,
        raw: &serde_json::Value,
    ) -> Result<Self, ContentError> {
        let malformed = |reason: String| ContentError::Malformed {
            action_type,
            reason,
        };

        let content = match action_type {
            ActionType::Webhook => {
                let c: WebhookContent =
                    serde_json::from_value(raw.clone()).map_err(|e| malformed(e.to_string()))?;
                check_method(&c.method).map_err(malformed)?;
                ActionContent::Webhook(c)
            }
            ActionType::Email => {
                let c: EmailContent =
                    serde_json::from_value(raw.clone()).map_err(|e| malformed(e.to_string()))?;
                if c.recipients.trim().is_empty() {
                    return Err(malformed("recipients template is empty".to_string()));
                }
                ActionContent::Email(c)
            }
            ActionType::NatsPublish => {
                let c: PublishContent =
                    serde_json::from_value(raw.clone()).map_err(|e| malformed(e.to_string()))?;
                if c.subject.trim().is_empty() {
                    return Err(malformed("subject template is empty".to_string()));
                }
                ActionContent::NatsPublish(c)
            }
            ActionType::CustomApiCall => {
                let c: ApiCallContent =
                    serde_json::from_value(raw.clone()).map_err(|e| malformed(e.to_string()))?;
                check_method(&c.method).map_err(malformed)?;
                ActionContent::CustomApiCall(c)
            }
        };
        Ok(content)
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            ActionContent::Webhook(_) => ActionType::Webhook,
            ActionContent::Email(_) => ActionType::Email,
            ActionContent::NatsPublish(_) => ActionType::NatsPublish,
            ActionContent::CustomApiCall(_) => ActionType::CustomApiCall,
        }
    }
}

fn check_method(method: &str) -> Result<(), String> {
    if !method.is_empty() && method.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(format!("invalid HTTP method '{method}'"))
    }
}
