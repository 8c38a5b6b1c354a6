//! Email action delivered through an HTTP mail relay.
//!
//! The relay receives `POST <relay_url>` with
//! `{"from", "to", "subject", "body", "content_type"}`. Without a relay the
//! handler runs in simulation mode and only logs the rendered message.

use std::time::Duration;

use actionflow_core::executor::{ActionError, ActionHandler, ActionOutcome, decode_content};
use actionflow_core::render::{RenderContext, render, render_recipients, validate_address};
use actionflow_types::action::{ActionContent, ActionType, EmailContent};
use actionflow_types::config::EmailExecutorConfig;
use actionflow_types::task::Task;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::request::{parse_url, send};
use super::signature::TASK_ID_HEADER;
use crate::http::build_client;

/// A fully rendered message, as submitted to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub content_type: &'static str,
}

struct Relay {
    url: Url,
    api_key: Option<SecretString>,
}

pub struct EmailHandler {
    client: reqwest::Client,
    relay: Option<Relay>,
    default_from: String,
}

impl EmailHandler {
    pub fn new(config: &EmailExecutorConfig) -> Result<Self, ActionError> {
        let relay = match &config.relay_url {
            Some(url) => Some(Relay {
                url: parse_url(url)?,
                api_key: config.api_key.clone(),
            }),
            None => None,
        };
        let client = build_client(Duration::from_secs(config.timeout_secs))
            .map_err(|e| ActionError::Permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            relay,
            default_from: config.default_from.clone(),
        })
    }

    /// Whether messages are only logged.
    pub fn is_simulated(&self) -> bool {
        self.relay.is_none()
    }

    /// Render and validate a message without sending it.
    pub fn render_email(
        &self,
        content: &EmailContent,
        ctx: &RenderContext<'_>,
    ) -> Result<RenderedEmail, ActionError> {
        let to = render_recipients(&content.recipients, ctx)?;
        if to.is_empty() {
            return Err(ActionError::Permanent(
                "recipient list rendered empty".to_string(),
            ));
        }
        for address in &to {
            validate_address(address)?;
        }

        let from = match &content.from {
            Some(template) => render(template, ctx)?.trim().to_string(),
            None => self.default_from.clone(),
        };
        validate_address(&from)?;

        Ok(RenderedEmail {
            from,
            to,
            subject: render(&content.subject, ctx)?,
            body: render(&content.body, ctx)?,
            content_type: content.body_type.mime_type(),
        })
    }
}

impl ActionHandler for EmailHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Email
    }

    async fn execute(&self, task: &Task) -> Result<ActionOutcome, ActionError> {
        let ActionContent::Email(content) = decode_content(task, ActionType::Email)? else {
            return Err(ActionError::Permanent("not email content".to_string()));
        };
        let email = self.render_email(&content, &RenderContext::for_task(task))?;

        let Some(relay) = &self.relay else {
            tracing::info!(
                from = %email.from,
                to = ?email.to,
                subject = %email.subject,
                content_type = email.content_type,
                body = %email.body,
                "simulated email (no relay configured)"
            );
            return Ok(ActionOutcome::Simulated);
        };

        let mut request = self
            .client
            .post(relay.url.clone())
            .header(TASK_ID_HEADER, task.task_id.to_string())
            .json(&email);
        if let Some(key) = &relay.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let target = format!("mail relay {}", relay.url);
        let status = send(request, &target).await?;
        tracing::info!(recipients = email.to.len(), status, "email submitted to relay");
        Ok(ActionOutcome::Delivered)
    }
}
