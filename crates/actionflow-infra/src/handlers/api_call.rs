//! Custom API call action: a request against the configured API base URL.

use std::time::Duration;

use actionflow_core::executor::{ActionError, ActionHandler, ActionOutcome, decode_content};
use actionflow_core::render::{RenderContext, render};
use actionflow_types::action::{ActionContent, ActionType};
use actionflow_types::config::ApiCallExecutorConfig;
use actionflow_types::task::Task;
use secrecy::{ExposeSecret, SecretString};

use super::request::{parse_method, parse_url, render_headers, send};
use super::signature::TASK_ID_HEADER;
use crate::http::build_client;

pub struct ApiCallHandler {
    client: reqwest::Client,
    base_url: Option<String>,
    bearer_token: Option<SecretString>,
}

impl ApiCallHandler {
    pub fn new(config: &ApiCallExecutorConfig) -> Result<Self, ActionError> {
        if let Some(base) = &config.base_url {
            parse_url(base)?;
        }
        let client = build_client(Duration::from_secs(config.timeout_secs))
            .map_err(|e| ActionError::Permanent(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .as_ref()
                .map(|b| b.trim_end_matches('/').to_string()),
            bearer_token: config.bearer_token.clone(),
        })
    }

    pub fn is_simulated(&self) -> bool {
        self.base_url.is_none()
    }
}

/// `<base><path>`, inserting the separating slash when the path lacks one.
fn join_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

impl ActionHandler for ApiCallHandler {
    fn action_type(&self) -> ActionType {
        ActionType::CustomApiCall
    }

    async fn execute(&self, task: &Task) -> Result<ActionOutcome, ActionError> {
        let ActionContent::CustomApiCall(content) = decode_content(task, ActionType::CustomApiCall)?
        else {
            return Err(ActionError::Permanent("not custom_api_call content".to_string()));
        };
        let ctx = RenderContext::for_task(task);

        let path = render(&content.path, &ctx)?;
        let method = parse_method(&content.method)?;
        let headers = render_headers(&content.headers, &ctx)?;
        let body = content
            .body
            .as_deref()
            .map(|b| render(b, &ctx))
            .transpose()?;

        let Some(base) = &self.base_url else {
            tracing::info!(
                %method,
                %path,
                headers = ?headers,
                body = %body.as_deref().unwrap_or(""),
                "simulated api call (no base_url configured)"
            );
            return Ok(ActionOutcome::Simulated);
        };

        let url = parse_url(&join_path(base, &path))?;
        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header(TASK_ID_HEADER, task.task_id.to_string());
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                request = request.header("content-type", "application/json");
            }
            request = request.body(body);
        }

        let status = send(request, &format!("{method} {url}")).await?;
        tracing::info!(%url, %method, status, "api call completed");
        Ok(ActionOutcome::Delivered)
    }
}
