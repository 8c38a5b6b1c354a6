//! Request building and response classification shared by HTTP handlers.

use std::collections::BTreeMap;

use actionflow_core::executor::ActionError;
use actionflow_core::render::{RenderContext, render};
use reqwest::{Method, Url};

use crate::http::{Retryability, classify_status};

/// Longest slice of a failed response body kept in error messages.
const ERROR_BODY_LIMIT: usize = 256;

pub(crate) fn parse_method(method: &str) -> Result<Method, ActionError> {
    Method::from_bytes(method.as_bytes())
        .map_err(|_| ActionError::Permanent(format!("invalid HTTP method '{method}'")))
}

pub(crate) fn parse_url(url: &str) -> Result<Url, ActionError> {
    let parsed = Url::parse(url)
        .map_err(|e| ActionError::Permanent(format!("invalid URL '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ActionError::Permanent(format!(
            "unsupported URL scheme '{other}' in '{url}'"
        ))),
    }
}

/// Render every header value.
pub(crate) fn render_headers(
    headers: &BTreeMap<String, String>,
    ctx: &RenderContext<'_>,
) -> Result<BTreeMap<String, String>, ActionError> {
    headers
        .iter()
        .map(|(name, value)| -> Result<(String, String), ActionError> {
            Ok((name.clone(), render(value, ctx)?))
        })
        .collect()
}

/// Send `request` and map the outcome onto the transient/permanent split.
///
/// Connection failures and timeouts are transient, a request that cannot be
/// built is permanent, and non-2xx statuses go through [`classify_status`].
pub(crate) async fn send(request: reqwest::RequestBuilder, target: &str) -> Result<u16, ActionError> {
    let response = request
        .send()
        .await
        .map_err(|e| {
            if e.is_builder() {
                ActionError::Permanent(format!("{target}: {e}"))
            } else {
                ActionError::Transient(format!("{target}: {e}"))
            }
        })?;

    let status = response.status();
    if status.is_success() {
        return Ok(status.as_u16());
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let reason = format!("{target}: HTTP {status}: {body}");
    Err(match classify_status(status) {
        Retryability::Transient => ActionError::Transient(reason),
        Retryability::Permanent => ActionError::Permanent(reason),
    })
}
