//! Shared outbound HTTP plumbing.

use std::time::Duration;

use reqwest::{StatusCode, Url};

/// User agent sent on every outbound request.
pub const USER_AGENT: &str = concat!("actionflow/", env!("CARGO_PKG_VERSION"));

/// Build a client with the given request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

/// Parse a configured base URL.
pub fn parse_base_url(base: &str) -> Result<Url, String> {
    Url::parse(base).map_err(|e| format!("invalid base url '{base}': {e}"))
}

/// Append percent-encoded path segments to `base`.
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, String> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| format!("base url '{base}' cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// How a failed downstream call should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    Transient,
    Permanent,
}

/// Classify a non-success HTTP status.
///
/// 408, 429 and every 5xx may succeed later; other statuses will not.
pub fn classify_status(status: StatusCode) -> Retryability {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Retryability::Transient
    } else {
        Retryability::Permanent
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
#[cfg(test)]
pub(crate) async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_segments() {
        let base = parse_base_url("http://catalog.local/api/").unwrap();
        let url = endpoint(&base, &["workflows", "wf 1/x"]).unwrap();
        assert_eq!(url.as_str(), "http://catalog.local/api/workflows/wf%201%2Fx");

        let base = parse_base_url("http://catalog.local").unwrap();
        let url = endpoint(&base, &["action-templates", "t-1"]).unwrap();
        assert_eq!(url.as_str(), "http://catalog.local/action-templates/t-1");
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), Retryability::Transient);
        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT), Retryability::Transient);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), Retryability::Transient);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), Retryability::Permanent);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), Retryability::Permanent);
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(parse_base_url("not a url").is_err());
        let base = parse_base_url("mailto:ops@x.com").unwrap();
        assert!(endpoint(&base, &["x"]).is_err());
    }
}
