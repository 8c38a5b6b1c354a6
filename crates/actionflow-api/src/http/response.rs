//! Envelope response format for all HTTP responses.
//!
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": [],
//!   "_links": { "self": "..." }
//! }
//! ```

use std::collections::HashMap;

use serde::Serialize;

/// Envelope wrapping every response body.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    pub meta: ApiMeta,

    /// Empty on success.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,

    #[serde(rename = "_links", skip_serializing_if = "HashMap::is_empty")]
    pub links: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
    pub response_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code, e.g. `WORKFLOW_NOT_FOUND`.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

fn meta(request_id: String, response_time_ms: u64) -> ApiMeta {
    ApiMeta {
        request_id,
        timestamp: chrono::Utc::now().to_rfc3339(),
        response_time_ms,
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, request_id: String, response_time_ms: u64) -> Self {
        Self {
            data: Some(data),
            meta: meta(request_id, response_time_ms),
            errors: Vec::new(),
            links: HashMap::new(),
        }
    }

    pub fn with_link(mut self, rel: &str, href: &str) -> Self {
        self.links.insert(rel.to_string(), href.to_string());
        self
    }
}

impl ApiResponse<()> {
    /// An envelope carrying a single error and no data.
    pub fn error(detail: ApiErrorDetail, request_id: String, response_time_ms: u64) -> Self {
        Self {
            data: None,
            meta: meta(request_id, response_time_ms),
            errors: vec![detail],
            links: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let resp = ApiResponse::success(serde_json::json!({"ok": true}), "req-1".into(), 3)
            .with_link("self", "/stream");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["data"]["ok"], true);
        assert_eq!(value["meta"]["request_id"], "req-1");
        assert_eq!(value["meta"]["response_time_ms"], 3);
        assert_eq!(value["_links"]["self"], "/stream");
        assert!(value.get("errors").is_none());
    }

    #[test]
    fn test_error_envelope_omits_data() {
        let resp = ApiResponse::error(
            ApiErrorDetail {
                code: "WORKFLOW_NOT_FOUND".into(),
                message: "missing".into(),
                details: None,
            },
            "req-2".into(),
            0,
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("data").is_none());
        assert_eq!(value["errors"][0]["code"], "WORKFLOW_NOT_FOUND");
        assert!(value["errors"][0].get("details").is_none());
        assert!(value.get("_links").is_none());
    }
}
