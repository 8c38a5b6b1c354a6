//! Webhook action: an HTTP request to a templated URL.

use std::time::Duration;

use actionflow_core::executor::{ActionError, ActionHandler, ActionOutcome, decode_content};
use actionflow_core::render::{RenderContext, render};
use actionflow_types::action::{ActionContent, ActionType};
use actionflow_types::config::WebhookExecutorConfig;
use actionflow_types::task::Task;
use secrecy::{ExposeSecret, SecretString};

use super::request::{parse_method, parse_url, render_headers, send};
use super::signature::{SIGNATURE_HEADER, TASK_ID_HEADER, sign};
use crate::http::build_client;

pub struct WebhookHandler {
    client: reqwest::Client,
    signing_secret: Option<SecretString>,
}

impl WebhookHandler {
    pub fn new(config: &WebhookExecutorConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            signing_secret: config.signing_secret.clone(),
        })
    }
}

impl ActionHandler for WebhookHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Webhook
    }

    async fn execute(&self, task: &Task) -> Result<ActionOutcome, ActionError> {
        let ActionContent::Webhook(content) = decode_content(task, ActionType::Webhook)? else {
            return Err(ActionError::Permanent("not webhook content".to_string()));
        };
        let ctx = RenderContext::for_task(task);

        let url = parse_url(&render(&content.url, &ctx)?)?;
        let method = parse_method(&content.method)?;
        let headers = render_headers(&content.headers, &ctx)?;
        let body = match &content.payload {
            Some(payload) => render(payload, &ctx)?,
            None => String::new(),
        };

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .header(TASK_ID_HEADER, task.task_id.to_string());
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(secret) = &self.signing_secret {
            let signature = sign(secret.expose_secret().as_bytes(), body.as_bytes())
                .map_err(|e| ActionError::Permanent(format!("cannot sign webhook: {e}")))?;
            request = request.header(SIGNATURE_HEADER, signature);
        }
        if !body.is_empty() {
            if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                request = request.header("content-type", "application/json");
            }
            request = request.body(body);
        }

        let target = format!("{method} {url}");
        let status = send(request, &target).await?;
        tracing::info!(%url, %method, status, "webhook delivered");
        Ok(ActionOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::signature::verify;
    use actionflow_types::attribute::AttributeMap;
    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured {
        requests: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
    }

    async fn capture(State(c): State<Captured>, headers: HeaderMap, body: Bytes) -> StatusCode {
        c.requests.lock().unwrap().push((headers, body));
        StatusCode::NO_CONTENT
    }

    async fn spawn_receiver() -> (String, Captured) {
        let captured = Captured::default();
        let router = Router::new()
            .route("/hooks/{id}", post(capture))
            .route("/busy", post(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route("/reject", post(|| async { StatusCode::UNPROCESSABLE_ENTITY }))
            .with_state(captured.clone());
        (crate::http::serve(router).await, captured)
    }

    fn task(content: serde_json::Value) -> Task {
        let mut entity = AttributeMap::new();
        entity.insert("id".to_string(), "c-42".into());
        entity.insert("name".to_string(), "Acme".into());
        Task::new(
            "wf-1",
            0,
            "hook",
            ActionType::Webhook,
            content,
            Some(entity),
            AttributeMap::new(),
        )
    }

    fn handler(secret: Option<&str>) -> WebhookHandler {
        WebhookHandler::new(&WebhookExecutorConfig {
            timeout_secs: 5,
            signing_secret: secret.map(|s| SecretString::from(s.to_string())),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_delivers_rendered_request_with_signature() {
        let (base, captured) = spawn_receiver().await;
        let t = task(json!({
            "url": format!("{base}/hooks/{{{{Entity.id}}}}"),
            "headers": {"X-Customer": "{{Entity.name}}"},
            "payload": "{\"name\":\"{{Entity.name}}\"}"
        }));

        let outcome = handler(Some("s3cret")).execute(&t).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Delivered);

        let requests = captured.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (headers, body) = &requests[0];
        assert_eq!(body.as_ref(), br#"{"name":"Acme"}"#);
        assert_eq!(headers["x-customer"], "Acme");
        assert_eq!(headers["x-actionflow-task-id"], t.task_id.to_string().as_str());
        assert_eq!(headers["content-type"], "application/json");
        let signature = headers["x-actionflow-signature"].to_str().unwrap();
        assert!(verify(b"s3cret", body, signature));
    }

    #[tokio::test]
    async fn test_unsigned_without_secret() {
        let (base, captured) = spawn_receiver().await;
        let t = task(json!({"url": format!("{base}/hooks/1")}));
        handler(None).execute(&t).await.unwrap();

        let requests = captured.requests.lock().unwrap();
        assert!(!requests[0].0.contains_key("x-actionflow-signature"));
        assert!(requests[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_status_classification() {
        let (base, _) = spawn_receiver().await;

        let err = handler(None)
            .execute(&task(json!({"url": format!("{base}/busy")})))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let err = handler(None)
            .execute(&task(json!({"url": format!("{base}/reject")})))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_target_is_transient() {
        let err = handler(None)
            .execute(&task(json!({"url": "http://127.0.0.1:1/hook"})))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_render_failure_is_permanent() {
        let mut t = task(json!({"url": "https://hooks.example.com/{{Entity.id}}"}));
        t.entity = None;
        let err = handler(None).execute(&t).await.unwrap_err();
        assert!(matches!(err, ActionError::Permanent(_)));

        // Renders to an empty URL.
        let err = handler(None)
            .execute(&task(json!({"url": "{{Entity.url}}"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Permanent(_)));
    }
}
