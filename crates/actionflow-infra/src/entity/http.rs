//! Entity lookup against a remote entity service.

use std::time::Duration;

use actionflow_core::ports::{EntityResolver, snapshot_from_trigger};
use actionflow_types::attribute::{AttributeMap, attributes_from_json};
use actionflow_types::error::EntityError;
use actionflow_types::workflow::TriggerPayload;
use reqwest::{StatusCode, Url};

use crate::http::{build_client, endpoint, parse_base_url};

/// Resolves `GET {base}/entities/{type}/{id}` and overlays the trigger's own
/// attributes on the returned object.
///
/// A trigger carrying attributes but no `entity_id` is resolved from the
/// attributes alone, without a lookup.
pub struct HttpEntityResolver {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpEntityResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EntityError> {
        let base_url = parse_base_url(base_url).map_err(EntityError::Unavailable)?;
        let client = build_client(timeout)
            .map_err(|e| EntityError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn fetch(&self, entity_type: &str, entity_id: &str) -> Result<AttributeMap, EntityError> {
        let url = endpoint(&self.base_url, &["entities", entity_type, entity_id])
            .map_err(EntityError::Unavailable)?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| EntityError::Unavailable(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(EntityError::NotFound {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EntityError::Unavailable(format!("GET {url}: HTTP {status}: {body}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EntityError::Unavailable(format!("GET {url}: {e}")))?;
        if !value.is_object() {
            return Err(EntityError::Unavailable(format!(
                "GET {url}: expected a JSON object"
            )));
        }
        Ok(attributes_from_json(&value))
    }
}

impl EntityResolver for HttpEntityResolver {
    async fn resolve(&self, trigger: &TriggerPayload) -> Result<Option<AttributeMap>, EntityError> {
        let Some(entity_id) = &trigger.entity_id else {
            if trigger.has_entity() {
                return Ok(Some(snapshot_from_trigger(trigger, AttributeMap::new())));
            }
            return Ok(None);
        };
        let Some(entity_type) = &trigger.entity_type else {
            return Err(EntityError::InvalidReference(format!(
                "entity_id '{entity_id}' given without entity_type"
            )));
        };

        let fetched = self.fetch(entity_type, entity_id).await?;
        tracing::debug!(
            entity.entity_type = %entity_type,
            entity.entity_id = %entity_id,
            attributes = fetched.len(),
            "resolved entity"
        );
        Ok(Some(snapshot_from_trigger(trigger, fetched)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionflow_types::attribute::AttributeValue;
    use axum::Json;
    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use serde_json::{Value, json};

    async fn entity(Path((kind, id)): Path<(String, String)>) -> Result<Json<Value>, AxumStatus> {
        match (kind.as_str(), id.as_str()) {
            ("customer", "c-42") => Ok(Json(json!({
                "name": "Acme",
                "email": "billing@acme.test",
                "seats": 12
            }))),
            ("customer", "down") => Err(AxumStatus::BAD_GATEWAY),
            ("customer", "list") => Ok(Json(json!(["not", "an", "object"]))),
            _ => Err(AxumStatus::NOT_FOUND),
        }
    }

    async fn resolver() -> HttpEntityResolver {
        let router = Router::new().route("/entities/{kind}/{id}", get(entity));
        let base = crate::http::serve(router).await;
        HttpEntityResolver::new(&base, Duration::from_secs(5)).unwrap()
    }

    fn trigger(kind: Option<&str>, id: Option<&str>) -> TriggerPayload {
        TriggerPayload {
            entity_type: kind.map(str::to_string),
            entity_id: id.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resolves_and_merges_trigger_attributes() {
        let resolver = resolver().await;
        let mut t = trigger(Some("customer"), Some("c-42"));
        t.attributes.insert("name".to_string(), "Acme Corp".into());

        let snapshot = resolver.resolve(&t).await.unwrap().unwrap();
        assert_eq!(snapshot.get("name"), Some(&AttributeValue::from("Acme Corp")));
        assert_eq!(snapshot.get("email"), Some(&AttributeValue::from("billing@acme.test")));
        assert_eq!(snapshot.get("seats"), Some(&AttributeValue::from(12i64)));
        assert_eq!(snapshot.get("id"), Some(&AttributeValue::from("c-42")));
        assert_eq!(snapshot.get("type"), Some(&AttributeValue::from("customer")));
    }

    #[tokio::test]
    async fn test_missing_entity_is_not_found() {
        let resolver = resolver().await;
        let err = resolver
            .resolve(&trigger(Some("customer"), Some("ghost")))
            .await
            .unwrap_err();
        assert!(matches!(err, EntityError::NotFound { ref entity_id, .. } if entity_id == "ghost"));
    }

    #[tokio::test]
    async fn test_service_errors_are_unavailable() {
        let resolver = resolver().await;
        let err = resolver
            .resolve(&trigger(Some("customer"), Some("down")))
            .await
            .unwrap_err();
        assert!(matches!(err, EntityError::Unavailable(_)));

        let err = resolver
            .resolve(&trigger(Some("customer"), Some("list")))
            .await
            .unwrap_err();
        assert!(matches!(err, EntityError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_reference_without_type_is_invalid() {
        let resolver = resolver().await;
        let err = resolver.resolve(&trigger(None, Some("c-42"))).await.unwrap_err();
        assert!(matches!(err, EntityError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn test_no_lookup_without_entity_id() {
        // Unreachable base: any request would fail.
        let resolver = HttpEntityResolver::new("http://127.0.0.1:1", Duration::from_millis(200))
            .unwrap();
        assert!(resolver.resolve(&TriggerPayload::default()).await.unwrap().is_none());

        let mut t = TriggerPayload::default();
        t.attributes.insert("name".to_string(), "Walk-in".into());
        let snapshot = resolver.resolve(&t).await.unwrap().unwrap();
        assert_eq!(snapshot.get("name"), Some(&AttributeValue::from("Walk-in")));
    }
}
