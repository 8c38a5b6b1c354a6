//! Entity resolution port.

use actionflow_types::attribute::{AttributeMap, AttributeValue};
use actionflow_types::error::EntityError;
use actionflow_types::workflow::TriggerPayload;

/// Turns a trigger's entity reference into a point-in-time snapshot.
///
/// `Ok(None)` means the trigger carries no entity at all. A reference that
/// cannot be found is `EntityError::NotFound`.
pub trait EntityResolver: Send + Sync {
    fn resolve(
        &self,
        trigger: &TriggerPayload,
    ) -> impl std::future::Future<Output = Result<Option<AttributeMap>, EntityError>> + Send;
}

/// Uses the trigger's own attributes as the snapshot.
///
/// `entity_id` and `entity_type` are exposed as `id` and `type` unless the
/// attributes already carry those keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadEntityResolver;

impl EntityResolver for PayloadEntityResolver {
    async fn resolve(&self, trigger: &TriggerPayload) -> Result<Option<AttributeMap>, EntityError> {
        if !trigger.has_entity() {
            return Ok(None);
        }
        Ok(Some(snapshot_from_trigger(trigger, AttributeMap::new())))
    }
}

/// Overlay the trigger's attributes and identity onto `base`.
pub fn snapshot_from_trigger(trigger: &TriggerPayload, mut base: AttributeMap) -> AttributeMap {
    for (key, value) in &trigger.attributes {
        base.insert(key.clone(), value.clone());
    }
    if let Some(id) = &trigger.entity_id {
        base.entry("id".to_string())
            .or_insert_with(|| AttributeValue::from(id.as_str()));
    }
    if let Some(kind) = &trigger.entity_type {
        base.entry("type".to_string())
            .or_insert_with(|| AttributeValue::from(kind.as_str()));
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_payload_resolver_without_entity() {
        let resolved = PayloadEntityResolver
            .resolve(&TriggerPayload::default())
            .await
            .unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_payload_resolver_uses_attributes_and_identity() {
        let mut trigger = TriggerPayload {
            entity_type: Some("customer".to_string()),
            entity_id: Some("c-42".to_string()),
            ..Default::default()
        };
        trigger.attributes.insert("name".to_string(), "Acme".into());

        let snapshot = PayloadEntityResolver.resolve(&trigger).await.unwrap().unwrap();
        assert_eq!(snapshot.get("name"), Some(&AttributeValue::from("Acme")));
        assert_eq!(snapshot.get("id"), Some(&AttributeValue::from("c-42")));
        assert_eq!(snapshot.get("type"), Some(&AttributeValue::from("customer")));
    }

    #[test]
    fn test_explicit_attributes_win_over_identity() {
        let mut trigger = TriggerPayload {
            entity_id: Some("c-42".to_string()),
            ..Default::default()
        };
        trigger.attributes.insert("id".to_string(), "external-7".into());

        let mut base = AttributeMap::new();
        base.insert("name".to_string(), "Old".into());
        base.insert("tier".to_string(), "gold".into());
        trigger.attributes.insert("name".to_string(), "New".into());

        let snapshot = snapshot_from_trigger(&trigger, base);
        assert_eq!(snapshot.get("id"), Some(&AttributeValue::from("external-7")));
        assert_eq!(snapshot.get("name"), Some(&AttributeValue::from("New")));
        assert_eq!(snapshot.get("tier"), Some(&AttributeValue::from("gold")));
    }
}
