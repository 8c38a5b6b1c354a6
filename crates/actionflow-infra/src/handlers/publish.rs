//! `nats_publish` action: re-publish a rendered payload through the stream.

use actionflow_core::channel::MessageChannel;
use actionflow_core::channel::subject::validate_subject;
use actionflow_core::executor::{ActionError, ActionHandler, ActionOutcome, decode_content};
use actionflow_core::render::{RenderContext, render};
use actionflow_types::action::{ActionContent, ActionType};
use actionflow_types::task::Task;

pub struct PublishHandler<C> {
    channel: C,
}

impl<C: MessageChannel> PublishHandler<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }
}

impl<C: MessageChannel> ActionHandler for PublishHandler<C> {
    fn action_type(&self) -> ActionType {
        ActionType::NatsPublish
    }

    async fn execute(&self, task: &Task) -> Result<ActionOutcome, ActionError> {
        let ActionContent::NatsPublish(content) = decode_content(task, ActionType::NatsPublish)?
        else {
            return Err(ActionError::Permanent("not nats_publish content".to_string()));
        };
        let ctx = RenderContext::for_task(task);

        let subject = render(&content.subject, &ctx)?;
        validate_subject(&subject).map_err(|e| ActionError::Permanent(e.to_string()))?;
        let payload = render(&content.payload, &ctx)?;

        let ack = self
            .channel
            .publish(&subject, payload.into_bytes())
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    ActionError::Transient(e.to_string())
                } else {
                    ActionError::Permanent(e.to_string())
                }
            })?;
        tracing::info!(%subject, seq = ack.seq, "payload re-published");
        Ok(ActionOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actionflow_core::channel::{DurableConsumer, InMemoryStream};
    use actionflow_types::attribute::AttributeMap;
    use actionflow_types::config::StreamConfig;
    use serde_json::json;

    fn task(subject: &str) -> Task {
        let mut entity = AttributeMap::new();
        entity.insert("id".to_string(), "c-42".into());
        entity.insert("region".to_string(), "eu".into());
        Task::new(
            "wf-1",
            3,
            "notify",
            ActionType::NatsPublish,
            json!({"subject": subject, "payload": "{\"customer\":\"{{Entity.id}}\"}"}),
            Some(entity),
            AttributeMap::new(),
        )
    }

    #[tokio::test]
    async fn test_republishes_rendered_payload() {
        let stream = InMemoryStream::default();
        let consumer = stream.subscribe("events.>", "audit").await.unwrap();
        let handler = PublishHandler::new(stream.clone());

        let outcome = handler
            .execute(&task("events.customer.{{Entity.region}}"))
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Delivered);

        let d = consumer.next().await.unwrap();
        assert_eq!(d.subject, "events.customer.eu");
        assert_eq!(d.payload, br#"{"customer":"c-42"}"#);
    }

    #[tokio::test]
    async fn test_uncaptured_subject_is_permanent() {
        let handler = PublishHandler::new(InMemoryStream::default());
        let err = handler.execute(&task("audit.log")).await.unwrap_err();
        assert!(matches!(err, ActionError::Permanent(_)));

        let err = handler.execute(&task("events.{{Entity.missing}}")).await.unwrap_err();
        assert!(matches!(err, ActionError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_full_stream_is_transient() {
        let stream = InMemoryStream::new(StreamConfig {
            max_msgs: 1,
            ..StreamConfig::default()
        });
        stream.publish("events.x", b"1".to_vec()).await.unwrap();
        let err = PublishHandler::new(stream)
            .execute(&task("events.y"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
