//! Workflow orchestrator: turns one trigger into one task per workflow step.
//!
//! # Dispatch flow
//!
//! 1. Fetch the workflow definition (must exist and be enabled).
//! 2. Resolve the entity snapshot once for the whole trigger.
//! 3. For each step in sequence order: fetch the template, validate its
//!    content, render string parameters against the entity, publish a `Task`.
//! 4. Collect per-step outcomes into a `DispatchReport`.
//!
//! Steps are published sequentially with no barrier and no waiting on
//! execution. A failing step never stops later steps from being published.

pub mod report;

use actionflow_observe::attrs::SPAN_TRIGGER;
use actionflow_types::action::ActionTemplate;
use actionflow_types::attribute::{AttributeMap, AttributeValue};
use actionflow_types::task::Task;
use actionflow_types::workflow::{ActionStep, TriggerPayload};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use crate::channel::MessageChannel;
use crate::ports::{EntityResolver, MetadataClient};
use crate::render::{RenderContext, is_template, render};

pub use report::{DispatchReport, OrchestratorError, PublishedStep, StepFailure, StepFailureKind};

/// Workflow dispatcher, generic over its three collaborators.
pub struct Orchestrator<M, E, C> {
    catalog: M,
    entities: E,
    channel: C,
}

impl<M, E, C> Orchestrator<M, E, C>
where
    M: MetadataClient,
    E: EntityResolver,
    C: MessageChannel,
{
    pub fn new(catalog: M, entities: E, channel: C) -> Self {
        Self {
            catalog,
            entities,
            channel,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn catalog(&self) -> &M {
        &self.catalog
    }

    /// Dispatch every step of `workflow_id` for one trigger.
    ///
    /// Returns `Err` only when nothing could be dispatched at all (workflow
    /// or entity missing, collaborator unavailable). Per-step failures are
    /// recorded in the report; use [`DispatchReport::into_result`] to treat
    /// them as an error.
    pub async fn trigger_workflow(
        &self,
        workflow_id: &str,
        trigger: TriggerPayload,
    ) -> Result<DispatchReport, OrchestratorError> {
        let trigger_id = Uuid::now_v7();
        let span = info_span!(
            SPAN_TRIGGER,
            actionflow.workflow_id = %workflow_id,
            actionflow.trigger_id = %trigger_id,
        );
        self.dispatch(trigger_id, workflow_id, trigger)
            .instrument(span)
            .await
    }

    async fn dispatch(
        &self,
        trigger_id: Uuid,
        workflow_id: &str,
        trigger: TriggerPayload,
    ) -> Result<DispatchReport, OrchestratorError> {
        let definition = self
            .catalog
            .get_workflow_definition(workflow_id)
            .await?
            .filter(|d| d.enabled)
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("workflow '{workflow_id}' (missing or disabled)"))
            })?;

        let entity = self.entities.resolve(&trigger).await?;

        tracing::info!(
            workflow = %definition.name,
            steps = definition.action_sequence.len(),
            has_entity = entity.is_some(),
            "dispatching workflow"
        );

        let mut report = DispatchReport::new(trigger_id, workflow_id);
        for (step_index, step) in definition.action_sequence.iter().enumerate() {
            match self
                .dispatch_step(workflow_id, step_index, step, entity.as_ref())
                .await
            {
                Ok(published) => {
                    tracing::debug!(
                        step_index,
                        task_id = %published.task_id,
                        subject = %published.subject,
                        stream_seq = published.stream_seq,
                        "step published"
                    );
                    report.published.push(published);
                }
                Err(kind) => {
                    let failure = StepFailure {
                        step_index,
                        action_template_id: step.action_template_id.clone(),
                        kind,
                    };
                    tracing::warn!(step_index, error = %failure, "step not dispatched");
                    report.failures.push(failure);
                }
            }
        }

        tracing::info!(
            published = report.published.len(),
            failed = report.failures.len(),
            "workflow dispatch finished"
        );
        Ok(report)
    }

    async fn dispatch_step(
        &self,
        workflow_id: &str,
        step_index: usize,
        step: &ActionStep,
        entity: Option<&AttributeMap>,
    ) -> Result<PublishedStep, StepFailureKind> {
        let template: ActionTemplate = self
            .catalog
            .get_action_template(&step.action_template_id)
            .await
            .map_err(|e| StepFailureKind::Catalog {
                reason: e.to_string(),
            })?
            .ok_or(StepFailureKind::TemplateNotFound)?;

        let (action_type, _content) = template.decode().map_err(|e| StepFailureKind::Validation {
            reason: e.to_string(),
        })?;

        let params = render_parameters(&step.parameters, entity).map_err(|reason| {
            StepFailureKind::Validation { reason }
        })?;

        let task = Task::new(
            workflow_id,
            step_index,
            template.id,
            action_type,
            template.template_content,
            entity.cloned(),
            params,
        );
        let payload = task.to_payload().map_err(|e| StepFailureKind::Validation {
            reason: format!("task encoding failed: {e}"),
        })?;

        let subject = task.subject();
        let ack = self
            .channel
            .publish(&subject, payload)
            .await
            .map_err(|e| StepFailureKind::Publish {
                retryable: e.is_retryable(),
                reason: e.to_string(),
            })?;

        Ok(PublishedStep {
            step_index,
            action_template_id: task.action_template_id,
            action_type,
            task_id: task.task_id,
            subject,
            stream_seq: ack.seq,
        })
    }
}

/// Render string parameters that contain template markers against the entity.
///
/// Only `Entity` is in scope here; a parameter referencing `Params` is a
/// render error.
fn render_parameters(
    parameters: &AttributeMap,
    entity: Option<&AttributeMap>,
) -> Result<AttributeMap, String> {
    let ctx = RenderContext::new(entity, None);
    parameters
        .iter()
        .map(|(key, value)| match value {
            AttributeValue::String(s) if is_template(s) => render(s, &ctx)
                .map(|rendered| (key.clone(), AttributeValue::String(rendered)))
                .map_err(|e| format!("parameter '{key}': {e}")),
            other => Ok((key.clone(), other.clone())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelError, DurableConsumer, InMemoryStream, PublishAck};
    use crate::ports::{InMemoryCatalog, PayloadEntityResolver};
    use actionflow_types::action::ActionType;
    use actionflow_types::config::StreamConfig;
    use actionflow_types::error::{CatalogError, EntityError};
    use actionflow_types::workflow::WorkflowDefinition;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    fn step(template_id: &str) -> ActionStep {
        ActionStep {
            action_template_id: template_id.to_string(),
            parameters: AttributeMap::new(),
        }
    }

    fn workflow(id: &str, steps: Vec<ActionStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: id.to_string(),
            name: format!("{id} workflow"),
            description: None,
            enabled: true,
            action_sequence: steps,
        }
    }

    fn email_template(id: &str) -> ActionTemplate {
        ActionTemplate {
            id: id.to_string(),
            action_type: "email".to_string(),
            template_content: json!({
                "subject": "Welcome {{Entity.name}}",
                "body": "Hello",
                "recipients": "{{Entity.email}},{{Params.cc}}"
            }),
        }
    }

    fn webhook_template(id: &str) -> ActionTemplate {
        ActionTemplate {
            id: id.to_string(),
            action_type: "webhook".to_string(),
            template_content: json!({"url": "https://hooks.example.com/{{Entity.id}}"}),
        }
    }

    fn trigger() -> TriggerPayload {
        let mut t = TriggerPayload {
            entity_type: Some("customer".to_string()),
            entity_id: Some("c-1".to_string()),
            ..Default::default()
        };
        t.attributes.insert("name".to_string(), "Acme".into());
        t.attributes.insert("email".to_string(), "a@x.com".into());
        t
    }

    fn orchestrator(
        catalog: InMemoryCatalog,
    ) -> Orchestrator<InMemoryCatalog, PayloadEntityResolver, InMemoryStream> {
        Orchestrator::new(catalog, PayloadEntityResolver, InMemoryStream::default())
    }

    async fn drain(stream: &InMemoryStream, filter: &str) -> Vec<Task> {
        let consumer = stream.subscribe(filter, "test-drain").await.unwrap();
        let mut tasks = Vec::new();
        while let Ok(Ok(d)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), consumer.next()).await
        {
            tasks.push(Task::from_payload(&d.payload).unwrap());
            consumer.ack(&d).await.unwrap();
        }
        tasks
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_publishes_one_task_per_step_in_order() {
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![step("t-mail"), step("t-hook"), step("t-mail")]))
            .with_template(email_template("t-mail"))
            .with_template(webhook_template("t-hook"));
        let orch = orchestrator(catalog);

        let report = orch.trigger_workflow("wf-1", trigger()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.published.len(), 3);
        let indices: Vec<usize> = report.published.iter().map(|p| p.step_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(report.published[1].action_type, ActionType::Webhook);
        assert_eq!(report.published[1].subject, "actions.webhook");

        let tasks = drain(orch.channel(), "actions.>").await;
        assert_eq!(tasks.len(), 3);
        let steps: Vec<usize> = tasks.iter().map(|t| t.step_index).collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert!(tasks.iter().all(|t| t.workflow_id == "wf-1"));
        assert_eq!(tasks[0].task_id, report.published[0].task_id);
    }

    #[tokio::test]
    async fn test_entity_snapshot_shared_by_all_steps() {
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![step("t-mail"), step("t-hook")]))
            .with_template(email_template("t-mail"))
            .with_template(webhook_template("t-hook"));
        let orch = orchestrator(catalog);
        orch.trigger_workflow("wf-1", trigger()).await.unwrap();

        let tasks = drain(orch.channel(), "actions.>").await;
        let entity = tasks[0].entity.clone().unwrap();
        assert_eq!(entity.get("name"), Some(&AttributeValue::from("Acme")));
        assert_eq!(entity.get("id"), Some(&AttributeValue::from("c-1")));
        assert_eq!(tasks[1].entity.as_ref(), Some(&entity));
    }

    #[tokio::test]
    async fn test_missing_template_fails_only_that_step() {
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![step("t-mail"), step("t-gone"), step("t-hook")]))
            .with_template(email_template("t-mail"))
            .with_template(webhook_template("t-hook"));
        let orch = orchestrator(catalog);

        let report = orch.trigger_workflow("wf-1", trigger()).await.unwrap();
        assert!(!report.is_success());
        assert_eq!(report.published.len(), 2);
        assert_eq!(report.failed_step_indices(), vec![1]);
        assert_eq!(report.failures[0].kind, StepFailureKind::TemplateNotFound);
        assert!(!report.has_retryable_failure());
    }

    #[tokio::test]
    async fn test_invalid_templates_are_validation_failures() {
        let unsupported = ActionTemplate {
            id: "t-sms".to_string(),
            action_type: "sms".to_string(),
            template_content: json!({}),
        };
        let malformed = ActionTemplate {
            id: "t-bad".to_string(),
            action_type: "email".to_string(),
            template_content: json!({"subject": "no body or recipients"}),
        };
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![step("t-sms"), step("t-bad"), step("t-hook")]))
            .with_template(unsupported)
            .with_template(malformed)
            .with_template(webhook_template("t-hook"));
        let orch = orchestrator(catalog);

        let report = orch.trigger_workflow("wf-1", trigger()).await.unwrap();
        assert_eq!(report.failed_step_indices(), vec![0, 1]);
        assert!(
            report
                .failures
                .iter()
                .all(|f| matches!(f.kind, StepFailureKind::Validation { .. }))
        );
        assert_eq!(report.published.len(), 1);
        assert_eq!(report.published[0].step_index, 2);
    }

    #[tokio::test]
    async fn test_parameters_rendered_against_entity() {
        let mut with_params = step("t-mail");
        with_params
            .parameters
            .insert("cc".to_string(), "{{Entity.email}}, ops@x.com".into());
        with_params.parameters.insert("priority".to_string(), 3i64.into());
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![with_params]))
            .with_template(email_template("t-mail"));
        let orch = orchestrator(catalog);

        orch.trigger_workflow("wf-1", trigger()).await.unwrap();
        let tasks = drain(orch.channel(), "actions.email").await;
        assert_eq!(
            tasks[0].params.get("cc"),
            Some(&AttributeValue::from("a@x.com, ops@x.com"))
        );
        assert_eq!(tasks[0].params.get("priority"), Some(&AttributeValue::from(3i64)));
    }

    #[tokio::test]
    async fn test_parameter_render_failure_is_validation() {
        let mut bad = step("t-mail");
        bad.parameters
            .insert("cc".to_string(), "{{Entity.email}}".into());
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![bad]))
            .with_template(email_template("t-mail"));
        let orch = orchestrator(catalog);

        // No entity on the trigger: Entity context is missing.
        let report = orch
            .trigger_workflow("wf-1", TriggerPayload::default())
            .await
            .unwrap();
        match &report.failures[0].kind {
            StepFailureKind::Validation { reason } => assert!(reason.contains("cc"), "{reason}"),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_trigger_without_entity_omits_entity() {
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![step("t-hook")]))
            .with_template(webhook_template("t-hook"));
        let orch = orchestrator(catalog);

        orch.trigger_workflow("wf-1", TriggerPayload::default())
            .await
            .unwrap();
        let tasks = drain(orch.channel(), "actions.webhook").await;
        assert!(tasks[0].entity.is_none());
        assert!(tasks[0].params.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_or_disabled_workflow_is_not_found() {
        let mut disabled = workflow("wf-off", vec![step("t-hook")]);
        disabled.enabled = false;
        let catalog = InMemoryCatalog::default()
            .with_workflow(disabled)
            .with_template(webhook_template("t-hook"));
        let orch = orchestrator(catalog);

        assert!(matches!(
            orch.trigger_workflow("wf-missing", trigger()).await,
            Err(OrchestratorError::NotFound(_))
        ));
        assert!(matches!(
            orch.trigger_workflow("wf-off", trigger()).await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_two_triggers_publish_independent_task_sets() {
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![step("t-mail"), step("t-hook")]))
            .with_template(email_template("t-mail"))
            .with_template(webhook_template("t-hook"));
        let orch = orchestrator(catalog);

        let a = orch.trigger_workflow("wf-1", trigger()).await.unwrap();
        let b = orch.trigger_workflow("wf-1", trigger()).await.unwrap();
        assert_ne!(a.trigger_id, b.trigger_id);

        let tasks = drain(orch.channel(), "actions.>").await;
        assert_eq!(tasks.len(), 4);
        let mut ids: Vec<Uuid> = tasks.iter().map(|t| t.task_id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn test_storage_full_is_retryable_step_failure() {
        let mut config = StreamConfig::default();
        config.max_msgs = 1;
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![step("t-mail"), step("t-hook")]))
            .with_template(email_template("t-mail"))
            .with_template(webhook_template("t-hook"));
        let orch = Orchestrator::new(catalog, PayloadEntityResolver, InMemoryStream::new(config));

        let report = orch.trigger_workflow("wf-1", trigger()).await.unwrap();
        assert_eq!(report.published.len(), 1);
        assert_eq!(report.failed_step_indices(), vec![1]);
        assert!(report.has_retryable_failure());
        assert!(matches!(
            report.into_result(),
            Err(OrchestratorError::StepsFailed(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Failing collaborators
    // -----------------------------------------------------------------------

    struct UnknownEntity;

    impl EntityResolver for UnknownEntity {
        async fn resolve(
            &self,
            trigger: &TriggerPayload,
        ) -> Result<Option<AttributeMap>, EntityError> {
            Err(EntityError::NotFound {
                entity_type: trigger.entity_type.clone().unwrap_or_default(),
                entity_id: trigger.entity_id.clone().unwrap_or_default(),
            })
        }
    }

    struct ClosedChannel;

    impl MessageChannel for ClosedChannel {
        type Consumer = <InMemoryStream as MessageChannel>::Consumer;

        async fn publish(&self, subject: &str, _payload: Vec<u8>) -> Result<PublishAck, ChannelError> {
            Err(ChannelError::NoStream(subject.to_string()))
        }

        async fn subscribe(
            &self,
            _filter: &str,
            _durable: &str,
        ) -> Result<Self::Consumer, ChannelError> {
            Err(ChannelError::Storage("closed".into()))
        }

        async fn stream_info(&self) -> Result<crate::channel::StreamInfo, ChannelError> {
            Err(ChannelError::Storage("closed".into()))
        }

        async fn dead_letters(
            &self,
            _durable: &str,
        ) -> Result<Vec<crate::channel::DeadLetter>, ChannelError> {
            Ok(Vec::new())
        }
    }

    struct DownCatalog;

    impl MetadataClient for DownCatalog {
        async fn get_workflow_definition(
            &self,
            _id: &str,
        ) -> Result<Option<WorkflowDefinition>, CatalogError> {
            Err(CatalogError::Unavailable("connection refused".into()))
        }

        async fn get_action_template(
            &self,
            _id: &str,
        ) -> Result<Option<ActionTemplate>, CatalogError> {
            Err(CatalogError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_missing_entity_is_not_found() {
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![step("t-hook")]))
            .with_template(webhook_template("t-hook"));
        let orch = Orchestrator::new(catalog, UnknownEntity, InMemoryStream::default());
        assert!(matches!(
            orch.trigger_workflow("wf-1", trigger()).await,
            Err(OrchestratorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_no_stream_is_permanent_publish_failure() {
        let catalog = InMemoryCatalog::default()
            .with_workflow(workflow("wf-1", vec![step("t-hook"), step("t-hook")]))
            .with_template(webhook_template("t-hook"));
        let orch = Orchestrator::new(catalog, PayloadEntityResolver, ClosedChannel);

        let report = orch.trigger_workflow("wf-1", trigger()).await.unwrap();
        assert_eq!(report.failed_step_indices(), vec![0, 1]);
        assert!(!report.has_retryable_failure());
    }

    #[tokio::test]
    async fn test_catalog_outage_surfaces_as_error() {
        let orch = Orchestrator::new(DownCatalog, PayloadEntityResolver, InMemoryStream::default());
        assert!(matches!(
            orch.trigger_workflow("wf-1", trigger()).await,
            Err(OrchestratorError::Catalog(_))
        ));
    }
}
