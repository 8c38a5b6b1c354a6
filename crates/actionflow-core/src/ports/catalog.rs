//! Metadata catalog port.
//!
//! Workflow definitions and action templates are owned by an external
//! catalog; Actionflow only reads them.

use std::collections::HashMap;

use actionflow_types::action::ActionTemplate;
use actionflow_types::error::CatalogError;
use actionflow_types::workflow::WorkflowDefinition;

/// Read-only access to workflow definitions and action templates.
///
/// Absence is `Ok(None)`; errors mean the catalog could not answer.
pub trait MetadataClient: Send + Sync {
    fn get_workflow_definition(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, CatalogError>> + Send;

    fn get_action_template(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ActionTemplate>, CatalogError>> + Send;
}

/// Catalog held entirely in memory, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    workflows: HashMap<String, WorkflowDefinition>,
    templates: HashMap<String, ActionTemplate>,
}

impl InMemoryCatalog {
    pub fn new(workflows: Vec<WorkflowDefinition>, templates: Vec<ActionTemplate>) -> Self {
        Self {
            workflows: workflows.into_iter().map(|w| (w.id.clone(), w)).collect(),
            templates: templates.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn with_workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflows.insert(workflow.id.clone(), workflow);
        self
    }

    pub fn with_template(mut self, template: ActionTemplate) -> Self {
        self.templates.insert(template.id.clone(), template);
        self
    }

    pub fn workflows(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.workflows.values()
    }

    pub fn templates(&self) -> impl Iterator<Item = &ActionTemplate> {
        self.templates.values()
    }
}

impl MetadataClient for InMemoryCatalog {
    async fn get_workflow_definition(
        &self,
        id: &str,
    ) -> Result<Option<WorkflowDefinition>, CatalogError> {
        Ok(self.workflows.get(id).cloned())
    }

    async fn get_action_template(&self, id: &str) -> Result<Option<ActionTemplate>, CatalogError> {
        Ok(self.templates.get(id).cloned())
    }
}
