//! Catalog loaded from a YAML file.
//!
//! ```yaml
//! workflows:
//!   - id: wf-onboarding
//!     name: onboarding
//!     action_sequence:
//!       - action_template_id: welcome-email
//!         parameters: { cc: "ops@example.com" }
//! action_templates:
//!   - id: welcome-email
//!     action_type: email
//!     template_content:
//!       subject: "Welcome {{Entity.name}}"
//!       body: "Hello {{Entity.name}}"
//!       recipients: "{{Entity.email}},{{Params.cc}}"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use actionflow_core::ports::{InMemoryCatalog, MetadataClient};
use actionflow_types::action::ActionTemplate;
use actionflow_types::error::CatalogError;
use actionflow_types::workflow::WorkflowDefinition;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    #[serde(default)]
    workflows: Vec<WorkflowDefinition>,
    #[serde(default)]
    action_templates: Vec<ActionTemplate>,
}

/// Read-only catalog parsed and validated once at load time.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: Option<PathBuf>,
    catalog: InMemoryCatalog,
    workflow_count: usize,
    template_count: usize,
}

impl FileCatalog {
    /// Read and validate the catalog file at `path`.
    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CatalogError::Io(format!("{}: {e}", path.display())))?;
        let mut catalog = Self::from_yaml(&yaml).map_err(|e| match e {
            CatalogError::Invalid(reason) => {
                CatalogError::Invalid(format!("{}: {reason}", path.display()))
            }
            other => other,
        })?;
        catalog.path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            workflows = catalog.workflow_count,
            templates = catalog.template_count,
            "loaded catalog file"
        );
        Ok(catalog)
    }

    /// Parse and validate catalog YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        let doc: CatalogDocument =
            serde_yaml_ng::from_str(yaml).map_err(|e| CatalogError::Invalid(e.to_string()))?;
        validate_document(&doc)?;

        let workflow_count = doc.workflows.len();
        let template_count = doc.action_templates.len();
        Ok(Self {
            path: None,
            catalog: InMemoryCatalog::new(doc.workflows, doc.action_templates),
            workflow_count,
            template_count,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn workflow_count(&self) -> usize {
        self.workflow_count
    }

    pub fn template_count(&self) -> usize {
        self.template_count
    }
}

impl MetadataClient for FileCatalog {
    async fn get_workflow_definition(
        &self,
        id: &str,
    ) -> Result<Option<WorkflowDefinition>, CatalogError> {
        self.catalog.get_workflow_definition(id).await
    }

    async fn get_action_template(&self, id: &str) -> Result<Option<ActionTemplate>, CatalogError> {
        self.catalog.get_action_template(id).await
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Reject structural problems; warn about problems that only affect one step.
///
/// Duplicate or empty ids and steps without a template id fail the load.
/// Templates whose content does not decode and steps referencing unknown
/// templates are reported at trigger time as per-step failures, so they are
/// only logged here.
fn validate_document(doc: &CatalogDocument) -> Result<(), CatalogError> {
    let mut template_ids = HashSet::new();
    for template in &doc.action_templates {
        if template.id.trim().is_empty() {
            return Err(CatalogError::Invalid(
                "action template with empty id".to_string(),
            ));
        }
        if !template_ids.insert(template.id.as_str()) {
            return Err(CatalogError::Invalid(format!(
                "duplicate action template id '{}'",
                template.id
            )));
        }
        if let Err(e) = template.decode() {
            tracing::warn!(template_id = %template.id, error = %e, "action template will fail validation");
        }
    }

    let mut workflow_ids = HashSet::new();
    for workflow in &doc.workflows {
        if workflow.id.trim().is_empty() {
            return Err(CatalogError::Invalid("workflow with empty id".to_string()));
        }
        if !workflow_ids.insert(workflow.id.as_str()) {
            return Err(CatalogError::Invalid(format!(
                "duplicate workflow id '{}'",
                workflow.id
            )));
        }
        for (index, step) in workflow.action_sequence.iter().enumerate() {
            if step.action_template_id.trim().is_empty() {
                return Err(CatalogError::Invalid(format!(
                    "workflow '{}' step {index} has no action_template_id",
                    workflow.id
                )));
            }
            if !template_ids.contains(step.action_template_id.as_str()) {
                tracing::warn!(
                    workflow_id = %workflow.id,
                    step_index = index,
                    template_id = %step.action_template_id,
                    "step references unknown action template"
                );
            }
        }
    }
    Ok(())
}
