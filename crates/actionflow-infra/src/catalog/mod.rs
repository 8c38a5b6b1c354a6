//! Metadata catalog implementations.

pub mod file;
pub mod http;

pub use file::FileCatalog;
pub use http::HttpMetadataClient;

use std::time::Duration;

use actionflow_core::ports::MetadataClient;
use actionflow_types::action::ActionTemplate;
use actionflow_types::config::CatalogConfig;
use actionflow_types::error::CatalogError;
use actionflow_types::workflow::WorkflowDefinition;

/// The catalog selected by configuration.
pub enum Catalog {
    File(FileCatalog),
    Http(HttpMetadataClient),
}

impl Catalog {
    /// Build the configured catalog. `file` wins when both sources are set.
    pub async fn from_config(config: &CatalogConfig) -> Result<Self, CatalogError> {
        if let Some(path) = &config.file {
            if config.base_url.is_some() {
                tracing::warn!("both catalog.file and catalog.base_url set; using the file");
            }
            return Ok(Catalog::File(FileCatalog::load(path).await?));
        }
        if let Some(base_url) = &config.base_url {
            let client =
                HttpMetadataClient::new(base_url, Duration::from_secs(config.timeout_secs))?;
            tracing::info!(%base_url, "using remote catalog");
            return Ok(Catalog::Http(client));
        }
        Err(CatalogError::Invalid(
            "no catalog configured: set catalog.file or catalog.base_url".to_string(),
        ))
    }

    pub fn describe(&self) -> String {
        match self {
            Catalog::File(c) => match c.path() {
                Some(path) => format!("file {}", path.display()),
                None => "inline catalog".to_string(),
            },
            Catalog::Http(c) => format!("http {}", c.base_url()),
        }
    }
}

impl MetadataClient for Catalog {
    async fn get_workflow_definition(
        &self,
        id: &str,
    ) -> Result<Option<WorkflowDefinition>, CatalogError> {
        match self {
            Catalog::File(c) => c.get_workflow_definition(id).await,
            Catalog::Http(c) => c.get_workflow_definition(id).await,
        }
    }

    async fn get_action_template(&self, id: &str) -> Result<Option<ActionTemplate>, CatalogError> {
        match self {
            Catalog::File(c) => c.get_action_template(id).await,
            Catalog::Http(c) => c.get_action_template(id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_a_source() {
        let err = Catalog::from_config(&CatalogConfig::default()).await.err().unwrap();
        assert!(matches!(err, CatalogError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_file_wins_over_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, "workflows: []\n").unwrap();

        let config = CatalogConfig {
            file: Some(path),
            base_url: Some("http://catalog.local".to_string()),
            ..CatalogConfig::default()
        };
        let catalog = Catalog::from_config(&config).await.unwrap();
        assert!(matches!(catalog, Catalog::File(_)));
        assert!(catalog.describe().starts_with("file "));
    }

    #[tokio::test]
    async fn test_http_catalog_from_config() {
        let config = CatalogConfig {
            base_url: Some("http://catalog.local/v1".to_string()),
            ..CatalogConfig::default()
        };
        let catalog = Catalog::from_config(&config).await.unwrap();
        assert_eq!(catalog.describe(), "http http://catalog.local/v1");
    }
}
