//! Catalog served by a remote metadata service.
//!
//! `GET {base}/workflows/{id}` and `GET {base}/action-templates/{id}` return
//! the JSON forms of `WorkflowDefinition` and `ActionTemplate`; 404 means the
//! entry does not exist.

use std::time::Duration;

use actionflow_core::ports::MetadataClient;
use actionflow_types::action::ActionTemplate;
use actionflow_types::error::CatalogError;
use actionflow_types::workflow::WorkflowDefinition;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::http::{build_client, endpoint, parse_base_url};

pub struct HttpMetadataClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpMetadataClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let base_url = parse_base_url(base_url).map_err(CatalogError::Invalid)?;
        let client = build_client(timeout)
            .map_err(|e| CatalogError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, CatalogError> {
        let url = endpoint(&self.base_url, &[collection, id]).map_err(CatalogError::Invalid)?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(format!("GET {url} failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(%url, "catalog entry not found");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Unavailable(format!("GET {url}: HTTP {status}: {body}")));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| CatalogError::Invalid(format!("GET {url}: {e}")))
    }
}

impl MetadataClient for HttpMetadataClient {
    async fn get_workflow_definition(
        &self,
        id: &str,
    ) -> Result<Option<WorkflowDefinition>, CatalogError> {
        self.fetch("workflows", id).await
    }

    async fn get_action_template(&self, id: &str) -> Result<Option<ActionTemplate>, CatalogError> {
        self.fetch("action-templates", id).await
    }
}
