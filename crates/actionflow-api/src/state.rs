//! Application state wiring the orchestrator to its collaborators.
//!
//! `AppState` is generic over the three collaborator traits so the router can
//! be exercised against in-memory fakes; `ServerState` pins it to the
//! configured infra implementations used by the CLI and the server.

use std::sync::Arc;

use actionflow_core::channel::MessageChannel;
use actionflow_core::orchestrator::Orchestrator;
use actionflow_core::ports::{EntityResolver, MetadataClient};
use actionflow_infra::catalog::Catalog;
use actionflow_infra::config::LoadedConfig;
use actionflow_infra::entity::Entities;
use actionflow_infra::sqlite::SqliteStream;

/// Orchestrator pinned to the configured catalog, entity resolver and the
/// SQLite stream.
pub type ServerState = AppState<Catalog, Entities, SqliteStream>;

/// Shared state handed to every HTTP handler.
pub struct AppState<M, E, C> {
    pub orchestrator: Arc<Orchestrator<M, E, C>>,
}

impl<M, E, C> Clone for AppState<M, E, C> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

impl<M, E, C> AppState<M, E, C>
where
    M: MetadataClient,
    E: EntityResolver,
    C: MessageChannel,
{
    pub fn new(orchestrator: Orchestrator<M, E, C>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

impl ServerState {
    /// Open the stream, load the catalog and build the entity resolver.
    pub async fn init(loaded: &LoadedConfig) -> anyhow::Result<Self> {
        let stream = open_stream(loaded).await?;
        let catalog = Catalog::from_config(&loaded.config.catalog).await?;
        let entities = Entities::from_config(&loaded.config.entity)?;

        tracing::info!(
            catalog = %catalog.describe(),
            stream = %loaded.stream_database_path().display(),
            "orchestrator ready"
        );

        Ok(Self::new(Orchestrator::new(catalog, entities, stream)))
    }
}

/// Open (creating if needed) the SQLite stream named by the configuration.
pub async fn open_stream(loaded: &LoadedConfig) -> anyhow::Result<SqliteStream> {
    let path = loaded.stream_database_path();
    let stream = SqliteStream::open(&path, loaded.config.stream.clone()).await?;
    Ok(stream)
}
