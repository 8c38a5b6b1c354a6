//! Entity resolver implementations.

pub mod http;

pub use http::HttpEntityResolver;

use std::time::Duration;

use actionflow_core::ports::{EntityResolver, PayloadEntityResolver};
use actionflow_types::attribute::AttributeMap;
use actionflow_types::config::EntityConfig;
use actionflow_types::error::EntityError;
use actionflow_types::workflow::TriggerPayload;

/// The resolver selected by configuration.
pub enum Entities {
    Payload(PayloadEntityResolver),
    Http(HttpEntityResolver),
}

impl Entities {
    /// Remote lookups when `entity.base_url` is set, trigger attributes otherwise.
    pub fn from_config(config: &EntityConfig) -> Result<Self, EntityError> {
        match &config.base_url {
            Some(base_url) => {
                let resolver =
                    HttpEntityResolver::new(base_url, Duration::from_secs(config.timeout_secs))?;
                Ok(Entities::Http(resolver))
            }
            None => Ok(Entities::Payload(PayloadEntityResolver)),
        }
    }
}

impl EntityResolver for Entities {
    async fn resolve(&self, trigger: &TriggerPayload) -> Result<Option<AttributeMap>, EntityError> {
        match self {
            Entities::Payload(r) => r.resolve(trigger).await,
            Entities::Http(r) => r.resolve(trigger).await,
        }
    }
}
