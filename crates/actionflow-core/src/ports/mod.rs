//! Collaborator traits implemented by the infrastructure layer.

pub mod catalog;
pub mod entity;

pub use catalog::{InMemoryCatalog, MetadataClient};
pub use entity::{EntityResolver, PayloadEntityResolver, snapshot_from_trigger};
