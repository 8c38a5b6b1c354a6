use thiserror::Error;

/// Errors from the metadata catalog (workflow definitions, action templates).
///
/// Absence is not an error: catalog lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("invalid catalog data: {0}")]
    Invalid(String),

    #[error("catalog io error: {0}")]
    Io(String),
}

/// Errors from entity resolution.
#[derive(Debug, Error)]
pub enum EntityError {
    #[error("entity not found: {entity_type}/{entity_id}")]
    NotFound {
        entity_type: String,
        entity_id: String,
    },

    #[error("entity reference incomplete: {0}")]
    InvalidReference(String),

    #[error("entity service unavailable: {0}")]
    Unavailable(String),
}
