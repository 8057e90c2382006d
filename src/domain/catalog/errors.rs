use crate::store::StoreError;

// ============================================================================
// Catalog Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("License service {0} not found")]
    NotFound(i64),

    #[error("Invalid service: {0}")]
    ValidationFailed(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}
