use super::aggregate::RequestOperation;
use super::value_objects::RequestStatus;
use crate::store::StoreError;

// ============================================================================
// Request Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("License request {0} not found")]
    RequestNotFound(i64),

    #[error("License service {0} not found")]
    ServiceNotFound(i64),

    #[error("Service {service_id} is not part of license request {request_id}")]
    LineNotFound { request_id: i64, service_id: i64 },

    #[error("Cannot move license request from {from} to {to}")]
    InvalidStateTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Cannot {operation} while the license request is {status}")]
    InvalidState {
        status: RequestStatus,
        operation: RequestOperation,
    },

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("Invalid input: {0}")]
    ValidationFailed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl RequestError {
    /// Short label used for the rejected-operation metric.
    pub fn reason(&self) -> &'static str {
        match self {
            RequestError::RequestNotFound(_)
            | RequestError::ServiceNotFound(_)
            | RequestError::LineNotFound { .. } => "not_found",
            RequestError::InvalidStateTransition { .. } => "invalid_transition",
            RequestError::InvalidState { .. } => "invalid_state",
            RequestError::PreconditionFailed(_) => "precondition_failed",
            RequestError::ValidationFailed(_) => "validation_failed",
            RequestError::Unauthorized(_) => "unauthorized",
            RequestError::Forbidden(_) => "forbidden",
            RequestError::Storage(_) => "storage",
        }
    }
}
