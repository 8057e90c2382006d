use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::domain::catalog::CatalogError;
use crate::domain::request::RequestError;

// ============================================================================
// Error → HTTP mapping
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
}

impl ErrorBody {
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "fail",
            message: message.into(),
        }
    }
}

const STORAGE_MESSAGE: &str = "internal storage error";

impl ResponseError for RequestError {
    fn status_code(&self) -> StatusCode {
        match self {
            RequestError::InvalidStateTransition { .. } | RequestError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            RequestError::PreconditionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RequestError::RequestNotFound(_)
            | RequestError::ServiceNotFound(_)
            | RequestError::LineNotFound { .. } => StatusCode::NOT_FOUND,
            RequestError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            RequestError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RequestError::Forbidden(_) => StatusCode::FORBIDDEN,
            RequestError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            RequestError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure while handling request");
                STORAGE_MESSAGE.to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody::fail(message))
    }
}

impl ResponseError for CatalogError {
    fn status_code(&self) -> StatusCode {
        match self {
            CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
            CatalogError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            CatalogError::Forbidden(_) => StatusCode::FORBIDDEN,
            CatalogError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            CatalogError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure while handling catalog request");
                STORAGE_MESSAGE.to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody::fail(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::RequestStatus;

    #[test]
    fn test_status_codes() {
        let cases = [
            (
                RequestError::InvalidStateTransition {
                    from: RequestStatus::Draft,
                    to: RequestStatus::Completed,
                },
                StatusCode::CONFLICT,
            ),
            (
                RequestError::PreconditionFailed("no lines".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (RequestError::RequestNotFound(1), StatusCode::NOT_FOUND),
            (
                RequestError::ValidationFailed("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                RequestError::Unauthorized("who".to_string()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                RequestError::Forbidden("nope".to_string()),
                StatusCode::FORBIDDEN,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_code(), expected, "{}", error);
        }
    }

    #[test]
    fn test_catalog_status_codes() {
        assert_eq!(CatalogError::NotFound(3).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            CatalogError::ValidationFailed("x".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
