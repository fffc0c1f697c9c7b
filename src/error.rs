//! Error taxonomy for the HTTP boundary and the triage pipeline.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Errors surfaced at the HTTP boundary, mapped onto status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bad alert payload; nothing is persisted.
    #[error("normalization error: {0}")]
    Normalization(String),
    /// Missing or invalid bearer token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    /// Principal lacks access to the service or action.
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Illegal lifecycle transition or decision outside review.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Request body failed validation.
    #[error("validation error: {0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Normalization(_) | Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// LLM gateway configuration failures: no reachable endpoint, missing key,
/// unsupported provider. The runner records these under the `llm` stage.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct LlmConfigurationError(pub String);

/// Pipeline failure classified by the stage it is recorded under.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("{0}")]
    LlmConfiguration(#[from] LlmConfigurationError),
    /// Generated report did not match the schema.
    #[error("report validation failed: {0}")]
    ReportValidation(String),
    /// Log backend, source host, or LLM transport failure.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

impl TriageError {
    /// Pipeline stage the failure is recorded under: configuration failures
    /// land on `llm`, everything else on `triage`.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::LlmConfiguration(_) => "llm",
            _ => "triage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Normalization("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Unauthenticated("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_triage_error_stage() {
        let llm = TriageError::LlmConfiguration(LlmConfigurationError("no endpoint".into()));
        assert_eq!(llm.stage(), "llm");
        let other = TriageError::Other("boom".into());
        assert_eq!(other.stage(), "triage");
    }
}
