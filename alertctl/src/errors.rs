use crate::analysis::generation::GenerationError;
use crate::analysis::retrieval::RetrievalError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data or business rule violation
    #[error("{message}")]
    Validation { message: String },

    /// Retrieval dependency failure. Absorbed by the orchestrator (no-context
    /// fallback) and never surfaced from `analyze`; present so retrieval code
    /// can use `?` against the crate error where needed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Generation dependency failure - fatal to the request
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Combined retrieval + generation exceeded the configured wall clock
    #[error("analysis exceeded the {budget_ms}ms budget")]
    BudgetExceeded { budget_ms: u64 },

    /// Metrics database operation error (read path)
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            // A failed dependency behind us, not a fault of the caller
            Error::Retrieval(_) | Error::Generation(_) => StatusCode::BAD_GATEWAY,
            Error::BudgetExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Database(_) | Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable classification, used both in the error body
    /// and as the stored metrics classification.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::Retrieval(_) => "retrieval",
            Error::Generation(err) => match err {
                GenerationError::Timeout => "generation_timeout",
                GenerationError::Transport { .. } => "generation_transport",
                GenerationError::Api { .. } => "generation_api",
                GenerationError::PolicyRejection => "generation_policy",
                GenerationError::MalformedOutput => "generation_malformed",
            },
            Error::BudgetExceeded { .. } => "budget_exceeded",
            Error::Database(_) => "database",
            Error::Internal { .. } | Error::Other(_) => "internal",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { message } => message.clone(),
            Error::Retrieval(err) => err.to_string(),
            Error::Generation(err) => err.to_string(),
            Error::BudgetExceeded { budget_ms } => {
                format!("analysis exceeded the {budget_ms}ms budget")
            }
            Error::Database(_) => "Metrics store error".to_string(),
            Error::Internal { .. } | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(_) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Generation(_) | Error::Retrieval(_) | Error::BudgetExceeded { .. } => {
                tracing::warn!("Upstream dependency error: {}", self);
            }
            Error::Validation { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = serde_json::json!({
            "kind": self.kind(),
            "message": self.user_message(),
        });

        (status, axum::response::Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        let validation = Error::Validation {
            message: "alert_text is required".to_string(),
        };
        assert_eq!(validation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(validation.kind(), "validation");

        let generation = Error::Generation(GenerationError::Timeout);
        assert_eq!(generation.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(generation.kind(), "generation_timeout");

        let budget = Error::BudgetExceeded { budget_ms: 45_000 };
        assert_eq!(budget.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(budget.kind(), "budget_exceeded");
    }

    #[test]
    fn user_message_hides_database_details() {
        let err = Error::Database(sqlx::Error::PoolClosed);
        assert_eq!(err.user_message(), "Metrics store error");
    }
}
