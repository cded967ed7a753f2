use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Sold out: event '{event_id}' has {remaining} ticket(s) left, {requested} requested")]
    SoldOut {
        event_id: String,
        requested: u32,
        remaining: u32,
    },

    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::SoldOut { .. } => StatusCode::CONFLICT,
            AppError::TransactionConflict(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::SoldOut { .. } => "SOLD_OUT",
            AppError::TransactionConflict(_) => "TRANSACTION_CONFLICT",
            AppError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Whether the caller may resubmit the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransactionConflict(_))
    }

    fn log(&self) {
        match self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::TransactionConflict(msg)
            | AppError::StorageUnavailable(msg)
            | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::SoldOut {
                event_id,
                requested,
                remaining,
            } => {
                info!(%event_id, requested, remaining, "Purchase rejected: sold out");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AppError::TransactionConflict(msg),
            StoreError::Unavailable(msg) => AppError::StorageUnavailable(msg),
            StoreError::Database(e) => AppError::DatabaseError(e),
            StoreError::Corrupt(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg) => msg.clone(),
            AppError::SoldOut { .. } => self.to_string(),
            AppError::TransactionConflict(_) => {
                "The event is busy, please try again".to_string()
            }
            AppError::StorageUnavailable(_) => "Storage is temporarily unavailable".to_string(),
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "Internal server error".to_string(),
        };

        let details = match &self {
            AppError::SoldOut {
                requested,
                remaining,
                ..
            } => Some(json!({ "requested": requested, "remaining": remaining })),
            AppError::TransactionConflict(_) => Some(json!({ "retryable": true })),
            _ => None,
        };

        error_response(code, public_message, details, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sold_out_is_logged_below_error() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            AppError::SoldOut {
                event_id: "e1".to_string(),
                requested: 2,
                remaining: 0,
            }
            .log();
            AppError::InternalServerError("boom".to_string()).log();
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let sold_out = output
            .lines()
            .find(|line| line.contains("sold out"))
            .expect("sold out line");
        assert!(sold_out.contains("INFO"), "{sold_out}");
        assert!(!sold_out.contains("ERROR"), "{sold_out}");
        assert!(output
            .lines()
            .any(|line| line.contains("ERROR") && line.contains("Application error")));
    }

    #[test]
    fn sold_out_maps_to_conflict() {
        let err = AppError::SoldOut {
            event_id: "e1".to_string(),
            requested: 2,
            remaining: 1,
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "SOLD_OUT");
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_errors_keep_their_category() {
        let conflict: AppError = StoreError::Conflict("version moved".to_string()).into();
        assert!(conflict.is_retryable());
        assert_eq!(conflict.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let down: AppError = StoreError::Unavailable("pool timed out".to_string()).into();
        assert!(!down.is_retryable());
        assert_eq!(down.code(), "STORAGE_UNAVAILABLE");
    }

    #[test]
    fn response_carries_status() {
        let response = AppError::NotFound("event 'x'".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
