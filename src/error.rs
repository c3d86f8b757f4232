use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error;
use std::fmt;

use crate::images::ImageStoreError;
use crate::payments::GatewayError;

/// The primary error type for the application.
///
/// This enum consolidates all possible errors that can occur within the application,
/// providing a unified way to handle and respond to failures.
#[derive(Debug)]
pub enum AppError {
    /// For internal server errors that are not expected to be handled by the client.
    Internal(anyhow::Error),
    /// For client errors due to invalid requests.
    BadRequest(String),
    /// For when a requested resource is not found.
    NotFound(String),
    /// For when a request conflicts with the current state of the server.
    Conflict(String),
    /// For when a service is temporarily unavailable.
    ServiceUnavailable(String),
    /// For errors related to database operations.
    Database(String),
    /// For when user input is invalid.
    InvalidInput(String),
    /// For when a request carries no or unknown credentials.
    Unauthorized(String),
    /// For when the caller is authenticated but not allowed to act on the resource.
    Forbidden(String),
    /// For when a client has sent too many requests in a given amount of time.
    RateLimited {
        /// The number of seconds to wait before retrying the request.
        retry_after_seconds: u64,
    },
    /// For when a specific field in a request fails validation.
    ValidationError {
        /// The name of the field that failed validation.
        field: String,
        /// A message describing the validation error.
        message: String,
    },
    /// For when several fields fail validation at once.
    Validation(Vec<FieldError>),
    /// For errors related to I/O operations.
    IoError(String),
    /// For failures reported by the payment gateway or the image store.
    Upstream(String),
}

/// A single failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::RateLimited { retry_after_seconds } => {
                write!(f, "Rate limited. Retry after {} seconds", retry_after_seconds)
            }
            AppError::ValidationError { field, message } => {
                write!(f, "Validation error on field '{}': {}", field, message)
            }
            AppError::Validation(errors) => {
                let joined: Vec<String> = errors.iter().map(|e| format!("{}: {}", e.field, e.message)).collect();
                write!(f, "Validation failed: {}", joined.join("; "))
            }
            AppError::IoError(msg) => write!(f, "I/O error: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message, details) = match self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                let error_id = uuid::Uuid::new_v4();
                tracing::error!("Error ID: {}", error_id);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg, None)
            }
            AppError::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    None,
                )
            }
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::RateLimited { retry_after_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Too many requests. Please retry after {} seconds", retry_after_seconds),
                Some(json!({ "retry_after_seconds": retry_after_seconds })),
            ),
            AppError::ValidationError { field, message } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Validation failed for field '{}'", field),
                Some(json!({ "field": field, "message": message })),
            ),
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Validation failed for {} field(s)", errors.len()),
                Some(json!({ "errors": errors })),
            ),
            AppError::IoError(msg) => {
                tracing::error!("I/O error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "IO_ERROR",
                    "An I/O error occurred".to_string(),
                    None,
                )
            }
            AppError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg, None)
            }
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": error_message,
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    AppError::Conflict("Resource already exists".to_string())
                } else {
                    AppError::Database(format!("Database error: {}", db_err.message()))
                }
            }
            sqlx::Error::PoolTimedOut => {
                AppError::ServiceUnavailable("Database connection pool timed out".to_string())
            }
            _ => AppError::Database(format!("Database error: {}", err)),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(format!("{}: {}", err.kind(), err))
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::BadRequest(format!("Malformed multipart body: {}", err.body_text()))
    }
}

impl From<ImageStoreError> for AppError {
    fn from(err: ImageStoreError) -> Self {
        match err {
            ImageStoreError::Io(e) => AppError::from(e),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::UnknownIntent(id) => AppError::NotFound(format!("Payment intent {} not found", id)),
            GatewayError::InvalidState { .. } | GatewayError::RefundExceedsAmount { .. } => {
                AppError::BadRequest(err.to_string())
            }
            GatewayError::Conflict(_) => AppError::Conflict(err.to_string()),
            GatewayError::Declined(msg) => AppError::Upstream(msg),
            GatewayError::Corrupt { .. } | GatewayError::Storage(_) => AppError::Upstream(err.to_string()),
        }
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;

/// An extension trait for `Option` that provides a convenient way to convert
/// an `Option` to a `Result` with a `NotFound` error.
pub trait OptionExt<T> {
    /// Converts an `Option<T>` to a `Result<T, AppError>`.
    ///
    /// * `Ok(T)` if the `Option` is `Some(T)`.
    /// * `Err(AppError::NotFound)` naming `entity` otherwise.
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))
    }
}

/// Maps a unique-constraint violation to `Conflict` with a caller-chosen
/// message; every other database error converts as usual.
pub trait UniqueExt<T> {
    fn conflict_on_unique(self, message: impl FnOnce() -> String) -> AppResult<T>;
}

impl<T> UniqueExt<T> for Result<T, sqlx::Error> {
    fn conflict_on_unique(self, message: impl FnOnce() -> String) -> AppResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(AppError::Conflict(message())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Helpers for request body validation.
pub mod validation {
    use super::*;
    use uuid::Uuid;

    /// Collects every failed rule of a request so the client sees all of them at once.
    #[derive(Debug, Default)]
    pub struct Validator {
        errors: Vec<FieldError>,
    }

    impl Validator {
        pub fn new() -> Self {
            Self::default()
        }

        /// Records `message` for `field` when `ok` is false.
        pub fn check(&mut self, ok: bool, field: &str, message: impl Into<String>) -> &mut Self {
            if !ok {
                self.errors.push(FieldError { field: field.to_string(), message: message.into() });
            }
            self
        }

        /// Required, trimmed text with an upper length bound (in characters).
        pub fn text(&mut self, value: &str, field: &str, max_chars: usize) -> &mut Self {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                self.check(false, field, format!("{} is required", field));
            } else if trimmed.chars().count() > max_chars {
                self.check(false, field, format!("{} must not exceed {} characters", field, max_chars));
            }
            self
        }

        pub fn is_empty(&self) -> bool {
            self.errors.is_empty()
        }

        /// Returns `Ok(())` when no rule failed; a single failure maps to
        /// `ValidationError`, several to `Validation`.
        pub fn finish(self) -> AppResult<()> {
            let mut errors = self.errors;
            match errors.len() {
                0 => Ok(()),
                1 => {
                    let e = errors.remove(0);
                    Err(AppError::ValidationError { field: e.field, message: e.message })
                }
                _ => Err(AppError::Validation(errors)),
            }
        }
    }

    /// Parses a path/body identifier, rejecting malformed ids with 400.
    pub fn parse_id(raw: &str, entity: &str) -> AppResult<Uuid> {
        Uuid::parse_str(raw.trim()).map_err(|_| AppError::BadRequest(format!("Invalid {} id format", entity)))
    }

    /// Validates that a number is positive.
    pub fn validate_positive_number(value: Option<i64>, field: &str) -> AppResult<()> {
        if let Some(v) = value {
            if v <= 0 {
                return Err(AppError::ValidationError {
                    field: field.to_string(),
                    message: format!("Value must be positive, got {}", v),
                });
            }
        }
        Ok(())
    }
}
