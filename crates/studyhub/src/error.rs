//! Error types for the study backend

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, Error>;

/// Generic body of a 500-class error, carried as a response extension.
/// The server swaps it in for the detailed body when running in production.
#[derive(Debug, Clone)]
pub struct RedactedBody(pub serde_json::Value);

/// Backend errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client sent something we cannot use
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Upload exceeds the configured size limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Request field failed validation
    #[error("Validation error on '{field}': {message}")]
    Validation { field: String, message: String },

    /// Caller could not be authenticated
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Caller is authenticated but does not own the resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found
    #[error("{0} not found")]
    NotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// External program (chat handler) failed
    #[error("External process error: {message}")]
    Process { message: String, stderr: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a bad request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a forbidden error
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::BadRequest(_) | Error::Validation { .. } | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Auth(err) => err.status_code(),
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Database(_)
            | Error::Process { .. }
            | Error::Io(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}

impl Error {
    /// JSON body for this error. 500-class detail is replaced unless `expose`.
    fn body(&self, expose: bool) -> serde_json::Value {
        let (error_type, message) = match self {
            Error::Config(msg) => ("config_error", msg.clone()),
            Error::BadRequest(msg) => ("bad_request", msg.clone()),
            Error::PayloadTooLarge(msg) => ("payload_too_large", msg.clone()),
            Error::Validation { field, message } => {
                ("validation_error", format!("{}: {}", field, message))
            }
            Error::Auth(err) => (err.kind(), err.to_string()),
            Error::Forbidden(msg) => ("forbidden", msg.clone()),
            Error::NotFound(what) => ("not_found", format!("{} not found", what)),
            Error::Database(msg) => ("database_error", msg.clone()),
            Error::Process { message, .. } => ("process_error", message.clone()),
            Error::Io(err) => ("io_error", err.to_string()),
            Error::Json(err) => ("json_error", err.to_string()),
            Error::Internal(msg) => ("internal_error", msg.clone()),
        };

        let message = if self.status_code().is_server_error() && !expose {
            "Something broke on the server!".to_string()
        } else {
            message
        };

        let mut error = json!({
            "type": error_type,
            "message": message,
        });
        if let Error::Process { stderr, .. } = self {
            if expose && !stderr.is_empty() {
                error["stderr"] = json!(stderr);
            }
        }
        json!({ "error": error })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}: {}", status, self);
        }

        let mut response = (status, Json(self.body(true))).into_response();
        if status.is_server_error() {
            response.extensions_mut().insert(RedactedBody(self.body(false)));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::not_found("Study").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::Auth(AuthError::Expired).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::Auth(AuthError::Invalid("bad".into())).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(Error::not_found("Analysis job").to_string(), "Analysis job not found");
    }

    #[test]
    fn test_production_hides_internal_detail() {
        let err = Error::Process {
            message: "chat failed".into(),
            stderr: "Traceback".into(),
        };
        let verbose = err.body(true);
        assert_eq!(verbose["error"]["message"], "chat failed");
        assert_eq!(verbose["error"]["stderr"], "Traceback");

        let quiet = err.body(false);
        assert_eq!(quiet["error"]["message"], "Something broke on the server!");
        assert!(quiet["error"].get("stderr").is_none());

        // Client errors keep their message either way
        let bad = Error::bad_request("No document file uploaded.").body(false);
        assert_eq!(bad["error"]["message"], "No document file uploaded.");
    }

    #[test]
    fn test_only_server_errors_carry_redacted_body() {
        let response = Error::internal("disk on fire").into_response();
        let redacted = response.extensions().get::<RedactedBody>().unwrap();
        assert_eq!(redacted.0["error"]["message"], "Something broke on the server!");

        let response = Error::not_found("Study").into_response();
        assert!(response.extensions().get::<RedactedBody>().is_none());
    }
}
