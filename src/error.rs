//! # Error Module
//!
//! Error taxonomy shared by the document store, the data-access layer and the
//! authentication client. Store and query failures are passed through
//! unchanged; the service layer decides how they surface to users, and the
//! [`IntoResponse`] impl below gives the default HTTP mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the connection manager, the data manager and the auth client.
#[derive(Error, Debug)]
pub enum Error {
    /// The document store was used before `initialize()`
    #[error("Document store client is not initialized")]
    NotInitialized,

    /// A database handle was used after its session scope ended
    #[error("Document store session is closed")]
    SessionClosed,

    /// `update_one` received a statement that is not an UPDATE
    #[error("Precondition required: {0}")]
    PreconditionRequired(String),

    /// A strict-mode query matched nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Table-valued function lookup on an entity without a schema
    #[error("Cannot identify schema for model '{0}'")]
    MissingSchema(&'static str),

    /// The auth backend rejected the token or answered without a user id
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The auth backend could not be reached
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Store driver error, passed through unchanged
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Socket or file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// HTTP status the service layer answers with for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PreconditionRequired(_) => StatusCode::PRECONDITION_REQUIRED,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body returned for failed requests
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub detail: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let detail = match self {
            Error::NotFound(detail)
            | Error::PreconditionRequired(detail)
            | Error::Unauthorized(detail)
            | Error::ServiceUnavailable(detail) => detail,
            other => other.to_string(),
        };
        let body = ErrorBody {
            success: false,
            status_code: status.as_u16(),
            detail,
        };
        (status, Json(body)).into_response()
    }
}
