//! Error types for telehub.
//!
//! This module defines all error types used throughout the telehub crate,
//! providing detailed context for debugging and the JSON error bodies
//! returned by the HTTP API.

use std::path::PathBuf;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// The main error type for telehub operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// A `MongoDB` operation failed.
    #[error("MongoDB operation failed: {0}")]
    Mongo(Box<mongodb::error::Error>),

    /// An event could not be encoded as a BSON document.
    #[error("failed to encode event for MongoDB: {0}")]
    BsonEncode(#[from] mongodb::bson::ser::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Telemetry Errors ===
    /// An incoming telemetry payload was rejected.
    #[error("invalid telemetry event: {reason}")]
    InvalidEvent {
        /// Why the payload was rejected.
        reason: String,
    },

    /// A request's query string or path could not be parsed.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What was wrong with the request.
        reason: String,
    },

    /// No events exist for the requested session.
    #[error("Session with ID {session_id} not found")]
    SessionNotFound {
        /// The session that was looked up.
        session_id: String,
    },

    /// A request handler failed; wraps the cause with the failed operation.
    #[error("Failed to {operation}: {source}")]
    Operation {
        /// Short description of the operation, e.g. "generate telemetry statistics".
        operation: &'static str,
        /// The underlying error.
        #[source]
        source: Box<Error>,
    },

    // === API Client Errors ===
    /// The telemetry API could not be reached.
    #[error("failed to reach telemetry API at {url}: {message}")]
    ApiUnavailable {
        /// The URL that was requested.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The telemetry API answered with a non-success status.
    #[error("telemetry API returned {status} for {url}: {body}")]
    ApiStatus {
        /// The requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The telemetry API answered with a body that could not be decoded.
    #[error("unexpected response from telemetry API at {url}: {message}")]
    ApiResponse {
        /// The requested URL.
        url: String,
        /// Description of what went wrong.
        message: String,
    },

    // === I/O Errors ===
    /// File system or socket operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for telehub operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Mongo(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an invalid event error.
    #[must_use]
    pub fn invalid_event(reason: impl Into<String>) -> Self {
        Self::InvalidEvent {
            reason: reason.into(),
        }
    }

    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Create a session not found error.
    #[must_use]
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session_id: session_id.into(),
        }
    }

    /// Wrap this error with the operation that failed.
    ///
    /// Client errors (invalid input, unknown session) are returned unchanged so
    /// their status code survives.
    #[must_use]
    pub fn during(self, operation: &'static str) -> Self {
        if self.is_client_error() {
            self
        } else {
            Self::Operation {
                operation,
                source: Box::new(self),
            }
        }
    }

    /// Check if this error was caused by the caller rather than the server.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidEvent { .. } | Self::InvalidRequest { .. } | Self::SessionNotFound { .. }
        )
    }

    /// Check if this error means the telemetry API is unreachable.
    #[must_use]
    pub fn is_api_unavailable(&self) -> bool {
        matches!(self, Self::ApiUnavailable { .. })
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEvent { .. } | Self::InvalidRequest { .. } | Self::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "detail": self.to_string(),
        }))
    }
}
