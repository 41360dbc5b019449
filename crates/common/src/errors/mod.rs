//! Error types for Unigraph services
//!
//! Provides a single error enum shared by the engine and the gateway:
//! - Query-understanding failures (unresolved, not found, ambiguous)
//! - Retrieval and synthesis failures
//! - HTTP status code mapping
//! - Structured error responses with error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::EntityKind;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Query understanding (2xxx)
    UnresolvedQuery,
    EntityNotFound,
    AmbiguousEntity,

    // Rate limiting (6xxx)
    RateLimited,

    // Graph store (7xxx)
    RetrievalError,
    StoreUnavailable,
    StoreTimeout,
    StoreQueryError,

    // External service errors (8xxx)
    UpstreamError,
    SynthesisError,
    SynthesisTimeout,
    CacheError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    Cancelled,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::UnresolvedQuery => 2001,
            ErrorCode::EntityNotFound => 2002,
            ErrorCode::AmbiguousEntity => 2003,

            ErrorCode::RateLimited => 6001,

            ErrorCode::RetrievalError => 7001,
            ErrorCode::StoreUnavailable => 7002,
            ErrorCode::StoreTimeout => 7003,
            ErrorCode::StoreQueryError => 7004,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::SynthesisError => 8002,
            ErrorCode::SynthesisTimeout => 8003,
            ErrorCode::CacheError => 8006,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::Cancelled => 9004,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// A catalog entity offered back to the user when a mention is ambiguous
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub name: String,
    pub kind: EntityKind,
    pub confidence: f32,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Query understanding
    #[error("Could not work out what the question refers to: {question}")]
    UnresolvedQuery { question: String },

    #[error("No such {kind} in the knowledge graph")]
    EntityNotFound { kind: EntityKind },

    #[error("'{mention}' is not in the knowledge graph")]
    MentionNotFound { mention: String },

    #[error("'{mention}' matches several entities; please pick one")]
    Ambiguous {
        mention: String,
        candidates: Vec<CandidateEntity>,
    },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Graph store
    #[error("Graph retrieval failed for template {template} after {attempts} attempt(s): {message}")]
    Retrieval {
        template: String,
        attempts: u32,
        message: String,
    },

    #[error("Graph store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("Graph store timed out after {timeout_ms}ms")]
    StoreTimeout { timeout_ms: u64 },

    #[error("Graph store rejected query: {message}")]
    StoreQuery { message: String },

    // External service errors
    #[error("Text generation failed: {message}")]
    Synthesis { message: String },

    #[error("Text generation timed out after {timeout_ms}ms")]
    SynthesisTimeout { timeout_ms: u64 },

    #[error("Cache error: {message}")]
    CacheError { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Query cancelled before stage {stage}")]
    Cancelled { stage: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::UnresolvedQuery { .. } => ErrorCode::UnresolvedQuery,
            AppError::EntityNotFound { .. } | AppError::MentionNotFound { .. } => ErrorCode::EntityNotFound,
            AppError::Ambiguous { .. } => ErrorCode::AmbiguousEntity,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Retrieval { .. } => ErrorCode::RetrievalError,
            AppError::StoreUnavailable { .. } => ErrorCode::StoreUnavailable,
            AppError::StoreTimeout { .. } => ErrorCode::StoreTimeout,
            AppError::StoreQuery { .. } => ErrorCode::StoreQueryError,
            AppError::Synthesis { .. } => ErrorCode::SynthesisError,
            AppError::SynthesisTimeout { .. } => ErrorCode::SynthesisTimeout,
            AppError::CacheError { .. } => ErrorCode::CacheError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Cancelled { .. } => ErrorCode::Cancelled,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::EntityNotFound { .. } | AppError::MentionNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict - the user has to choose a candidate
            AppError::Ambiguous { .. } => StatusCode::CONFLICT,

            // 422 Unprocessable - ask for clarification
            AppError::UnresolvedQuery { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 499 Client Closed Request
            AppError::Cancelled { .. } => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }

            // 500 Internal Server Error
            AppError::StoreQuery { .. } |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Synthesis { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::Retrieval { .. } |
            AppError::StoreUnavailable { .. } |
            AppError::CacheError { .. } |
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 504 Gateway Timeout
            AppError::StoreTimeout { .. } |
            AppError::SynthesisTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Whether a graph store call that failed with this error may succeed on retry
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::StoreUnavailable { .. } | AppError::StoreTimeout { .. } => true,
            AppError::HttpClient(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Extra machine-readable payload for the error response
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Ambiguous { mention, candidates } => Some(serde_json::json!({
                "mention": mention,
                "candidates": candidates,
            })),
            AppError::EntityNotFound { kind } => Some(serde_json::json!({ "kind": kind })),
            AppError::MentionNotFound { mention } => Some(serde_json::json!({ "mention": mention })),
            AppError::Retrieval { template, attempts, .. } => Some(serde_json::json!({
                "template": template,
                "attempts": attempts,
            })),
            _ => None,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: self.details(),
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::EntityNotFound { kind: EntityKind::Investor };
        assert_eq!(err.code(), ErrorCode::EntityNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "No such investor in the knowledge graph");

        let err = AppError::MentionNotFound { mention: "Zeptoo".into() };
        assert_eq!(err.code(), ErrorCode::EntityNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.details(), Some(serde_json::json!({ "mention": "Zeptoo" })));
    }

    #[test]
    fn test_ambiguity_is_client_error_with_candidates() {
        let err = AppError::Ambiguous {
            mention: "Zepto".into(),
            candidates: vec![
                CandidateEntity { name: "Zepto".into(), kind: EntityKind::Company, confidence: 1.0 },
                CandidateEntity { name: "Zepto*".into(), kind: EntityKind::Company, confidence: 0.98 },
            ],
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(err.is_client_error());

        let details = err.details().unwrap();
        assert_eq!(details["candidates"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::StoreUnavailable { message: "refused".into() }.is_transient());
        assert!(AppError::StoreTimeout { timeout_ms: 5000 }.is_transient());
        assert!(!AppError::StoreQuery { message: "syntax".into() }.is_transient());
        assert!(!AppError::UnresolvedQuery { question: "?".into() }.is_transient());
    }

    #[test]
    fn test_retrieval_is_server_error() {
        let err = AppError::Retrieval {
            template: "investor_portfolio".into(),
            attempts: 3,
            message: "connection refused".into(),
        };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.is_server_error());
    }
}
