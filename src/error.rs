//! The provider's error type.
//!
//! Resource code produces [`ProviderError`] either directly or from an
//! [`ApiError`]; the server reports it to the host as an error diagnostic.

use thiserror::Error;

use crate::client::ApiError;

/// Why a provider operation failed.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The object does not exist in the Workspace account.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration passed schema checks but is semantically wrong.
    #[error("Invalid configuration: {0}")]
    Validation(String),

    /// A Google API error with no more specific mapping.
    #[error("Google API error: {0}")]
    Sdk(String),

    /// The provider block is unusable, e.g. unreadable credentials.
    #[error("Provider configuration error: {0}")]
    Configuration(String),

    /// No resource or data source is registered under this name.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// State or API payload did not match the expected shape.
    #[error("Malformed JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The gRPC server could not bind or serve.
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Create conflicted with an existing object (HTTP 409).
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Credentials were rejected or lack a scope (HTTP 401/403).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota exhausted after retries (HTTP 429).
    #[error("Quota exceeded: {0}")]
    ResourceExhausted(String),

    /// The API could not be reached or returned 503.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A timeout elapsed, including waiting for a write to become consistent.
    #[error("Timed out: {0}")]
    DeadlineExceeded(String),

    /// The operation needs state that is not there yet, e.g. `configure`.
    #[error("Precondition failed: {0}")]
    FailedPrecondition(String),

    /// The resource does not support this operation.
    #[error("Not supported: {0}")]
    Unimplemented(String),

    /// The host sent a malformed request (HTTP 400 or undecodable payload).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// `Stop` arrived while the operation was running.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl ProviderError {
    /// The message without the category prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Serialization(err) => err.to_string(),
            Self::Transport(err) => err.to_string(),
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Sdk(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::AlreadyExists(msg)
            | Self::PermissionDenied(msg)
            | Self::ResourceExhausted(msg)
            | Self::Unavailable(msg)
            | Self::DeadlineExceeded(msg)
            | Self::FailedPrecondition(msg)
            | Self::Unimplemented(msg)
            | Self::InvalidRequest(msg)
            | Self::Cancelled(msg) => msg.clone(),
        }
    }

    /// Whether the object is gone. Reads turn this into null state and
    /// deletes into success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        let message = err.to_string();
        match (err.status(), &err) {
            (Some(400), _) => Self::InvalidRequest(message),
            (Some(401 | 403), _) | (None, ApiError::Auth(_)) => Self::PermissionDenied(message),
            (Some(404), _) => Self::NotFound(message),
            (Some(409), _) => Self::AlreadyExists(message),
            (Some(412), _) => Self::FailedPrecondition(message),
            (Some(429), _) => Self::ResourceExhausted(message),
            (Some(503), _) | (None, ApiError::Transport(_)) => Self::Unavailable(message),
            _ => Self::Sdk(message),
        }
    }
}
