//! Error types for Tollgate
//!
//! One enum for everything a caller of the core can observe. Component
//! specific failures (sponsor, chain) keep their own enums and are wrapped
//! here so HTTP handlers can map any of them to a status code.

use hyper::StatusCode;

use crate::receipt::ChainError;
use crate::sponsor::SponsorError;

/// Main error type for Tollgate operations
#[derive(Debug, thiserror::Error)]
pub enum TollgateError {
    #[error("Invalid session")]
    InvalidSession,

    #[error("Session expired")]
    SessionExpired,

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Rate limit exceeded. Please wait before submitting more actions.")]
    RateLimited,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Sponsor(#[from] SponsorError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TollgateError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSession => StatusCode::UNAUTHORIZED,
            Self::SessionExpired => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed(_) => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Sponsor(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Sponsor(_) => StatusCode::BAD_GATEWAY,
            Self::Chain(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for errors caused by the caller's input (never retried)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSession
                | Self::SessionExpired
                | Self::MethodNotAllowed(_)
                | Self::RateLimited
                | Self::BadRequest(_)
        )
    }
}

impl From<std::io::Error> for TollgateError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for TollgateError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for TollgateError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<async_nats::Error> for TollgateError {
    fn from(err: async_nats::Error) -> Self {
        Self::Queue(err.to_string())
    }
}

/// Result type alias for Tollgate operations
pub type Result<T> = std::result::Result<T, TollgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_are_client_errors() {
        assert!(TollgateError::InvalidSession.is_client_error());
        assert!(TollgateError::SessionExpired.is_client_error());
        assert!(TollgateError::MethodNotAllowed("mint".into()).is_client_error());
        assert!(!TollgateError::Queue("down".into()).is_client_error());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(TollgateError::InvalidSession.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            TollgateError::MethodNotAllowed("mint".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(TollgateError::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            TollgateError::Sponsor(SponsorError::NonRetryable {
                status: 401,
                message: "Invalid API key".into()
            })
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
