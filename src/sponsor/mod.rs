//! Sponsorship Client
//!
//! Talks to the paymaster that pays fees on behalf of users. Every call goes
//! through a [`RetryPolicy`]; only failures classified as retryable (rate
//! limits, 5xx, transport) are attempted again.

pub mod auth;
pub mod client;
pub mod payload;
pub mod retry;

use async_trait::async_trait;

use crate::intake::QueuedAction;

pub use auth::AuthHeaderCache;
pub use client::{SponsorClient, SponsorConfig};
pub use payload::{canonical_address, AccountDeployment, Call, SponsorPayload, SponsorResponse};
pub use retry::{classify_status, RetryPolicy};

/// Paymaster failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum SponsorError {
    /// Rejected locally before any network call
    #[error("Invalid sponsor payload: {0}")]
    InvalidPayload(String),

    #[error("Paymaster error {status}: {message}")]
    Retryable { status: u16, message: String },

    #[error("Paymaster error {status}: {message}")]
    NonRetryable { status: u16, message: String },

    /// Connection, timeout or TLS failure
    #[error("Paymaster unreachable: {0}")]
    Transport(String),

    #[error("Malformed paymaster response: {0}")]
    MalformedResponse(String),
}

impl SponsorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. } | Self::Transport(_))
    }

    /// HTTP status reported by the paymaster, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Retryable { status, .. } | Self::NonRetryable { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for SponsorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// One user's actions to be paid for in a single transaction
#[derive(Debug, Clone)]
pub struct SponsorRequest {
    pub user_id: String,
    pub actions: Vec<QueuedAction>,
}

/// Anything able to get transactions sponsored
#[async_trait]
pub trait Sponsor: Send + Sync {
    async fn sponsor(&self, request: &SponsorRequest) -> Result<SponsorResponse, SponsorError>;

    async fn sponsor_deployment(
        &self,
        deployment: &AccountDeployment,
    ) -> Result<SponsorResponse, SponsorError>;
}
