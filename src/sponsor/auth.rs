//! Paymaster auth headers
//!
//! Header sets are rebuilt at most once per TTL and only by expiry, never
//! because a call failed. Each rebuild mints a new `X-Request-ID`.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio::sync::RwLock;
use tracing::debug;

use super::SponsorError;

const API_KEY: HeaderName = HeaderName::from_static("api-key");
const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

struct CachedHeaders {
    headers: HeaderMap,
    expires_at: Instant,
}

/// TTL cache of the paymaster auth header set
pub struct AuthHeaderCache {
    api_key: String,
    ttl: Duration,
    cached: RwLock<Option<CachedHeaders>>,
}

impl AuthHeaderCache {
    pub fn new(api_key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Current header set, rebuilding it if the cached one expired
    pub async fn headers(&self) -> Result<HeaderMap, SponsorError> {
        {
            let cached = self.cached.read().await;
            if let Some(entry) = cached.as_ref().filter(|c| c.expires_at > Instant::now()) {
                return Ok(entry.headers.clone());
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(entry) = cached.as_ref().filter(|c| c.expires_at > Instant::now()) {
            return Ok(entry.headers.clone());
        }

        let headers = self.build()?;
        debug!(ttl_secs = self.ttl.as_secs(), "Refreshed paymaster auth headers");
        *cached = Some(CachedHeaders {
            headers: headers.clone(),
            expires_at: Instant::now() + self.ttl,
        });
        Ok(headers)
    }

    fn build(&self) -> Result<HeaderMap, SponsorError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.api_key.is_empty() {
            let value = HeaderValue::from_str(&self.api_key)
                .map_err(|_| SponsorError::InvalidPayload("API key is not a valid header value".into()))?;
            headers.insert(API_KEY, value);
        }
        let request_id = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .map_err(|e| SponsorError::InvalidPayload(e.to_string()))?;
        headers.insert(REQUEST_ID, request_id);
        Ok(headers)
    }
}
