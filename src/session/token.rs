//! Session token signing
//!
//! Tokens are HS256 JWTs carrying the session id, the session public key
//! and the expiry in epoch milliseconds. Expiry is checked against the
//! session table rather than by the JWT layer, so an expired session is
//! reported as `SessionExpired` and not as a bad token.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Result, TollgateError};

use super::key::SessionKey;

/// Minimum accepted secret length
const MIN_SECRET_LEN: usize = 32;

/// Payload stored in a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub session_id: String,
    pub session_public_key: String,
    /// Expiry (Unix epoch milliseconds)
    pub expiry: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Issues and verifies session tokens
#[derive(Clone)]
pub struct SessionTokenCodec {
    secret: String,
}

impl SessionTokenCodec {
    /// Create a codec with a production secret
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(TollgateError::Config(
                "JWT_SECRET is required in production mode".into(),
            ));
        }

        if secret.len() < MIN_SECRET_LEN {
            return Err(TollgateError::Config(format!(
                "JWT_SECRET must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        Ok(Self { secret })
    }

    /// Create a codec for dev mode
    pub fn new_dev() -> Self {
        Self {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
        }
    }

    /// Sign a token for a session
    pub fn issue(&self, session: &SessionKey) -> Result<String> {
        let claims = SessionClaims {
            session_id: session.session_id.clone(),
            session_public_key: session.session_public_key(),
            expiry: session.expiry.timestamp_millis(),
            iat: Utc::now().timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| TollgateError::Internal(format!("Failed to sign session token: {}", e)))
    }

    /// Verify the signature and decode the claims
    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        decode::<SessionClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| {
            debug!("Session token rejected: {}", err);
            TollgateError::InvalidSession
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_codec() -> SessionTokenCodec {
        SessionTokenCodec::new("test-secret-that-is-at-least-32-characters-long").unwrap()
    }

    fn test_session() -> SessionKey {
        SessionKey::generate(
            "user_1",
            "0x1",
            Utc::now() + Duration::hours(24),
            vec!["game_action".into()],
            "0.001",
        )
    }

    #[test]
    fn test_issue_and_verify() {
        let codec = test_codec();
        let session = test_session();

        let token = codec.issue(&session).unwrap();
        let claims = codec.verify(&token).unwrap();

        assert_eq!(claims.session_id, session.session_id);
        assert_eq!(claims.session_public_key, session.session_public_key());
        assert_eq!(claims.expiry, session.expiry.timestamp_millis());
    }

    #[test]
    fn test_token_never_contains_private_key() {
        let codec = test_codec();
        let session = test_session();
        let token = codec.issue(&session).unwrap();

        let claims = serde_json::to_value(codec.verify(&token).unwrap()).unwrap();
        let fields: Vec<_> = claims.as_object().unwrap().keys().cloned().collect();
        assert_eq!(fields.len(), 4);
        assert!(fields.contains(&"sessionPublicKey".to_string()));
    }

    #[test]
    fn test_wrong_secret_is_invalid_session() {
        let token = test_codec().issue(&test_session()).unwrap();
        let other =
            SessionTokenCodec::new("different-secret-that-is-at-least-32-characters").unwrap();

        assert!(matches!(other.verify(&token), Err(TollgateError::InvalidSession)));
        assert!(matches!(
            test_codec().verify("not-a-token"),
            Err(TollgateError::InvalidSession)
        ));
    }

    #[test]
    fn test_secret_validation() {
        assert!(SessionTokenCodec::new("short").is_err());
        assert!(SessionTokenCodec::new("").is_err());
        assert!(SessionTokenCodec::new("this-secret-is-at-least-32-chars-long").is_ok());
    }
}
