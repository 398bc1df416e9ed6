//! Session key material

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;

/// A delegated signing capability bound to one user and wallet.
///
/// The private half of the keypair is held only here. It is not
/// serializable and `Debug` redacts it.
#[derive(Clone)]
pub struct SessionKey {
    /// Opaque session identifier (32 hex chars)
    pub session_id: String,

    /// Wallet address the session acts for
    pub master_address: String,

    /// Owning user
    pub user_id: String,

    /// Session is invalid strictly after this instant
    pub expiry: DateTime<Utc>,

    /// Methods this session may invoke
    pub allowed_methods: HashSet<String>,

    /// Gas policy cap (stored only)
    pub max_gas_per_tx: String,

    signing_key: SigningKey,
}

impl SessionKey {
    /// Generate a new session with a fresh keypair and session id
    pub fn generate(
        user_id: impl Into<String>,
        master_address: impl Into<String>,
        expiry: DateTime<Utc>,
        allowed_methods: impl IntoIterator<Item = String>,
        max_gas_per_tx: impl Into<String>,
    ) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);

        let mut id_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut id_bytes);

        Self {
            session_id: hex::encode(id_bytes),
            master_address: master_address.into(),
            user_id: user_id.into(),
            expiry,
            allowed_methods: allowed_methods.into_iter().collect(),
            max_gas_per_tx: max_gas_per_tx.into(),
            signing_key,
        }
    }

    /// Hex-encoded Ed25519 public key of the session
    pub fn session_public_key(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// True when `now` is past the expiry instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry
    }

    /// Check if the session may invoke `method`
    pub fn allows(&self, method: &str) -> bool {
        self.allowed_methods.contains(method)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("session_id", &self.session_id)
            .field("session_public_key", &self.session_public_key())
            .field("master_address", &self.master_address)
            .field("user_id", &self.user_id)
            .field("expiry", &self.expiry)
            .field("allowed_methods", &self.allowed_methods)
            .field("max_gas_per_tx", &self.max_gas_per_tx)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_key(expiry: DateTime<Utc>) -> SessionKey {
        SessionKey::generate(
            "user_1",
            "0x0123",
            expiry,
            vec!["game_action".to_string()],
            "0.001",
        )
    }

    #[test]
    fn test_generated_keys_are_unique() {
        let expiry = Utc::now() + Duration::hours(1);
        let a = test_key(expiry);
        let b = test_key(expiry);

        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.session_public_key(), b.session_public_key());
        assert_eq!(a.session_id.len(), 32);
        assert_eq!(a.session_public_key().len(), 64);
    }

    #[test]
    fn test_expiry_is_strict() {
        let expiry = Utc::now();
        let key = test_key(expiry);

        assert!(!key.is_expired_at(expiry));
        assert!(key.is_expired_at(expiry + Duration::milliseconds(1)));
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let key = test_key(Utc::now());
        let printed = format!("{:?}", key);
        assert!(printed.contains("<redacted>"));
    }
}
