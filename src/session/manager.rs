//! Session Key Manager
//!
//! Issues sessions and resolves tokens back to them. Pure synchronous
//! checks, no retries.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::types::{Result, TollgateError};

use super::key::SessionKey;
use super::store::{SessionStore, SessionStoreStats};
use super::token::SessionTokenCodec;

/// Methods a session may call unless configured otherwise
pub const DEFAULT_ALLOWED_METHODS: [&str; 4] =
    ["game_action", "claim_reward", "update_score", "buy_upgrade"];

/// Session issuance policy
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session lifetime
    pub ttl: Duration,

    /// Allowlist applied to every new session
    pub allowed_methods: Vec<String>,

    /// Gas cap recorded on each session
    pub max_gas_per_tx: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            allowed_methods: DEFAULT_ALLOWED_METHODS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            max_gas_per_tx: "0.001".to_string(),
        }
    }
}

/// Issues and validates delegated session credentials
pub struct SessionKeyManager {
    config: SessionConfig,
    codec: SessionTokenCodec,
    store: Arc<dyn SessionStore>,
}

impl SessionKeyManager {
    pub fn new(config: SessionConfig, codec: SessionTokenCodec, store: Arc<dyn SessionStore>) -> Self {
        Self {
            config,
            codec,
            store,
        }
    }

    /// Create a session for a user's wallet and return its token
    pub fn create_session(&self, user_id: &str, master_address: &str) -> Result<String> {
        self.create_session_at(user_id, master_address, Utc::now())
    }

    /// Create a session as if the current time were `now`
    pub fn create_session_at(
        &self,
        user_id: &str,
        master_address: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let session = SessionKey::generate(
            user_id,
            master_address,
            now.checked_add_signed(self.config.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            self.config.allowed_methods.iter().cloned(),
            self.config.max_gas_per_tx.clone(),
        );

        let token = self.codec.issue(&session)?;
        let session = self.store.insert(session);

        info!(
            user_id = %user_id,
            session_id = %session.session_id,
            expiry = %session.expiry,
            "Session created"
        );

        Ok(token)
    }

    /// Resolve a token to its session, checking expiry and the method allowlist
    pub fn validate_and_resolve(&self, token: &str, method: &str) -> Result<Arc<SessionKey>> {
        self.validate_and_resolve_at(token, method, Utc::now())
    }

    /// Same as [`validate_and_resolve`](Self::validate_and_resolve) with an explicit clock
    pub fn validate_and_resolve_at(
        &self,
        token: &str,
        method: &str,
        now: DateTime<Utc>,
    ) -> Result<Arc<SessionKey>> {
        let claims = self.codec.verify(token)?;

        let session = self
            .store
            .get(&claims.session_id)
            .ok_or(TollgateError::InvalidSession)?;

        if session.is_expired_at(now) {
            debug!(session_id = %session.session_id, "Session expired");
            return Err(TollgateError::SessionExpired);
        }

        if !session.allows(method) {
            return Err(TollgateError::MethodNotAllowed(method.to_string()));
        }

        Ok(session)
    }

    pub fn stats(&self) -> SessionStoreStats {
        self.store.stats_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::MemorySessionStore;
    use tokio_test::assert_ok;

    fn manager() -> SessionKeyManager {
        SessionKeyManager::new(
            SessionConfig::default(),
            SessionTokenCodec::new_dev(),
            Arc::new(MemorySessionStore::new()),
        )
    }

    #[test]
    fn test_round_trip_for_every_allowed_method() {
        let manager = manager();
        let token = manager.create_session("user_1", "0xabc").unwrap();

        for method in DEFAULT_ALLOWED_METHODS {
            let session = manager.validate_and_resolve(&token, method).unwrap();
            assert_eq!(session.user_id, "user_1");
            assert_eq!(session.master_address, "0xabc");
        }
    }

    #[test]
    fn test_method_outside_allowlist_rejected() {
        let manager = manager();
        let token = manager.create_session("user_1", "0xabc").unwrap();

        for method in ["transfer", "GAME_ACTION", ""] {
            assert!(matches!(
                manager.validate_and_resolve(&token, method),
                Err(TollgateError::MethodNotAllowed(m)) if m == method
            ));
        }
    }

    #[test]
    fn test_expired_iff_now_after_expiry() {
        let manager = manager();
        let created = Utc::now();
        let token = manager.create_session_at("user_1", "0xabc", created).unwrap();
        let expiry = created + Duration::hours(24);

        assert_ok!(manager.validate_and_resolve_at(&token, "game_action", expiry));

        let after = expiry + Duration::milliseconds(1);
        assert!(matches!(
            manager.validate_and_resolve_at(&token, "game_action", after),
            Err(TollgateError::SessionExpired)
        ));
        // Expiry wins over the allowlist check
        assert!(matches!(
            manager.validate_and_resolve_at(&token, "transfer", after),
            Err(TollgateError::SessionExpired)
        ));
    }

    #[test]
    fn test_unknown_session_is_invalid() {
        let issuing = manager();
        let token = issuing.create_session("user_1", "0xabc").unwrap();

        // Same secret, different table
        let other = manager();
        assert!(matches!(
            other.validate_and_resolve(&token, "game_action"),
            Err(TollgateError::InvalidSession)
        ));
    }
}
