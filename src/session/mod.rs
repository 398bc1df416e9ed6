//! Delegated Session Keys
//!
//! A session lets a game client act for a wallet without holding the
//! wallet's key. Each session owns an ephemeral Ed25519 keypair that never
//! leaves this process; the client only receives a signed token naming the
//! session, its public key and its expiry.
//!
//! # Flow
//!
//! ```text
//! create_session(user, wallet) ──▶ SessionKey stored under session_id
//!                                  │
//!                                  └─▶ token { session_id, public key, expiry }
//!
//! validate_and_resolve(token, method)
//!     signature ok?        ── no ──▶ InvalidSession
//!     session_id known?    ── no ──▶ InvalidSession
//!     now > expiry?        ── yes ─▶ SessionExpired
//!     method allowed?      ── no ──▶ MethodNotAllowed
//!     ──▶ SessionKey
//! ```
//!
//! Expired sessions are never swept; lookups after expiry simply fail.

pub mod key;
pub mod manager;
pub mod store;
pub mod token;

pub use key::SessionKey;
pub use manager::{SessionConfig, SessionKeyManager, DEFAULT_ALLOWED_METHODS};
pub use store::{MemorySessionStore, SessionStore, SessionStoreStats};
pub use token::{SessionClaims, SessionTokenCodec};
