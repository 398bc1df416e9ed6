//! Tollgate - gasless action gateway
//!
//! Lets game clients submit on-chain actions without holding gas or a
//! wallet key. A session key stands in for the wallet, actions are queued
//! and batched per user, a paymaster pays the fees, and a receipt guard
//! watches each transaction until it is final or re-queued.
//!
//! ## Components
//!
//! - **Session**: delegated session keys and signed session tokens
//! - **Intake**: authenticated, rate-limited entry onto the work queue
//! - **Batch**: per-user aggregation and submission
//! - **Sponsor**: paymaster client with retry and backoff
//! - **Receipt**: finality polling, re-queue and dead-letter
//! - **Deploy**: sponsored account deployment worker

pub mod batch;
pub mod config;
pub mod deploy;
pub mod intake;
pub mod queue;
pub mod receipt;
pub mod routes;
pub mod server;
pub mod session;
pub mod sponsor;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, TollgateError};
