//! Receipt Guard
//!
//! Watches sponsored transactions until they reach finality. Rejected or
//! timed-out transactions put their actions back on the work queue with a
//! growing delay, up to a fixed number of re-queues, after which they are
//! dead-lettered.

pub mod chain;
pub mod guard;
pub mod pending;

pub use chain::{ChainReader, FinalityStatus, RpcChainReader, TransactionReceipt, DEFAULT_STARKNET_RPC};
pub use guard::{spawn_guard_task, CheckReport, DeadLetter, GuardConfig, ReceiptGuard, RequeueOutcome};
pub use pending::{MemoryPendingTxStore, PendingTransaction, PendingTxStore};

/// Chain state query failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("Transaction not found")]
    NotFound,

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Chain RPC unreachable: {0}")]
    Transport(String),

    #[error("Malformed RPC response: {0}")]
    Malformed(String),
}

/// Sink for freshly sponsored transactions
pub trait TransactionTracker: Send + Sync {
    fn track_transaction(&self, tx: PendingTransaction);
}
