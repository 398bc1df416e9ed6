//! Pending transaction table

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::intake::QueuedAction;

/// A sponsored transaction awaiting finality
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub tx_hash: String,
    pub user_id: String,
    pub actions: Vec<QueuedAction>,
    /// Highest re-queue count among the actions (each action keeps its own)
    pub attempts: u32,
    pub submitted_at: DateTime<Utc>,
}

impl PendingTransaction {
    pub fn new(
        tx_hash: impl Into<String>,
        user_id: impl Into<String>,
        actions: Vec<QueuedAction>,
        attempts: u32,
    ) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            user_id: user_id.into(),
            actions,
            attempts,
            submitted_at: Utc::now(),
        }
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.submitted_at
    }
}

/// Storage for transactions under watch, keyed by hash
pub trait PendingTxStore: Send + Sync {
    /// Insert or replace the entry for `tx.tx_hash`
    fn insert(&self, tx: PendingTransaction);

    fn remove(&self, tx_hash: &str) -> Option<PendingTransaction>;

    /// Point-in-time copy of every entry
    fn snapshot(&self) -> Vec<PendingTransaction>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory pending table
#[derive(Default)]
pub struct MemoryPendingTxStore {
    entries: DashMap<String, PendingTransaction>,
}

impl MemoryPendingTxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingTxStore for MemoryPendingTxStore {
    fn insert(&self, tx: PendingTransaction) {
        self.entries.insert(tx.tx_hash.clone(), tx);
    }

    fn remove(&self, tx_hash: &str) -> Option<PendingTransaction> {
        self.entries.remove(tx_hash).map(|(_, tx)| tx)
    }

    fn snapshot(&self) -> Vec<PendingTransaction> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replace_remove() {
        let store = MemoryPendingTxStore::new();
        assert!(store.is_empty());

        store.insert(PendingTransaction::new("0x1", "user_1", vec![], 0));
        store.insert(PendingTransaction::new("0x1", "user_1", vec![], 2));
        store.insert(PendingTransaction::new("0x2", "user_2", vec![], 0));

        assert_eq!(store.len(), 2);
        assert_eq!(store.remove("0x1").unwrap().attempts, 2);
        assert!(store.remove("0x1").is_none());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_age() {
        let tx = PendingTransaction::new("0x1", "u", vec![], 0);
        let later = tx.submitted_at + chrono::Duration::seconds(301);
        assert_eq!(tx.age_at(later).num_seconds(), 301);
    }
}
