//! Receipt polling and re-queue

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::intake::QueuedAction;
use crate::queue::{
    enqueue_json, EnqueueOptions, WorkQueue, BATCH_ACTION_JOB, DEAD_LETTER_QUEUE,
    TRANSACTIONS_QUEUE,
};
use crate::types::Result;

use super::chain::ChainReader;
use super::pending::{PendingTransaction, PendingTxStore};
use super::{ChainError, TransactionTracker};

/// Job name for records on the dead-letter queue
pub const DEAD_LETTER_JOB: &str = "dead-letter";

/// Receipt guard configuration
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Time between polling ticks
    pub poll_interval: Duration,
    /// Age after which an unconfirmed transaction counts as failed
    pub confirmation_timeout: Duration,
    /// Re-queues allowed before a record is dead-lettered
    pub max_attempts: u32,
    /// Re-queue delay per attempt (linear)
    pub requeue_delay: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            confirmation_timeout: Duration::from_secs(300),
            max_attempts: 3,
            requeue_delay: Duration::from_secs(5),
        }
    }
}

/// Where a transaction stands after one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Confirmed,
    Rejected,
    TimedOut,
    Pending,
}

/// Result of [`ReceiptGuard::requeue`], in actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequeueOutcome {
    pub requeued: usize,
    pub dead_lettered: usize,
}

/// Counts from one polling tick
///
/// `confirmed` and `still_pending` count transactions; the re-queue
/// counts are per action, since each action carries its own budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub confirmed: usize,
    pub still_pending: usize,
    pub requeued_actions: usize,
    pub dead_lettered_actions: usize,
}

/// Record parked on the dead-letter queue
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter<'a> {
    pub tx_hash: &'a str,
    pub user_id: &'a str,
    pub actions: &'a [QueuedAction],
    pub dead_lettered_at: DateTime<Utc>,
}

/// Watches pending transactions until they settle
pub struct ReceiptGuard {
    config: GuardConfig,
    chain: Arc<dyn ChainReader>,
    pending: Arc<dyn PendingTxStore>,
    queue: Arc<dyn WorkQueue>,
}

impl ReceiptGuard {
    pub fn new(
        config: GuardConfig,
        chain: Arc<dyn ChainReader>,
        pending: Arc<dyn PendingTxStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            config,
            chain,
            pending,
            queue,
        }
    }

    /// Transactions currently under watch
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub async fn check_pending(&self) -> CheckReport {
        self.check_pending_at(Utc::now()).await
    }

    /// Poll every pending transaction once
    ///
    /// Works on a snapshot, so transactions tracked during the tick are
    /// picked up on the next one.
    pub async fn check_pending_at(&self, now: DateTime<Utc>) -> CheckReport {
        let mut report = CheckReport::default();

        for tx in self.pending.snapshot() {
            match self.verdict(&tx, now).await {
                Verdict::Pending => report.still_pending += 1,
                Verdict::Confirmed => {
                    self.pending.remove(&tx.tx_hash);
                    report.confirmed += 1;
                }
                verdict @ (Verdict::Rejected | Verdict::TimedOut) => {
                    warn!(
                        tx_hash = %tx.tx_hash,
                        user_id = %tx.user_id,
                        attempts = tx.attempts,
                        verdict = ?verdict,
                        "Transaction failed, re-queueing actions"
                    );
                    match self.requeue(&tx).await {
                        Ok(outcome) => {
                            self.pending.remove(&tx.tx_hash);
                            report.requeued_actions += outcome.requeued;
                            report.dead_lettered_actions += outcome.dead_lettered;
                        }
                        Err(e) => {
                            // Whatever was not re-queued stays in the table
                            // for the next tick
                            error!(tx_hash = %tx.tx_hash, error = %e, "Re-queue failed");
                            report.still_pending += 1;
                        }
                    }
                }
            }
        }

        if report != CheckReport::default() {
            debug!(?report, "Receipt check complete");
        }
        report
    }

    async fn verdict(&self, tx: &PendingTransaction, now: DateTime<Utc>) -> Verdict {
        match self.chain.transaction_receipt(&tx.tx_hash).await {
            Ok(receipt) if receipt.finality.is_final() => {
                if receipt.is_reverted() {
                    warn!(
                        tx_hash = %tx.tx_hash,
                        user_id = %tx.user_id,
                        revert_reason = receipt.revert_reason.as_deref().unwrap_or("unknown"),
                        "Transaction finalized but reverted"
                    );
                } else {
                    info!(tx_hash = %tx.tx_hash, user_id = %tx.user_id, "Transaction confirmed");
                }
                return Verdict::Confirmed;
            }
            Ok(receipt) if receipt.finality == super::FinalityStatus::Rejected => {
                return Verdict::Rejected;
            }
            Ok(_) | Err(ChainError::NotFound) => {}
            Err(e) => {
                debug!(tx_hash = %tx.tx_hash, error = %e, "Receipt query failed");
            }
        }

        let timeout = chrono::Duration::from_std(self.config.confirmation_timeout)
            .unwrap_or(chrono::Duration::MAX);
        if tx.age_at(now) > timeout {
            Verdict::TimedOut
        } else {
            Verdict::Pending
        }
    }

    /// Put a failed transaction's actions back on the queue, dead-lettering
    /// those whose own re-queue budget is spent
    ///
    /// If the queue fails part way, the entry for `tx` is rewritten to hold
    /// only the actions not yet handed off, so a later call never enqueues
    /// an action twice.
    pub async fn requeue(&self, tx: &PendingTransaction) -> Result<RequeueOutcome> {
        let (exhausted, retryable): (Vec<QueuedAction>, Vec<QueuedAction>) = tx
            .actions
            .iter()
            .cloned()
            .partition(|a| a.attempts >= self.config.max_attempts);

        let mut outcome = RequeueOutcome::default();

        if !exhausted.is_empty() {
            self.dead_letter(tx, &exhausted).await?;
            outcome.dead_lettered = exhausted.len();
        }

        for (i, action) in retryable.iter().enumerate() {
            let attempts = action.attempts + 1;
            let delay = self.config.requeue_delay * attempts;
            let retry = QueuedAction {
                attempts,
                ..action.clone()
            };

            let enqueued = enqueue_json(
                self.queue.as_ref(),
                TRANSACTIONS_QUEUE,
                BATCH_ACTION_JOB,
                &retry,
                EnqueueOptions::delayed(delay),
            )
            .await;

            if let Err(e) = enqueued {
                self.pending.insert(PendingTransaction {
                    actions: retryable[i..].to_vec(),
                    ..tx.clone()
                });
                return Err(e);
            }

            debug!(
                tx_hash = %tx.tx_hash,
                action_id = %action.action.id,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Action re-queued"
            );
            outcome.requeued += 1;
        }

        if outcome.requeued > 0 {
            info!(
                tx_hash = %tx.tx_hash,
                user_id = %tx.user_id,
                actions = outcome.requeued,
                "Actions re-queued"
            );
        }

        Ok(outcome)
    }

    async fn dead_letter(&self, tx: &PendingTransaction, actions: &[QueuedAction]) -> Result<()> {
        let action_ids: Vec<&str> = actions.iter().map(|a| a.action.id.as_str()).collect();
        error!(
            tx_hash = %tx.tx_hash,
            user_id = %tx.user_id,
            max_attempts = self.config.max_attempts,
            action_ids = ?action_ids,
            "Max retries exceeded, actions dead-lettered"
        );

        let record = DeadLetter {
            tx_hash: &tx.tx_hash,
            user_id: &tx.user_id,
            actions,
            dead_lettered_at: Utc::now(),
        };
        enqueue_json(
            self.queue.as_ref(),
            DEAD_LETTER_QUEUE,
            DEAD_LETTER_JOB,
            &record,
            EnqueueOptions::default(),
        )
        .await?;
        Ok(())
    }
}

impl TransactionTracker for ReceiptGuard {
    fn track_transaction(&self, tx: PendingTransaction) {
        info!(
            tx_hash = %tx.tx_hash,
            user_id = %tx.user_id,
            actions = tx.actions.len(),
            attempts = tx.attempts,
            "Tracking transaction"
        );
        self.pending.insert(tx);
    }
}

/// Poll pending transactions on the configured interval
pub fn spawn_guard_task(guard: Arc<ReceiptGuard>) -> JoinHandle<()> {
    let interval = guard.config.poll_interval;
    info!(interval_secs = interval.as_secs(), "Receipt guard started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            guard.check_pending().await;
        }
    })
}
