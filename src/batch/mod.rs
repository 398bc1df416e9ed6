//! Batch Aggregator
//!
//! Folds queued actions into one buffer and, once it holds `batch_size`
//! actions, submits it to the paymaster one user at a time. Hashes that
//! come back are handed to the receipt guard.
//!
//! There is no flush timer: a partial batch waits for more traffic (or
//! for shutdown, see [`BatchAggregator::flush`]).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::intake::QueuedAction;
use crate::queue::{Delivery, WorkQueue, BATCH_ACTION_JOB, TRANSACTIONS_QUEUE};
use crate::receipt::{PendingTransaction, TransactionTracker};
use crate::sponsor::{Sponsor, SponsorRequest, SponsorResponse};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Aggregator configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Buffer length that triggers a flush
    pub batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// What one flush did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Per-user groups attempted
    pub groups: usize,
    /// Groups that produced a tracked transaction
    pub submitted: usize,
    pub failed: usize,
    /// Actions lost because their group failed before a hash existed
    pub dropped_actions: usize,
}

/// Stable partition by user: groups in order of first appearance, actions
/// in buffer order within each group
pub fn group_by_user(actions: Vec<QueuedAction>) -> Vec<(String, Vec<QueuedAction>)> {
    let mut groups: Vec<(String, Vec<QueuedAction>)> = Vec::new();
    for action in actions {
        match groups.iter_mut().find(|(user, _)| *user == action.user_id) {
            Some((_, group)) => group.push(action),
            None => groups.push((action.user_id.clone(), vec![action])),
        }
    }
    groups
}

pub struct BatchAggregator {
    config: BatchConfig,
    buffer: Mutex<Vec<QueuedAction>>,
    /// Mirrors `buffer.len()`; readable while a flush holds the lock
    buffered: AtomicUsize,
    sponsor: Arc<dyn Sponsor>,
    tracker: Arc<dyn TransactionTracker>,
}

impl BatchAggregator {
    pub fn new(
        config: BatchConfig,
        sponsor: Arc<dyn Sponsor>,
        tracker: Arc<dyn TransactionTracker>,
    ) -> Self {
        Self {
            config,
            buffer: Mutex::new(Vec::new()),
            buffered: AtomicUsize::new(0),
            sponsor,
            tracker,
        }
    }

    /// Actions waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Append one action, flushing if the buffer is full
    pub async fn handle(&self, action: QueuedAction) -> Option<FlushReport> {
        if self.push(action).await {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Append without flushing; true once the buffer has reached batch size
    async fn push(&self, action: QueuedAction) -> bool {
        let mut buffer = self.buffer.lock().await;
        buffer.push(action);
        self.buffered.store(buffer.len(), Ordering::Relaxed);
        buffer.len() >= self.config.batch_size
    }

    /// Submit everything buffered, one sponsor call per user
    ///
    /// The buffer stays locked for the whole flush and is emptied only
    /// after every group has been attempted.
    pub async fn flush(&self) -> FlushReport {
        let mut buffer = self.buffer.lock().await;
        let mut report = FlushReport::default();
        if buffer.is_empty() {
            return report;
        }

        let total = buffer.len();
        let groups = group_by_user(buffer.clone());
        report.groups = groups.len();
        info!(actions = total, users = report.groups, "Flushing batch");

        for (user_id, actions) in groups {
            let count = actions.len();
            if self.submit_group(user_id, actions).await {
                report.submitted += 1;
            } else {
                report.failed += 1;
                report.dropped_actions += count;
            }
        }

        buffer.clear();
        self.buffered.store(0, Ordering::Relaxed);

        if report.failed > 0 {
            warn!(
                failed = report.failed,
                dropped_actions = report.dropped_actions,
                "Batch flushed with failures"
            );
        }
        report
    }

    async fn submit_group(&self, user_id: String, actions: Vec<QueuedAction>) -> bool {
        let request = SponsorRequest { user_id, actions };

        let response = match self.sponsor.sponsor(&request).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    user_id = %request.user_id,
                    actions = request.actions.len(),
                    error = %e,
                    "Batch submission failed"
                );
                return false;
            }
        };

        let SponsorResponse {
            transaction_hash,
            body,
        } = response;
        let Some(tx_hash) = transaction_hash else {
            error!(
                user_id = %request.user_id,
                body = %body,
                "Paymaster response carried no transaction hash"
            );
            return false;
        };

        let attempts = request.actions.iter().map(|a| a.attempts).max().unwrap_or(0);
        self.tracker.track_transaction(PendingTransaction::new(
            tx_hash,
            request.user_id,
            request.actions,
            attempts,
        ));
        true
    }

    /// Fold one delivery into the buffer, ack it, then flush if full
    pub async fn process(&self, delivery: Delivery) -> Option<FlushReport> {
        let job = delivery.job();
        if job.name != BATCH_ACTION_JOB {
            warn!(job_id = %job.id, job = %job.name, "Unexpected job on transactions queue");
            ack(delivery).await;
            return None;
        }

        let action: QueuedAction = match job.decode() {
            Ok(action) => action,
            Err(e) => {
                warn!(error = %e, "Discarding malformed action job");
                ack(delivery).await;
                return None;
            }
        };

        debug!(
            action_id = %action.action.id,
            user_id = %action.user_id,
            attempts = action.attempts,
            "Action received"
        );

        let full = self.push(action).await;
        ack(delivery).await;

        if full {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Consume the transactions queue forever
    pub async fn run(self: Arc<Self>, queue: Arc<dyn WorkQueue>) {
        info!(batch_size = self.config.batch_size, "Batch aggregator started");
        loop {
            match queue.next(TRANSACTIONS_QUEUE).await {
                Ok(delivery) => {
                    self.process(delivery).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to fetch from transactions queue");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

async fn ack(delivery: Delivery) {
    let job_id = delivery.job().id.clone();
    if let Err(e) = delivery.ack().await {
        warn!(job_id = %job_id, error = %e, "Failed to ack job");
    }
}

pub fn spawn_aggregator_task(
    aggregator: Arc<BatchAggregator>,
    queue: Arc<dyn WorkQueue>,
) -> JoinHandle<()> {
    tokio::spawn(aggregator.run(queue))
}
