//! Runtime status: queue depths, buffered actions, pending transactions
//! and session counts.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::queue::{WorkQueue, DEAD_LETTER_QUEUE, DEPLOYMENT_QUEUE, TRANSACTIONS_QUEUE};
use crate::server::AppState;
use crate::session::SessionStoreStats;

use super::json_response;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// `None` when the backend could not be reached
    pub transactions: Option<usize>,
    pub deployments: Option<usize>,
    pub dead_letters: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub buffered: usize,
    pub batch_size: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: &'static str,
    pub uptime: u64,
    pub queue: QueueStats,
    pub batch: BatchStats,
    pub pending_transactions: usize,
    pub sessions: SessionStoreStats,
}

async fn depth(queue: &dyn WorkQueue, name: &str) -> Option<usize> {
    match queue.count(name).await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(queue = %name, error = %e, "Queue depth unavailable");
            None
        }
    }
}

pub async fn status_check(state: &Arc<AppState>) -> Response<Full<Bytes>> {
    let queue = state.queue.as_ref();
    let response = StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        queue: QueueStats {
            transactions: depth(queue, TRANSACTIONS_QUEUE).await,
            deployments: depth(queue, DEPLOYMENT_QUEUE).await,
            dead_letters: depth(queue, DEAD_LETTER_QUEUE).await,
        },
        batch: BatchStats {
            buffered: state.aggregator.buffered(),
            batch_size: state.args.batch_size,
        },
        pending_transactions: state.guard.pending_count(),
        sessions: state.sessions.stats(),
    };

    json_response(StatusCode::OK, &response)
}
