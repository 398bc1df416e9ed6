//! Durable work queue boundary
//!
//! The queue is the only hand-off between intake, the batch aggregator and
//! the receipt guard. Delivery is at-least-once: a [`Delivery`] that is
//! dropped without being acked becomes visible again.
//!
//! Two backends:
//! - **Memory**: in-process, for single-node deployments and tests
//! - **JetStream**: NATS work-queue streams, survives process restarts

pub mod jetstream;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::types::{Result, TollgateError};

pub use self::jetstream::{JetStreamQueue, JetStreamQueueConfig};
pub use memory::MemoryQueue;

/// Queue carrying user actions and re-queued retries
pub const TRANSACTIONS_QUEUE: &str = "transactions";
/// Job name for a single queued action
pub const BATCH_ACTION_JOB: &str = "batch-action";
/// Queue carrying account deployment requests
pub const DEPLOYMENT_QUEUE: &str = "wallet-deployment";
/// Job name for an account deployment
pub const DEPLOY_ACCOUNT_JOB: &str = "deploy-account";
/// Terminal failures parked for manual handling
pub const DEAD_LETTER_QUEUE: &str = "transactions-dead-letter";

pub type JobId = String;

/// Options for [`WorkQueue::enqueue`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Keep the job invisible for this long
    pub delay: Option<Duration>,
    /// Lower value is served first; unset jobs go last
    pub priority: Option<u8>,
}

impl EnqueueOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            priority: None,
        }
    }
}

/// A unit of work on a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub data: JsonValue,
    #[serde(default)]
    pub priority: Option<u8>,
    pub enqueued_at: DateTime<Utc>,
    /// Not visible to consumers before this instant
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    /// Times this job has been handed to a consumer
    #[serde(default)]
    pub deliveries: u32,
}

impl Job {
    pub fn new(name: impl Into<String>, data: JsonValue, options: EnqueueOptions) -> Self {
        let now = Utc::now();
        let not_before = options
            .delay
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now + d);

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            data,
            priority: options.priority,
            enqueued_at: now,
            not_before,
            deliveries: 0,
        }
    }

    /// Decode the job payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            TollgateError::Queue(format!("Malformed {} job {}: {}", self.name, self.id, e))
        })
    }

    /// Whether the job is visible at `now`
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |t| t <= now)
    }

    fn priority_key(&self) -> u16 {
        self.priority.map_or(u16::MAX, u16::from)
    }
}

/// Settles a delivered job with the backend
#[async_trait]
pub trait AckHandle: Send {
    /// Mark the job done
    async fn ack(self: Box<Self>) -> Result<()>;
    /// Return the job to the queue for redelivery
    async fn nack(self: Box<Self>) -> Result<()>;
}

/// A job handed to a consumer, pending acknowledgement
pub struct Delivery {
    job: Job,
    handle: Box<dyn AckHandle>,
}

impl Delivery {
    pub fn new(job: Job, handle: Box<dyn AckHandle>) -> Self {
        Self { job, handle }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub async fn ack(self) -> Result<()> {
        self.handle.ack().await
    }

    pub async fn nack(self) -> Result<()> {
        self.handle.nack().await
    }
}

/// Durable, at-least-once work queue
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a job, returning its id
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        data: JsonValue,
        options: EnqueueOptions,
    ) -> Result<JobId>;

    /// Wait for the next visible job
    async fn next(&self, queue: &str) -> Result<Delivery>;

    /// Jobs waiting or delayed (not yet acknowledged)
    async fn count(&self, queue: &str) -> Result<usize>;
}

/// Serialize `payload` and enqueue it
pub async fn enqueue_json<T: Serialize + Sync>(
    queue: &dyn WorkQueue,
    queue_name: &str,
    job_name: &str,
    payload: &T,
    options: EnqueueOptions,
) -> Result<JobId> {
    let data = serde_json::to_value(payload)
        .map_err(|e| TollgateError::Internal(format!("Failed to encode job: {}", e)))?;
    queue.enqueue(queue_name, job_name, data, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_delay_sets_not_before() {
        let job = Job::new("x", json!({}), EnqueueOptions::delayed(Duration::from_secs(5)));
        let not_before = job.not_before.unwrap();

        assert!(!job.is_due_at(job.enqueued_at));
        assert!(job.is_due_at(not_before));
        assert_eq!((not_before - job.enqueued_at).num_seconds(), 5);
    }

    #[test]
    fn test_job_without_delay_is_due() {
        let job = Job::new("x", json!({"a": 1}), EnqueueOptions::default());
        assert!(job.is_due_at(job.enqueued_at));
        assert_eq!(job.priority_key(), u16::MAX);
    }

    #[test]
    fn test_decode_reports_job() {
        let job = Job::new("batch-action", json!({"a": 1}), EnqueueOptions::default());
        let err = job.decode::<Vec<u8>>().unwrap_err();
        assert!(err.to_string().contains("batch-action"));
    }
}
