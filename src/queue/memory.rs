//! In-process work queue
//!
//! FIFO per queue name with priority insertion and delayed visibility.
//! Jobs handed out sit in an in-flight set until acked; dropping the
//! delivery (consumer task panicked or was cancelled) puts the job back
//! at the head of the queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::types::{Result, TollgateError};

use super::{AckHandle, Delivery, EnqueueOptions, Job, JobId, WorkQueue};

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Job>,
    delayed: Vec<Job>,
    in_flight: HashMap<JobId, Job>,
}

impl QueueState {
    fn push_ready(&mut self, job: Job) {
        let key = job.priority_key();
        let pos = self
            .ready
            .iter()
            .position(|queued| queued.priority_key() > key)
            .unwrap_or(self.ready.len());
        self.ready.insert(pos, job);
    }

    /// Move due delayed jobs onto the ready list, oldest deadline first
    fn promote_due(&mut self) {
        let now = Utc::now();
        if !self.delayed.iter().any(|j| j.is_due_at(now)) {
            return;
        }

        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|j| j.is_due_at(now));
        self.delayed = pending;
        due.sort_by_key(|j| j.not_before);
        for job in due {
            self.push_ready(job);
        }
    }

    fn next_deadline(&self) -> Option<chrono::DateTime<Utc>> {
        self.delayed.iter().filter_map(|j| j.not_before).min()
    }
}

struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    notify: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        // A poisoned lock only means another task panicked mid-update;
        // the queue data is still structurally valid.
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn redeliver(&self, queue: &str, job_id: &str) {
        let mut queues = self.lock();
        if let Some(state) = queues.get_mut(queue) {
            if let Some(job) = state.in_flight.remove(job_id) {
                state.ready.push_front(job);
            }
        }
        drop(queues);
        self.notify.notify_waiters();
    }
}

/// In-memory [`WorkQueue`]
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Inner>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Waiting and delayed jobs, in delivery order (delayed last)
    pub fn snapshot(&self, queue: &str) -> Vec<Job> {
        let queues = self.inner.lock();
        queues
            .get(queue)
            .map(|state| {
                let mut delayed = state.delayed.clone();
                delayed.sort_by_key(|j| j.not_before);
                state.ready.iter().cloned().chain(delayed).collect()
            })
            .unwrap_or_default()
    }

    /// Jobs delivered but not yet acked
    pub fn in_flight(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .get(queue)
            .map_or(0, |state| state.in_flight.len())
    }

    /// Take the next due job without waiting
    pub fn try_next(&self, queue: &str) -> Option<Delivery> {
        let mut queues = self.inner.lock();
        let state = queues.get_mut(queue)?;
        state.promote_due();

        let mut job = state.ready.pop_front()?;
        job.deliveries += 1;
        state.in_flight.insert(job.id.clone(), job.clone());

        let handle = MemoryAck {
            inner: Arc::clone(&self.inner),
            queue: queue.to_string(),
            job_id: job.id.clone(),
            settled: false,
        };
        Some(Delivery::new(job, Box::new(handle)))
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        data: JsonValue,
        options: EnqueueOptions,
    ) -> Result<JobId> {
        let job = Job::new(name, data, options);
        let id = job.id.clone();

        {
            let mut queues = self.inner.lock();
            let state = queues.entry(queue.to_string()).or_default();
            if job.not_before.is_some() {
                state.delayed.push(job);
            } else {
                state.push_ready(job);
            }
        }

        self.inner.notify.notify_waiters();
        debug!(queue = %queue, job_id = %id, job = %name, "Job enqueued");
        Ok(id)
    }

    async fn next(&self, queue: &str) -> Result<Delivery> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_next(queue) {
                return Ok(delivery);
            }

            let deadline = self
                .inner
                .lock()
                .get(queue)
                .and_then(QueueState::next_deadline);

            match deadline {
                Some(at) => {
                    let wait = (at - Utc::now()).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn count(&self, queue: &str) -> Result<usize> {
        Ok(self
            .inner
            .lock()
            .get(queue)
            .map_or(0, |state| state.ready.len() + state.delayed.len()))
    }
}

struct MemoryAck {
    inner: Arc<Inner>,
    queue: String,
    job_id: JobId,
    settled: bool,
}

#[async_trait]
impl AckHandle for MemoryAck {
    async fn ack(mut self: Box<Self>) -> Result<()> {
        self.settled = true;
        let mut queues = self.inner.lock();
        queues
            .get_mut(&self.queue)
            .and_then(|state| state.in_flight.remove(&self.job_id))
            .map(|_| ())
            .ok_or_else(|| TollgateError::Queue(format!("Unknown job {}", self.job_id)))
    }

    async fn nack(mut self: Box<Self>) -> Result<()> {
        self.settled = true;
        self.inner.redeliver(&self.queue, &self.job_id);
        Ok(())
    }
}

impl Drop for MemoryAck {
    fn drop(&mut self) {
        if !self.settled {
            warn!(
                queue = %self.queue,
                job_id = %self.job_id,
                "Delivery dropped without ack, redelivering"
            );
            self.inner.redeliver(&self.queue, &self.job_id);
        }
    }
}
