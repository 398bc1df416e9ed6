//! NATS JetStream work queue
//!
//! One work-queue-retention stream per queue name, consumed through a
//! durable pull consumer with explicit acks. JetStream redelivers anything
//! not acked within `ack_wait`, which gives at-least-once delivery across
//! process restarts.
//!
//! JetStream has no native delayed publish, so delayed jobs carry
//! `not_before` and are NAK'ed with the remaining delay until due.

use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream, AckKind};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::NatsArgs;
use crate::types::{Result, TollgateError};

use super::{AckHandle, Delivery, EnqueueOptions, Job, JobId, WorkQueue};

/// JetStream queue settings
#[derive(Debug, Clone)]
pub struct JetStreamQueueConfig {
    /// Subject prefix; a queue publishes on `<prefix>.<queue>`
    pub subject_prefix: String,
    /// Stream name prefix
    pub stream_prefix: String,
    /// How long a delivery may stay unacked before redelivery
    pub ack_wait: Duration,
    /// Pull request expiry while waiting for work
    pub fetch_expiry: Duration,
    /// Retention for unconsumed jobs
    pub max_age: Duration,
}

impl Default for JetStreamQueueConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "tollgate.queue".to_string(),
            stream_prefix: "TOLLGATE".to_string(),
            ack_wait: Duration::from_secs(30),
            fetch_expiry: Duration::from_secs(5),
            max_age: Duration::from_secs(24 * 3600),
        }
    }
}

struct QueueHandles {
    stream: Stream,
    consumer: PullConsumer,
}

/// [`WorkQueue`] backed by NATS JetStream
pub struct JetStreamQueue {
    config: JetStreamQueueConfig,
    jetstream: jetstream::Context,
    queues: Mutex<HashMap<String, QueueHandles>>,
}

impl JetStreamQueue {
    /// Connect to NATS and build a queue client
    pub async fn connect(args: &NatsArgs, config: JetStreamQueueConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        let mut options = async_nats::ConnectOptions::new()
            .name("tollgate-queue")
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| TollgateError::Queue(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self {
            config,
            jetstream: jetstream::new(client),
            queues: Mutex::new(HashMap::new()),
        })
    }

    fn subject(&self, queue: &str) -> String {
        format!("{}.{}", self.config.subject_prefix, queue)
    }

    fn stream_name(&self, queue: &str) -> String {
        format!("{}_{}", self.config.stream_prefix, sanitize(queue))
    }

    /// Get or create the stream and consumer for a queue
    async fn consumer(&self, queue: &str) -> Result<PullConsumer> {
        let mut queues = self.queues.lock().await;
        if let Some(handles) = queues.get(queue) {
            return Ok(handles.consumer.clone());
        }

        let handles = self.ensure_queue(queue).await?;
        let consumer = handles.consumer.clone();
        queues.insert(queue.to_string(), handles);
        Ok(consumer)
    }

    async fn ensure_queue(&self, queue: &str) -> Result<QueueHandles> {
        let stream_name = self.stream_name(queue);
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name.clone(),
                subjects: vec![self.subject(queue)],
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                storage: jetstream::stream::StorageType::File,
                max_age: self.config.max_age,
                ..Default::default()
            })
            .await
            .map_err(|e| TollgateError::Queue(format!("Failed to create stream: {}", e)))?;

        let consumer_name = format!("{}_worker", sanitize(queue));
        let consumer = stream
            .get_or_create_consumer(
                &consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(consumer_name.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| TollgateError::Queue(format!("Failed to create consumer: {}", e)))?;

        info!(stream = %stream_name, consumer = %consumer_name, "Using JetStream queue");
        Ok(QueueHandles { stream, consumer })
    }
}

#[async_trait]
impl WorkQueue for JetStreamQueue {
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        data: JsonValue,
        options: EnqueueOptions,
    ) -> Result<JobId> {
        // Make sure the stream exists before publishing into it
        self.consumer(queue).await?;

        let job = Job::new(name, data, options);
        let payload = serde_json::to_vec(&job)
            .map_err(|e| TollgateError::Internal(format!("Failed to encode job: {}", e)))?;

        self.jetstream
            .publish(self.subject(queue), payload.into())
            .await
            .map_err(|e| TollgateError::Queue(format!("Publish failed: {}", e)))?
            .await
            .map_err(|e| TollgateError::Queue(format!("Publish not acknowledged: {}", e)))?;

        debug!(queue = %queue, job_id = %job.id, job = %name, "Job published");
        Ok(job.id)
    }

    async fn next(&self, queue: &str) -> Result<Delivery> {
        let consumer = self.consumer(queue).await?;

        loop {
            let mut messages = consumer
                .fetch()
                .max_messages(1)
                .expires(self.config.fetch_expiry)
                .messages()
                .await
                .map_err(|e| TollgateError::Queue(format!("Failed to fetch messages: {}", e)))?;

            while let Some(result) = messages.next().await {
                let message = match result {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Error receiving message: {}", e);
                        continue;
                    }
                };

                let mut job: Job = match serde_json::from_slice(&message.payload) {
                    Ok(job) => job,
                    Err(e) => {
                        warn!("Dropping malformed job on {}: {}", queue, e);
                        if let Err(e) = message.ack().await {
                            warn!("Failed to ack malformed message: {}", e);
                        }
                        continue;
                    }
                };

                let now = Utc::now();
                if let Some(not_before) = job.not_before.filter(|t| *t > now) {
                    let remaining = (not_before - now).to_std().unwrap_or_default();
                    if let Err(e) = message.ack_with(AckKind::Nak(Some(remaining))).await {
                        warn!("Failed to defer job {}: {}", job.id, e);
                    }
                    continue;
                }

                if let Ok(info) = message.info() {
                    job.deliveries = u32::try_from(info.delivered).unwrap_or(u32::MAX);
                }

                return Ok(Delivery::new(job, Box::new(JetStreamAck { message })));
            }
        }
    }

    async fn count(&self, queue: &str) -> Result<usize> {
        self.consumer(queue).await?;

        let mut queues = self.queues.lock().await;
        let handles = queues
            .get_mut(queue)
            .ok_or_else(|| TollgateError::Queue(format!("Unknown queue {}", queue)))?;

        let info = handles
            .stream
            .info()
            .await
            .map_err(|e| TollgateError::Queue(format!("Failed to read stream info: {}", e)))?;

        Ok(info.state.messages as usize)
    }
}

struct JetStreamAck {
    message: jetstream::Message,
}

#[async_trait]
impl AckHandle for JetStreamAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| TollgateError::Queue(format!("Ack failed: {}", e)))
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| TollgateError::Queue(format!("Nak failed: {}", e)))
    }
}

/// Stream and consumer names allow only `[A-Za-z0-9_-]`
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
