//! Action Intake
//!
//! Authenticates an action against its session and places it on the
//! `transactions` work queue. The returned position is the queue depth at
//! enqueue time: a hint for the client, not an ordering guarantee.

pub mod action;
pub mod events;
pub mod rate_limit;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::queue::{enqueue_json, EnqueueOptions, WorkQueue, BATCH_ACTION_JOB, TRANSACTIONS_QUEUE};
use crate::session::SessionKeyManager;
use crate::types::{Result, TollgateError};

pub use action::{GameAction, QueuedAction};
pub use events::ActionEvent;
pub use rate_limit::RateLimiter;

/// Intake configuration
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Actions per session per minute (0 disables the limit)
    pub rate_limit_per_minute: u32,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
        }
    }
}

/// Acknowledgement returned to the submitting client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub accepted: bool,
    pub queue_position: usize,
}

/// Authenticated entry point onto the work queue
pub struct ActionIntake {
    sessions: Arc<SessionKeyManager>,
    queue: Arc<dyn WorkQueue>,
    rate_limiter: RateLimiter,
}

impl ActionIntake {
    pub fn new(
        config: IntakeConfig,
        sessions: Arc<SessionKeyManager>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            sessions,
            queue,
            rate_limiter: RateLimiter::new(60_000, config.rate_limit_per_minute),
        }
    }

    /// Validate the session for `action.method` and enqueue the action
    pub async fn submit(&self, token: &str, action: GameAction) -> Result<SubmitReceipt> {
        self.submit_at(token, action, Utc::now()).await
    }

    pub async fn submit_at(
        &self,
        token: &str,
        action: GameAction,
        now: DateTime<Utc>,
    ) -> Result<SubmitReceipt> {
        if action.id.is_empty() {
            return Err(TollgateError::BadRequest("action.id is required".into()));
        }

        let session = self
            .sessions
            .validate_and_resolve_at(token, &action.method, now)?;

        if !self
            .rate_limiter
            .check_and_record(&session.session_id, now.timestamp_millis())
        {
            warn!(session_id = %session.session_id, "Action rate limit exceeded");
            return Err(TollgateError::RateLimited);
        }

        let queued = QueuedAction {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            account_address: session.master_address.clone(),
            action,
            timestamp: now,
            attempts: 0,
        };

        let enqueued = enqueue_json(
            self.queue.as_ref(),
            TRANSACTIONS_QUEUE,
            BATCH_ACTION_JOB,
            &queued,
            EnqueueOptions::default(),
        )
        .await;

        // Only accepted actions count against the limit
        if let Err(e) = enqueued {
            self.rate_limiter
                .release(&queued.session_id, now.timestamp_millis());
            return Err(e);
        }

        let queue_position = self.queue.count(TRANSACTIONS_QUEUE).await?;

        debug!(
            user_id = %queued.user_id,
            action_id = %queued.action.id,
            method = %queued.action.method,
            queue_position,
            "Action queued"
        );

        Ok(SubmitReceipt {
            accepted: true,
            queue_position,
        })
    }

    /// Forget rate-limit windows that have gone idle
    pub fn cleanup(&self) {
        self.rate_limiter.cleanup(Utc::now().timestamp_millis());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::session::{MemorySessionStore, SessionConfig, SessionTokenCodec};
    use serde_json::json;
    use tokio_test::assert_ok;

    fn setup(rate_limit: u32) -> (ActionIntake, Arc<SessionKeyManager>, MemoryQueue) {
        let sessions = Arc::new(SessionKeyManager::new(
            SessionConfig::default(),
            SessionTokenCodec::new_dev(),
            Arc::new(MemorySessionStore::new()),
        ));
        let queue = MemoryQueue::new();
        let intake = ActionIntake::new(
            IntakeConfig {
                rate_limit_per_minute: rate_limit,
            },
            Arc::clone(&sessions),
            Arc::new(queue.clone()),
        );
        (intake, sessions, queue)
    }

    fn action(id: &str, method: &str) -> GameAction {
        GameAction {
            id: id.into(),
            method: method.into(),
            parameters: json!({"x": 1}),
        }
    }

    #[tokio::test]
    async fn test_submit_enqueues_with_position() {
        let (intake, sessions, queue) = setup(0);
        let token = sessions.create_session("user_1", "0xabc").unwrap();

        let first = intake.submit(&token, action("a1", "game_action")).await.unwrap();
        let second = intake.submit(&token, action("a2", "claim_reward")).await.unwrap();

        assert!(first.accepted);
        assert_eq!(first.queue_position, 1);
        assert_eq!(second.queue_position, 2);

        let jobs = queue.snapshot(TRANSACTIONS_QUEUE);
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.name == BATCH_ACTION_JOB));

        // Same session keeps submission order
        let decoded: Vec<QueuedAction> = jobs.iter().map(|j| j.decode().unwrap()).collect();
        assert_eq!(decoded[0].action.id, "a1");
        assert_eq!(decoded[1].action.id, "a2");
        assert_eq!(decoded[0].user_id, "user_1");
        assert_eq!(decoded[0].account_address, "0xabc");
        assert_eq!(decoded[0].attempts, 0);
    }

    #[tokio::test]
    async fn test_disallowed_method_is_not_queued() {
        let (intake, sessions, queue) = setup(0);
        let token = sessions.create_session("user_1", "0xabc").unwrap();

        let result = intake.submit(&token, action("a1", "withdraw_all")).await;
        assert!(matches!(result, Err(TollgateError::MethodNotAllowed(_))));
        assert_eq!(queue.count(TRANSACTIONS_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_session_is_not_queued() {
        let (intake, sessions, queue) = setup(0);
        let created = Utc::now() - chrono::Duration::hours(25);
        let token = sessions.create_session_at("user_1", "0xabc", created).unwrap();

        let result = intake.submit(&token, action("a1", "game_action")).await;
        assert!(matches!(result, Err(TollgateError::SessionExpired)));
        assert_eq!(queue.count(TRANSACTIONS_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_token_is_invalid_session() {
        let (intake, _, _) = setup(0);
        let result = intake.submit("garbage", action("a1", "game_action")).await;
        assert!(matches!(result, Err(TollgateError::InvalidSession)));
    }

    #[tokio::test]
    async fn test_rate_limit_per_session() {
        let (intake, sessions, _) = setup(2);
        let token = sessions.create_session("user_1", "0xabc").unwrap();
        let other = sessions.create_session("user_2", "0xdef").unwrap();

        assert_ok!(intake.submit(&token, action("a1", "game_action")).await);
        assert_ok!(intake.submit(&token, action("a2", "game_action")).await);
        assert!(matches!(
            intake.submit(&token, action("a3", "game_action")).await,
            Err(TollgateError::RateLimited)
        ));
        assert_ok!(intake.submit(&other, action("b1", "game_action")).await);
    }

    #[tokio::test]
    async fn test_empty_action_id_rejected() {
        let (intake, sessions, _) = setup(0);
        let token = sessions.create_session("user_1", "0xabc").unwrap();
        let result = intake.submit(&token, action("", "game_action")).await;
        assert!(matches!(result, Err(TollgateError::BadRequest(_))));
    }
}
