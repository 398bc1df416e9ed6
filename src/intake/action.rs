//! Action payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A client intent, opaque to the core beyond its method name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameAction {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub parameters: JsonValue,
}

/// An action that passed session checks and sits on the work queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    pub session_id: String,
    pub user_id: String,
    /// Wallet the session acts for
    pub account_address: String,
    pub action: GameAction,
    pub timestamp: DateTime<Utc>,
    /// Re-queues after a rejected or timed out submission
    #[serde(default)]
    pub attempts: u32,
}
