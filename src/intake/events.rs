//! Per-action notifications for real-time clients

use serde::{Deserialize, Serialize};

use crate::types::Result;

use super::SubmitReceipt;

/// Outcome of a submission, pushed to the submitting client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ActionEvent {
    #[serde(rename = "actionConfirmed", rename_all = "camelCase")]
    Confirmed {
        action_id: String,
        status: String,
        batch_position: usize,
    },

    #[serde(rename = "actionError", rename_all = "camelCase")]
    Error { action_id: String, error: String },
}

impl ActionEvent {
    pub fn from_result(action_id: impl Into<String>, result: &Result<SubmitReceipt>) -> Self {
        let action_id = action_id.into();
        match result {
            Ok(receipt) => Self::Confirmed {
                action_id,
                status: "queued".to_string(),
                batch_position: receipt.queue_position,
            },
            Err(e) => Self::Error {
                action_id,
                error: e.to_string(),
            },
        }
    }
}
