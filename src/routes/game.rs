//! Action submission over HTTP

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::intake::{ActionIntake, GameAction, SubmitReceipt};
use crate::server::AppState;
use crate::types::Result;

use super::{error_response, json_response, read_json};

/// Submissions tried per request when the queue is unavailable
const SUBMIT_ATTEMPTS: u32 = 3;
const SUBMIT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameActionRequest {
    pub session_token: String,
    pub action: GameAction,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionAccepted {
    pub action_id: String,
    pub status: &'static str,
    pub batch_position: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRejected {
    pub action_id: String,
    pub error: String,
}

/// POST /game/action
pub async fn handle_game_action(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let body = match read_json::<GameActionRequest>(req).await {
        Ok(body) => body,
        Err(e) => return error_response(&e),
    };

    let action_id = body.action.id.clone();
    match submit_with_retry(&state.intake, &body.session_token, body.action, SUBMIT_BACKOFF).await
    {
        Ok(receipt) => json_response(
            StatusCode::OK,
            &ActionAccepted {
                action_id,
                status: "queued",
                batch_position: receipt.queue_position,
            },
        ),
        Err(e) => {
            warn!(action_id = %action_id, error = %e, "Action submission failed");
            json_response(
                e.status_code(),
                &ActionRejected {
                    action_id,
                    error: e.to_string(),
                },
            )
        }
    }
}

/// Client errors fail at once; infrastructure errors are retried with
/// doubling backoff
async fn submit_with_retry(
    intake: &ActionIntake,
    token: &str,
    action: GameAction,
    backoff: Duration,
) -> Result<SubmitReceipt> {
    let mut attempt = 1;
    loop {
        match intake.submit(token, action.clone()).await {
            Ok(receipt) => return Ok(receipt),
            Err(e) if e.is_client_error() || attempt >= SUBMIT_ATTEMPTS => return Err(e),
            Err(e) => {
                let delay = backoff * 2u32.pow(attempt - 1);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Action submission failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
