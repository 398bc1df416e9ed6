//! Session creation

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::server::AppState;
use crate::sponsor::canonical_address;
use crate::types::TollgateError;

use super::{error_response, json_response, read_json};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub wallet_address: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub token: String,
}

/// POST /session/create
pub async fn handle_create_session(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let result = match read_json::<CreateSessionRequest>(req).await {
        Ok(body) => create_session(state, &body),
        Err(e) => Err(e),
    };

    match result {
        Ok(token) => json_response(StatusCode::OK, &CreateSessionResponse { token }),
        Err(e) => {
            warn!(error = %e, "Session creation rejected");
            error_response(&e)
        }
    }
}

fn create_session(state: &AppState, body: &CreateSessionRequest) -> Result<String, TollgateError> {
    if body.user_id.trim().is_empty() {
        return Err(TollgateError::BadRequest("userId is required".into()));
    }
    // Every later sponsor call uses this as userAddress
    canonical_address(&body.wallet_address)
        .map_err(|e| TollgateError::BadRequest(format!("walletAddress: {}", e)))?;
    state
        .sessions
        .create_session(&body.user_id, &body.wallet_address)
}
