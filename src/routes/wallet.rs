//! Account deployment requests

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::deploy::{request_deployment, UserWallet};
use crate::server::AppState;
use crate::sponsor::canonical_address;
use crate::types::{Result, TollgateError};

use super::{error_response, json_response, read_json};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentQueued {
    pub job_id: String,
    pub address: String,
    pub deployment_status: &'static str,
}

/// POST /wallet/deploy
pub async fn handle_deploy_wallet(
    state: &Arc<AppState>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let result = match read_json::<UserWallet>(req).await {
        Ok(wallet) => queue_deployment(state, wallet).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(queued) => json_response(StatusCode::ACCEPTED, &queued),
        Err(e) => {
            warn!(error = %e, "Deployment request rejected");
            error_response(&e)
        }
    }
}

async fn queue_deployment(state: &AppState, wallet: UserWallet) -> Result<DeploymentQueued> {
    canonical_address(&wallet.address)
        .map_err(|e| TollgateError::BadRequest(format!("address: {}", e)))?;
    // Sent as constructor calldata and salt, so it must be a felt
    canonical_address(&wallet.public_key)
        .map_err(|e| TollgateError::BadRequest(format!("publicKey: {}", e)))?;

    let address = wallet.address.clone();
    let job_id =
        request_deployment(state.queue.as_ref(), wallet, state.deploy.enqueue_delay).await?;

    Ok(DeploymentQueued {
        job_id,
        address,
        deployment_status: "queued",
    })
}
