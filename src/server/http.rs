//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection, upgrades enabled for
//! the game WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::batch::BatchAggregator;
use crate::config::Args;
use crate::deploy::DeployConfig;
use crate::intake::ActionIntake;
use crate::queue::WorkQueue;
use crate::receipt::ReceiptGuard;
use crate::routes;
use crate::server::websocket;
use crate::session::SessionKeyManager;
use crate::types::TollgateError;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Session issuance and token validation
    pub sessions: Arc<SessionKeyManager>,
    /// Authenticated entry onto the work queue
    pub intake: Arc<ActionIntake>,
    pub queue: Arc<dyn WorkQueue>,
    /// Partial batch, reported by /status
    pub aggregator: Arc<BatchAggregator>,
    /// Pending transactions, reported by /status
    pub guard: Arc<ReceiptGuard>,
    pub deploy: DeployConfig,
    pub started_at: Instant,
}

pub async fn run(state: Arc<AppState>) -> Result<(), TollgateError> {
    let listener = TcpListener::bind(state.args.listen).await?;
    serve(listener, state).await
}

/// Accept loop on an already bound listener
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), TollgateError> {
    info!("Tollgate listening on {}", listener.local_addr()?);

    if state.args.dev_mode {
        warn!("Development mode enabled - insecure session secret allowed");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(&state)
        }

        (Method::GET, "/version") => routes::version_info(),

        (Method::GET, "/status") => routes::status_check(&state).await,

        (Method::POST, "/session/create") => {
            routes::handle_create_session(&state, req).await
        }

        (Method::POST, "/game/action") => routes::handle_game_action(&state, req).await,

        (Method::GET, "/game/ws") => {
            if hyper_tungstenite::is_upgrade_request(&req) {
                websocket::handle_game_upgrade(Arc::clone(&state), req, addr)
            } else {
                routes::bad_request_response("WebSocket upgrade required for /game/ws")
            }
        }

        (Method::POST, "/wallet/deploy") => routes::handle_deploy_wallet(&state, req).await,

        (Method::OPTIONS, _) => routes::preflight_response(),

        _ => routes::not_found_response(&path),
    };

    Ok(to_boxed(response))
}

/// Convert a Full<Bytes> body to BoxBody
pub fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// State wired to in-memory backends; the paymaster and chain clients
/// point at real URLs but are never called by the route tests
#[cfg(test)]
pub(crate) fn test_state() -> Arc<AppState> {
    use crate::batch::BatchConfig;
    use crate::intake::IntakeConfig;
    use crate::queue::MemoryQueue;
    use crate::receipt::{GuardConfig, MemoryPendingTxStore, RpcChainReader};
    use crate::session::{MemorySessionStore, SessionConfig, SessionTokenCodec};
    use crate::sponsor::{SponsorClient, SponsorConfig};
    use clap::Parser;

    let args = Args::try_parse_from(["tollgate", "--dev-mode"]).unwrap();
    let queue: Arc<dyn WorkQueue> = Arc::new(MemoryQueue::new());
    let sessions = Arc::new(SessionKeyManager::new(
        SessionConfig::default(),
        SessionTokenCodec::new_dev(),
        Arc::new(MemorySessionStore::new()),
    ));
    let intake = Arc::new(ActionIntake::new(
        IntakeConfig::default(),
        Arc::clone(&sessions),
        Arc::clone(&queue),
    ));
    let chain = Arc::new(RpcChainReader::new(
        "http://127.0.0.1:1",
        std::time::Duration::from_secs(1),
    ));
    let guard = Arc::new(ReceiptGuard::new(
        GuardConfig::default(),
        chain,
        Arc::new(MemoryPendingTxStore::new()),
        Arc::clone(&queue),
    ));
    let sponsor = Arc::new(SponsorClient::new(SponsorConfig::default()).unwrap());
    let aggregator = Arc::new(BatchAggregator::new(
        BatchConfig::default(),
        sponsor,
        guard.clone(),
    ));

    Arc::new(AppState {
        args,
        sessions,
        intake,
        queue,
        aggregator,
        guard,
        deploy: DeployConfig::default(),
        started_at: Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{DEPLOYMENT_QUEUE, TRANSACTIONS_QUEUE};
    use serde_json::{json, Value as JsonValue};

    /// Serve `state` on an ephemeral port, returning the base URL
    async fn spawn(state: Arc<AppState>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));
        format!("http://{}", addr)
    }

    async fn post(url: &str, body: JsonValue) -> (u16, JsonValue) {
        let response = reqwest::Client::new().post(url).json(&body).send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_session_then_action() {
        let state = test_state();
        let base = spawn(Arc::clone(&state)).await;

        let (status, body) = post(
            &format!("{}/session/create", base),
            json!({"userId": "user_1", "walletAddress": "0xabc"}),
        )
        .await;
        assert_eq!(status, 200);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = post(
            &format!("{}/game/action", base),
            json!({
                "sessionToken": token,
                "action": {"id": "a1", "method": "game_action", "parameters": {"x": 1}}
            }),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"actionId": "a1", "status": "queued", "batchPosition": 1}));
        assert_eq!(state.queue.count(TRANSACTIONS_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_action_errors_carry_status() {
        let state = test_state();
        let token = state.sessions.create_session("user_1", "0xabc").unwrap();
        let base = spawn(Arc::clone(&state)).await;
        let url = format!("{}/game/action", base);

        let (status, body) = post(
            &url,
            json!({"sessionToken": token, "action": {"id": "a1", "method": "withdraw_all"}}),
        )
        .await;
        assert_eq!(status, 403);
        assert_eq!(body["actionId"], "a1");
        assert!(body["error"].as_str().unwrap().contains("withdraw_all"));

        let (status, body) = post(
            &url,
            json!({"sessionToken": "nope", "action": {"id": "a2", "method": "game_action"}}),
        )
        .await;
        assert_eq!(status, 401);
        assert_eq!(body["error"], "Invalid session");

        let (status, _) = post(&url, json!({"action": {}})).await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_session_requires_fields() {
        let base = spawn(test_state()).await;
        let (status, _) = post(
            &format!("{}/session/create", base),
            json!({"userId": "", "walletAddress": "0xabc"}),
        )
        .await;
        assert_eq!(status, 400);

        for wallet in ["", "abc", "0xnot-hex"] {
            let (status, body) = post(
                &format!("{}/session/create", base),
                json!({"userId": "user_1", "walletAddress": wallet}),
            )
            .await;
            assert_eq!(status, 400, "{wallet}");
            assert!(body["error"].as_str().unwrap().contains("walletAddress"));
        }
    }

    #[tokio::test]
    async fn test_wallet_deploy_is_queued() {
        let state = test_state();
        let base = spawn(Arc::clone(&state)).await;

        let (status, body) = post(
            &format!("{}/wallet/deploy", base),
            json!({"address": "0xabc", "publicKey": "0x123", "userId": "user_1"}),
        )
        .await;
        assert_eq!(status, 202);
        assert_eq!(body["deploymentStatus"], "queued");
        assert_eq!(state.queue.count(DEPLOYMENT_QUEUE).await.unwrap(), 1);

        let (status, _) = post(
            &format!("{}/wallet/deploy", base),
            json!({"address": "abc", "publicKey": "0x123"}),
        )
        .await;
        assert_eq!(status, 400);

        for key in ["zz", "", "123"] {
            let (status, body) = post(
                &format!("{}/wallet/deploy", base),
                json!({"address": "0xabc", "publicKey": key}),
            )
            .await;
            assert_eq!(status, 400, "{key}");
            assert!(body["error"].as_str().unwrap().contains("publicKey"));
        }
        assert_eq!(state.queue.count(DEPLOYMENT_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_health_version_status_endpoints() {
        let base = spawn(test_state()).await;
        let client = reqwest::Client::new();

        let health: JsonValue = client
            .get(format!("{}/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["healthy"], true);
        assert_eq!(health["queueBackend"], "memory");

        let version: JsonValue = client
            .get(format!("{}/version", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(version["service"], "tollgate");

        let status: JsonValue = client
            .get(format!("{}/status", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["queue"]["transactions"], 0);
        assert_eq!(status["batch"]["batchSize"], 100);
        assert_eq!(status["pendingTransactions"], 0);

        let missing = client.get(format!("{}/nope", base)).send().await.unwrap();
        assert_eq!(missing.status().as_u16(), 404);

        let plain_ws = client.get(format!("{}/game/ws", base)).send().await.unwrap();
        assert_eq!(plain_ws.status().as_u16(), 400);
    }
}
