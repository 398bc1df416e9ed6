//! HTTP paymaster client

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::types::TollgateError;

use super::auth::AuthHeaderCache;
use super::payload::{build_payload, AccountDeployment, SponsorResponse};
use super::retry::{classify_status, RetryPolicy};
use super::{Sponsor, SponsorError, SponsorRequest};

pub const DEFAULT_PAYMASTER_URL: &str = "https://sepolia.paymaster.avnu.fi";

/// Paymaster client configuration
#[derive(Debug, Clone)]
pub struct SponsorConfig {
    pub base_url: String,
    pub api_key: String,
    pub sponsor_path: String,
    pub deployment_path: String,
    /// Token the paymaster charges gas in, if not its default
    pub gas_token_address: Option<String>,
    /// Call target for actions that do not name one
    pub default_contract: Option<String>,
    pub request_timeout: Duration,
    pub auth_ttl: Duration,
    pub transaction_retry: RetryPolicy,
    pub deployment_retry: RetryPolicy,
}

impl Default for SponsorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PAYMASTER_URL.to_string(),
            api_key: String::new(),
            sponsor_path: "/sponsor".to_string(),
            deployment_path: "/sponsor-account-deployment".to_string(),
            gas_token_address: None,
            default_contract: None,
            request_timeout: Duration::from_secs(30),
            auth_ttl: Duration::from_secs(3600),
            transaction_retry: RetryPolicy::transactions(),
            deployment_retry: RetryPolicy::deployment(),
        }
    }
}

/// Paymaster client over reqwest
pub struct SponsorClient {
    config: SponsorConfig,
    http: reqwest::Client,
    auth: AuthHeaderCache,
}

impl SponsorClient {
    pub fn new(config: SponsorConfig) -> Result<Self, TollgateError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("tollgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TollgateError::Config(format!("Failed to build paymaster client: {}", e)))?;

        let auth = AuthHeaderCache::new(config.api_key.clone(), config.auth_ttl);

        Ok(Self { config, http, auth })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Single POST with no retry
    async fn post_once<B>(&self, path: &str, body: &B) -> Result<SponsorResponse, SponsorError>
    where
        B: Serialize + ?Sized,
    {
        let headers = self.auth.headers().await?;
        let response = self
            .http
            .post(self.url(path))
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            let body: JsonValue = serde_json::from_slice(&bytes)
                .map_err(|e| SponsorError::MalformedResponse(e.to_string()))?;
            Ok(SponsorResponse::from_body(body))
        } else {
            let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
            Err(classify_status(status.as_u16(), &body))
        }
    }
}

#[async_trait]
impl Sponsor for SponsorClient {
    async fn sponsor(&self, request: &SponsorRequest) -> Result<SponsorResponse, SponsorError> {
        let payload = build_payload(
            &request.actions,
            self.config.default_contract.as_deref(),
            self.config.gas_token_address.as_deref(),
        )?;

        info!(
            user_id = %request.user_id,
            calls = payload.calls.len(),
            "Requesting sponsorship"
        );

        let path = self.config.sponsor_path.as_str();
        let payload = &payload;
        self.config
            .transaction_retry
            .run("sponsor", move |attempt| {
                debug!(attempt, "Paymaster sponsor attempt");
                self.post_once(path, payload)
            })
            .await
    }

    async fn sponsor_deployment(
        &self,
        deployment: &AccountDeployment,
    ) -> Result<SponsorResponse, SponsorError> {
        let deployment = deployment.normalized()?;

        info!(
            address = %deployment.contract_address,
            "Requesting sponsored account deployment"
        );

        let path = self.config.deployment_path.as_str();
        let deployment = &deployment;
        self.config
            .deployment_retry
            .run("sponsor_deployment", move |attempt| {
                debug!(attempt, "Paymaster deployment attempt");
                self.post_once(path, deployment)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::{GameAction, QueuedAction};
    use bytes::Bytes;
    use chrono::Utc;
    use http_body_util::{BodyExt, Full};
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{HeaderMap, Request, Response};
    use hyper_util::rt::TokioIo;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    struct Seen {
        path: String,
        headers: HeaderMap,
        body: JsonValue,
    }

    struct Stub {
        addr: SocketAddr,
        hits: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    impl Stub {
        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    /// Paymaster stand-in answering with `script[n]` on the n-th request
    /// (the last entry repeats)
    async fn stub(script: Vec<(u16, JsonValue)>) -> Stub {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(script);

        let (server_hits, server_seen) = (Arc::clone(&hits), Arc::clone(&seen));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (hits, seen, script) = (
                    Arc::clone(&server_hits),
                    Arc::clone(&server_seen),
                    Arc::clone(&script),
                );
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let (hits, seen, script) =
                            (Arc::clone(&hits), Arc::clone(&seen), Arc::clone(&script));
                        async move {
                            let path = req.uri().path().to_string();
                            let headers = req.headers().clone();
                            let bytes = req.into_body().collect().await?.to_bytes();
                            let n = hits.fetch_add(1, Ordering::SeqCst);
                            let (status, reply) = script
                                .get(n)
                                .or_else(|| script.last())
                                .cloned()
                                .unwrap();
                            seen.lock().unwrap().push(Seen {
                                path,
                                headers,
                                body: serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null),
                            });
                            Ok::<_, hyper::Error>(
                                Response::builder()
                                    .status(status)
                                    .header("content-type", "application/json")
                                    .body(Full::new(Bytes::from(reply.to_string())))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Stub { addr, hits, seen }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            multiplier: 2,
            max_delay: Duration::from_millis(5),
        }
    }

    fn client(stub: &Stub) -> SponsorClient {
        SponsorClient::new(SponsorConfig {
            base_url: format!("http://{}", stub.addr),
            api_key: "test-api-key".into(),
            request_timeout: Duration::from_secs(5),
            transaction_retry: fast(5),
            deployment_retry: fast(3),
            ..SponsorConfig::default()
        })
        .unwrap()
    }

    fn request(actions: usize, account: &str) -> SponsorRequest {
        let actions = (0..actions)
            .map(|i| QueuedAction {
                session_id: "s1".into(),
                user_id: "user_1".into(),
                account_address: account.into(),
                action: GameAction {
                    id: format!("a{}", i),
                    method: "game_action".into(),
                    parameters: json!({"to": "0x42", "calldata": [i]}),
                },
                timestamp: Utc::now(),
                attempts: 0,
            })
            .collect();
        SponsorRequest {
            user_id: "user_1".into(),
            actions,
        }
    }

    #[tokio::test]
    async fn test_sponsor_sends_payload_and_auth() {
        let stub = stub(vec![(200, json!({"transactionHash": "0xfeed"}))]).await;
        let client = client(&stub);

        let response = client.sponsor(&request(2, "0xabc")).await.unwrap();
        assert_eq!(response.transaction_hash.as_deref(), Some("0xfeed"));

        let seen = stub.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].path, "/sponsor");
        assert_eq!(seen[0].headers.get("api-key").unwrap(), "test-api-key");
        assert!(seen[0].headers.get("x-request-id").is_some());
        assert!(seen[0].body["userAddress"].as_str().unwrap().ends_with("abc"));
        assert_eq!(seen[0].body["calls"].as_array().unwrap().len(), 2);
        assert_eq!(seen[0].body["calls"][1]["calldata"], json!(["1"]));
    }

    #[tokio::test]
    async fn test_rate_limited_then_success() {
        let stub = stub(vec![
            (429, json!({"error": "slow down"})),
            (200, json!({"transaction_hash": "0x1"})),
        ])
        .await;

        let response = client(&stub).sponsor(&request(1, "0xabc")).await.unwrap();
        assert_eq!(response.transaction_hash.as_deref(), Some("0x1"));
        assert_eq!(stub.hits(), 2);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let stub = stub(vec![(401, json!({"error": "bad key"}))]).await;

        let err = client(&stub).sponsor(&request(1, "0xabc")).await.unwrap_err();
        assert!(matches!(err, SponsorError::NonRetryable { status: 401, .. }));
        assert!(err.to_string().contains("Invalid API key"));
        assert_eq!(stub.hits(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_exhausts_five_attempts() {
        let stub = stub(vec![(503, JsonValue::Null)]).await;

        let err = client(&stub).sponsor(&request(1, "0xabc")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(stub.hits(), 5);
    }

    #[tokio::test]
    async fn test_malformed_address_never_hits_network() {
        let stub = stub(vec![(200, json!({"transactionHash": "0x1"}))]).await;

        let err = client(&stub).sponsor(&request(1, "not-an-address")).await.unwrap_err();
        assert!(matches!(err, SponsorError::InvalidPayload(_)));
        assert_eq!(stub.hits(), 0);
    }

    #[tokio::test]
    async fn test_success_without_hash() {
        let stub = stub(vec![(200, JsonValue::String("ok".into()))]).await;
        let response = client(&stub).sponsor(&request(1, "0xabc")).await.unwrap();
        assert!(response.transaction_hash.is_none());
    }

    #[tokio::test]
    async fn test_deployment_uses_smaller_budget() {
        let stub = stub(vec![(500, JsonValue::Null)]).await;
        let deployment = AccountDeployment {
            class_hash: "0x36078".into(),
            constructor_calldata: vec!["0x99".into()],
            contract_address: "0xabc".into(),
            address_salt: "0x99".into(),
        };

        let err = client(&stub).sponsor_deployment(&deployment).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(stub.hits(), 3);
        assert!(stub
            .seen()
            .iter()
            .all(|s| s.path == "/sponsor-account-deployment"));
        assert!(stub.seen()[0].body["classHash"].is_string());
        assert_eq!(stub.seen()[0].body["constructorCalldata"], json!(["0x99"]));
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_error() {
        let client = SponsorClient::new(SponsorConfig {
            base_url: "http://127.0.0.1:1".into(),
            transaction_retry: fast(2),
            request_timeout: Duration::from_secs(2),
            ..SponsorConfig::default()
        })
        .unwrap();

        let err = client.sponsor(&request(1, "0xabc")).await.unwrap_err();
        assert!(matches!(err, SponsorError::Transport(_)));
    }
}
