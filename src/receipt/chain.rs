//! Chain state reader
//!
//! Only one query matters to the guard: where a transaction is on its way
//! to finality.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use super::ChainError;

pub const DEFAULT_STARKNET_RPC: &str = "https://starknet-sepolia.public.blastapi.io";

/// JSON-RPC error code for an unknown transaction hash
const TXN_HASH_NOT_FOUND: i64 = 29;

/// Finality of a transaction as reported by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalityStatus {
    Received,
    AcceptedOnL2,
    AcceptedOnL1,
    Rejected,
    Other(String),
}

impl FinalityStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "RECEIVED" => Self::Received,
            "ACCEPTED_ON_L2" => Self::AcceptedOnL2,
            "ACCEPTED_ON_L1" => Self::AcceptedOnL1,
            "REJECTED" => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::AcceptedOnL2 | Self::AcceptedOnL1)
    }
}

/// The parts of a receipt the gateway cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub finality: FinalityStatus,
    pub execution_status: Option<String>,
    pub revert_reason: Option<String>,
}

impl TransactionReceipt {
    /// Parse a receipt object; finality comes from `finality_status`, or
    /// `status` on older nodes
    pub fn from_json(value: &JsonValue) -> Result<Self, ChainError> {
        let field = |name: &str| value.get(name).and_then(JsonValue::as_str);

        let finality = field("finality_status")
            .or_else(|| field("status"))
            .map(FinalityStatus::parse)
            .ok_or_else(|| ChainError::Malformed(format!("receipt has no status: {}", value)))?;

        Ok(Self {
            finality,
            execution_status: field("execution_status").map(str::to_string),
            revert_reason: field("revert_reason").map(str::to_string),
        })
    }

    pub fn is_reverted(&self) -> bool {
        self.execution_status.as_deref() == Some("REVERTED")
    }
}

/// Read-only view of the ledger
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Fails with [`ChainError::NotFound`] for unknown hashes
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt, ChainError>;
}

/// Starknet JSON-RPC reader
pub struct RpcChainReader {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcChainReader {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tollgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: JsonValue) -> Result<JsonValue, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Rpc {
                code: i64::from(status.as_u16()),
                message: format!("HTTP {}", status),
            });
        }

        let mut body: JsonValue = response
            .json()
            .await
            .map_err(|e| ChainError::Malformed(e.to_string()))?;

        if let Some(error) = body.get("error") {
            let code = error.get("code").and_then(JsonValue::as_i64).unwrap_or_default();
            let message = error
                .get("message")
                .and_then(JsonValue::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(if code == TXN_HASH_NOT_FOUND {
                ChainError::NotFound
            } else {
                ChainError::Rpc { code, message }
            });
        }

        body.get_mut("result")
            .map(JsonValue::take)
            .ok_or_else(|| ChainError::Malformed("response has neither result nor error".into()))
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<TransactionReceipt, ChainError> {
        debug!(tx_hash = %tx_hash, "Fetching transaction receipt");
        let result = self
            .call(
                "starknet_getTransactionReceipt",
                json!({ "transaction_hash": tx_hash }),
            )
            .await?;
        TransactionReceipt::from_json(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    /// Node stand-in answering every request with `reply`
    async fn node(reply: JsonValue) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let reply = reply.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |_req: Request<Incoming>| {
                        let body = Bytes::from(reply.to_string());
                        async move { Ok::<_, hyper::Error>(Response::new(Full::new(body))) }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_receipt_status_fields() {
        let current = TransactionReceipt::from_json(&json!({
            "finality_status": "ACCEPTED_ON_L2",
            "execution_status": "SUCCEEDED"
        }))
        .unwrap();
        assert!(current.finality.is_final());
        assert!(!current.is_reverted());

        let legacy = TransactionReceipt::from_json(&json!({"status": "REJECTED"})).unwrap();
        assert_eq!(legacy.finality, FinalityStatus::Rejected);

        let reverted = TransactionReceipt::from_json(&json!({
            "finality_status": "ACCEPTED_ON_L1",
            "execution_status": "REVERTED",
            "revert_reason": "out of moves"
        }))
        .unwrap();
        assert!(reverted.is_reverted());
        assert_eq!(reverted.revert_reason.as_deref(), Some("out of moves"));

        assert!(TransactionReceipt::from_json(&json!({})).is_err());
        assert!(!FinalityStatus::parse("RECEIVED").is_final());
    }

    #[tokio::test]
    async fn test_rpc_receipt() {
        let url = node(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"finality_status": "ACCEPTED_ON_L2", "execution_status": "SUCCEEDED"}
        }))
        .await;

        let reader = RpcChainReader::new(url, Duration::from_secs(5));
        let receipt = reader.transaction_receipt("0x1").await.unwrap();
        assert_eq!(receipt.finality, FinalityStatus::AcceptedOnL2);
    }

    #[tokio::test]
    async fn test_rpc_not_found() {
        let url = node(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": 29, "message": "Transaction hash not found"}
        }))
        .await;

        let reader = RpcChainReader::new(url, Duration::from_secs(5));
        assert!(matches!(
            reader.transaction_receipt("0x1").await,
            Err(ChainError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_rpc_other_error() {
        let url = node(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32603, "message": "Internal error"}
        }))
        .await;

        let reader = RpcChainReader::new(url, Duration::from_secs(5));
        assert!(matches!(
            reader.transaction_receipt("0x1").await,
            Err(ChainError::Rpc { code: -32603, .. })
        ));
    }
}
