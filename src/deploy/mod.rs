//! Sponsored account deployment
//!
//! Consumes `deploy-account` jobs, has the paymaster deploy the account
//! contract, then waits for the deployment to reach finality. Outcomes are
//! logged; the job is acked whether or not the deployment succeeded.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::queue::{
    enqueue_json, Delivery, EnqueueOptions, JobId, WorkQueue, DEPLOYMENT_QUEUE, DEPLOY_ACCOUNT_JOB,
};
use crate::receipt::{ChainError, ChainReader, FinalityStatus, TransactionReceipt};
use crate::sponsor::{AccountDeployment, Sponsor, SponsorError};
use crate::types::Result;

/// OpenZeppelin account contract class
pub const DEFAULT_ACCOUNT_CLASS_HASH: &str =
    "0x036078334509b514626504edc9fb252328d1a240e4e948bef8d0c08dff45927f";

#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub account_class_hash: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
    /// Delay before a requested deployment becomes visible to the worker
    pub enqueue_delay: Duration,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            account_class_hash: DEFAULT_ACCOUNT_CLASS_HASH.to_string(),
            poll_interval: Duration::from_secs(2),
            max_polls: 60,
            enqueue_delay: Duration::from_secs(5),
        }
    }
}

/// Account to deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWallet {
    pub address: String,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Payload of a `deploy-account` job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployAccountJob {
    pub user_wallet: UserWallet,
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error(transparent)]
    Sponsor(#[from] SponsorError),

    #[error("Paymaster response missing transaction hash")]
    MissingHash,

    #[error("Transaction reverted: {tx_hash}, reason: {reason}")]
    Reverted { tx_hash: String, reason: String },

    #[error("Transaction rejected: {tx_hash}")]
    Rejected { tx_hash: String },

    #[error("Transaction receipt timeout: {tx_hash}")]
    Timeout { tx_hash: String },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Queue a deployment with the configured delay and high priority
pub async fn request_deployment(
    queue: &dyn WorkQueue,
    wallet: UserWallet,
    delay: Duration,
) -> Result<JobId> {
    let job = DeployAccountJob {
        user_wallet: wallet,
    };
    let options = EnqueueOptions {
        delay: Some(delay),
        priority: Some(1),
    };
    let id = enqueue_json(queue, DEPLOYMENT_QUEUE, DEPLOY_ACCOUNT_JOB, &job, options).await?;
    info!(
        address = %job.user_wallet.address,
        job_id = %id,
        "Account deployment queued"
    );
    Ok(id)
}

pub struct DeploymentWorker {
    config: DeployConfig,
    sponsor: Arc<dyn Sponsor>,
    chain: Arc<dyn ChainReader>,
}

impl DeploymentWorker {
    pub fn new(config: DeployConfig, sponsor: Arc<dyn Sponsor>, chain: Arc<dyn ChainReader>) -> Self {
        Self {
            config,
            sponsor,
            chain,
        }
    }

    /// The public key doubles as constructor argument and address salt
    pub fn deployment_for(&self, wallet: &UserWallet) -> AccountDeployment {
        AccountDeployment {
            class_hash: self.config.account_class_hash.clone(),
            constructor_calldata: vec![wallet.public_key.clone()],
            contract_address: wallet.address.clone(),
            address_salt: wallet.public_key.clone(),
        }
    }

    /// Deploy `wallet` and wait for the transaction to settle
    pub async fn deploy(&self, wallet: &UserWallet) -> std::result::Result<String, DeployError> {
        let response = self
            .sponsor
            .sponsor_deployment(&self.deployment_for(wallet))
            .await?;
        let tx_hash = response.transaction_hash.ok_or(DeployError::MissingHash)?;

        debug!(address = %wallet.address, tx_hash = %tx_hash, "Deployment submitted");
        self.await_receipt(&tx_hash).await?;
        Ok(tx_hash)
    }

    async fn await_receipt(
        &self,
        tx_hash: &str,
    ) -> std::result::Result<TransactionReceipt, DeployError> {
        for poll in 1..=self.config.max_polls {
            match self.chain.transaction_receipt(tx_hash).await {
                Ok(receipt) if receipt.is_reverted() => {
                    return Err(DeployError::Reverted {
                        tx_hash: tx_hash.to_string(),
                        reason: receipt
                            .revert_reason
                            .unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                Ok(receipt) if receipt.finality.is_final() => return Ok(receipt),
                Ok(receipt) if receipt.finality == FinalityStatus::Rejected => {
                    return Err(DeployError::Rejected {
                        tx_hash: tx_hash.to_string(),
                    });
                }
                Ok(_) | Err(ChainError::NotFound) => {}
                Err(e) => return Err(e.into()),
            }

            if poll < self.config.max_polls {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        Err(DeployError::Timeout {
            tx_hash: tx_hash.to_string(),
        })
    }

    /// Handle one delivery; always acks
    pub async fn process(&self, delivery: Delivery) -> Option<std::result::Result<String, DeployError>> {
        let decoded = delivery.job().decode::<DeployAccountJob>();
        let outcome = match decoded {
            Ok(job) => {
                let result = self.deploy(&job.user_wallet).await;
                match &result {
                    Ok(tx_hash) => info!(
                        address = %job.user_wallet.address,
                        tx_hash = %tx_hash,
                        "Account deployed successfully"
                    ),
                    Err(e) => error!(
                        address = %job.user_wallet.address,
                        error = %e,
                        "Account deployment failed"
                    ),
                }
                Some(result)
            }
            Err(e) => {
                warn!(error = %e, "Discarding malformed deployment job");
                None
            }
        };

        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "Failed to ack deployment job");
        }
        outcome
    }

    pub async fn run(self: Arc<Self>, queue: Arc<dyn WorkQueue>) {
        info!("Deployment worker started");
        loop {
            match queue.next(DEPLOYMENT_QUEUE).await {
                Ok(delivery) => {
                    self.process(delivery).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to fetch from deployment queue");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

pub fn spawn_deployment_task(
    worker: Arc<DeploymentWorker>,
    queue: Arc<dyn WorkQueue>,
) -> JoinHandle<()> {
    tokio::spawn(worker.run(queue))
}
