//! Configuration for Tollgate
//!
//! CLI arguments and environment variable handling using clap. Every
//! component also has its own `*Config` with defaults, so the library is
//! usable without going through here.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::batch::{BatchConfig, DEFAULT_BATCH_SIZE};
use crate::deploy::{DeployConfig, DEFAULT_ACCOUNT_CLASS_HASH};
use crate::intake::IntakeConfig;
use crate::receipt::{GuardConfig, DEFAULT_STARKNET_RPC};
use crate::session::SessionConfig;
use crate::sponsor::client::DEFAULT_PAYMASTER_URL;
use crate::sponsor::SponsorConfig;

/// Minimum length for a production JWT secret
const MIN_SECRET_LEN: usize = 32;

/// Where the work queue lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueueBackend {
    /// In-process queue, lost on restart
    Memory,
    /// NATS JetStream work-queue streams
    Nats,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Tollgate - gasless action gateway
///
/// Session-keyed intake, batched paymaster sponsorship, receipt tracking.
#[derive(Parser, Debug, Clone)]
#[command(name = "tollgate")]
#[command(about = "Gasless action gateway with session keys and sponsored batching")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Enable development mode (allows a built-in JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Secret for signing session tokens (required outside dev mode)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Session lifetime in seconds
    #[arg(long, env = "SESSION_TTL_SECONDS", default_value = "86400")]
    pub session_ttl_seconds: u64,

    /// Comma-separated methods a session key may call
    #[arg(
        long,
        env = "ALLOWED_METHODS",
        value_delimiter = ',',
        default_value = "game_action,claim_reward,update_score,buy_upgrade"
    )]
    pub allowed_methods: Vec<String>,

    /// Gas ceiling recorded on each session
    #[arg(long, env = "MAX_GAS_PER_TX", default_value = "0.001")]
    pub max_gas_per_tx: String,

    /// Actions per session per minute (0 disables)
    #[arg(long, env = "RATE_LIMIT_PER_MINUTE", default_value = "60")]
    pub rate_limit_per_minute: u32,

    /// Work queue backend
    #[arg(long, env = "QUEUE_BACKEND", value_enum, default_value = "memory")]
    pub queue_backend: QueueBackend,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Paymaster base URL
    #[arg(long, env = "PAYMASTER_URL", default_value = DEFAULT_PAYMASTER_URL)]
    pub paymaster_url: String,

    /// Paymaster API key
    #[arg(long, env = "PAYMASTER_API_KEY", default_value = "", hide_env_values = true)]
    pub paymaster_api_key: String,

    /// Token the paymaster should charge gas in
    #[arg(long, env = "GAS_TOKEN_ADDRESS")]
    pub gas_token_address: Option<String>,

    /// Call target for actions that do not name a contract
    #[arg(long, env = "GAME_CONTRACT_ADDRESS")]
    pub game_contract_address: Option<String>,

    /// Starknet JSON-RPC endpoint
    #[arg(long, env = "STARKNET_RPC", default_value = DEFAULT_STARKNET_RPC)]
    pub starknet_rpc: String,

    /// Account contract class deployed for new wallets
    #[arg(long, env = "ACCOUNT_CLASS_HASH", default_value = DEFAULT_ACCOUNT_CLASS_HASH)]
    pub account_class_hash: String,

    /// Buffered actions that trigger a flush
    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Seconds between receipt polls
    #[arg(long, env = "RECEIPT_POLL_INTERVAL_SECS", default_value = "10")]
    pub receipt_poll_interval_secs: u64,

    /// Seconds before an unconfirmed transaction counts as failed
    #[arg(long, env = "RECEIPT_TIMEOUT_SECS", default_value = "300")]
    pub receipt_timeout_secs: u64,

    /// Re-queues allowed before dead-lettering
    #[arg(long, env = "MAX_REQUEUE_ATTEMPTS", default_value = "3")]
    pub max_requeue_attempts: u32,

    /// Outbound request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode {
            match &self.jwt_secret {
                None => return Err("JWT_SECRET is required in production mode".to_string()),
                Some(secret) if secret.len() < MIN_SECRET_LEN => {
                    return Err(format!(
                        "JWT_SECRET must be at least {} characters",
                        MIN_SECRET_LEN
                    ))
                }
                Some(_) => {}
            }
        }

        if self.batch_size == 0 {
            return Err("BATCH_SIZE must be at least 1".to_string());
        }

        if self.allowed_methods().is_empty() {
            return Err("ALLOWED_METHODS must name at least one method".to_string());
        }

        if self.receipt_poll_interval_secs == 0 {
            return Err("RECEIPT_POLL_INTERVAL_SECS must be at least 1".to_string());
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn allowed_methods(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.allowed_methods
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty() && seen.insert(m.clone()))
            .collect()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ttl: i64::try_from(self.session_ttl_seconds)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX),
            allowed_methods: self.allowed_methods(),
            max_gas_per_tx: self.max_gas_per_tx.clone(),
        }
    }

    pub fn intake_config(&self) -> IntakeConfig {
        IntakeConfig {
            rate_limit_per_minute: self.rate_limit_per_minute,
        }
    }

    pub fn sponsor_config(&self) -> SponsorConfig {
        SponsorConfig {
            base_url: self.paymaster_url.clone(),
            api_key: self.paymaster_api_key.clone(),
            gas_token_address: self.gas_token_address.clone(),
            default_contract: self.game_contract_address.clone(),
            request_timeout: self.request_timeout(),
            ..SponsorConfig::default()
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
        }
    }

    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            poll_interval: Duration::from_secs(self.receipt_poll_interval_secs),
            confirmation_timeout: Duration::from_secs(self.receipt_timeout_secs),
            max_attempts: self.max_requeue_attempts,
            ..GuardConfig::default()
        }
    }

    pub fn deploy_config(&self) -> DeployConfig {
        DeployConfig {
            account_class_hash: self.account_class_hash.clone(),
            ..DeployConfig::default()
        }
    }
}
