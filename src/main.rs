//! Tollgate - gasless action gateway

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tollgate::{
    batch::{spawn_aggregator_task, BatchAggregator},
    config::{Args, LogFormat, QueueBackend},
    deploy::{spawn_deployment_task, DeploymentWorker},
    intake::ActionIntake,
    queue::{JetStreamQueue, JetStreamQueueConfig, MemoryQueue, WorkQueue},
    receipt::{spawn_guard_task, MemoryPendingTxStore, ReceiptGuard, RpcChainReader},
    server::{self, AppState},
    session::{MemorySessionStore, SessionKeyManager, SessionTokenCodec},
    sponsor::SponsorClient,
};

/// Interval for forgetting idle rate-limit windows
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("tollgate={},info", args.log_level).into());
    let json = args.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Tollgate - gasless action gateway");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Queue: {:?}", args.queue_backend);
    info!("Paymaster: {}", args.paymaster_url);
    info!("Starknet RPC: {}", args.starknet_rpc);
    info!("Batch size: {}", args.batch_size);
    info!("======================================");

    let codec = match args.jwt_secret.as_deref() {
        Some(secret) => SessionTokenCodec::new(secret)?,
        None => {
            warn!("No JWT_SECRET set, using the development secret");
            SessionTokenCodec::new_dev()
        }
    };

    let queue: Arc<dyn WorkQueue> = match args.queue_backend {
        QueueBackend::Memory => Arc::new(MemoryQueue::new()),
        QueueBackend::Nats => {
            match JetStreamQueue::connect(&args.nats, JetStreamQueueConfig::default()).await {
                Ok(queue) => Arc::new(queue),
                Err(e) if args.dev_mode => {
                    warn!("NATS connection failed (dev mode, using in-memory queue): {}", e);
                    Arc::new(MemoryQueue::new())
                }
                Err(e) => {
                    error!("NATS connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    let sessions = Arc::new(SessionKeyManager::new(
        args.session_config(),
        codec,
        Arc::new(MemorySessionStore::new()),
    ));
    let intake = Arc::new(ActionIntake::new(
        args.intake_config(),
        Arc::clone(&sessions),
        Arc::clone(&queue),
    ));

    let chain = Arc::new(RpcChainReader::new(&args.starknet_rpc, args.request_timeout()));
    let sponsor = Arc::new(SponsorClient::new(args.sponsor_config())?);

    let guard = Arc::new(ReceiptGuard::new(
        args.guard_config(),
        chain.clone(),
        Arc::new(MemoryPendingTxStore::new()),
        Arc::clone(&queue),
    ));
    let aggregator = Arc::new(BatchAggregator::new(
        args.batch_config(),
        sponsor.clone(),
        guard.clone(),
    ));
    let deployer = Arc::new(DeploymentWorker::new(args.deploy_config(), sponsor, chain));

    spawn_aggregator_task(Arc::clone(&aggregator), Arc::clone(&queue));
    spawn_guard_task(Arc::clone(&guard));
    spawn_deployment_task(deployer, Arc::clone(&queue));

    let cleanup_intake = Arc::clone(&intake);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(RATE_LIMIT_CLEANUP_INTERVAL).await;
            cleanup_intake.cleanup();
        }
    });

    let state = Arc::new(AppState {
        deploy: args.deploy_config(),
        args,
        sessions,
        intake,
        queue,
        aggregator: Arc::clone(&aggregator),
        guard,
        started_at: Instant::now(),
    });

    tokio::select! {
        result = server::run(state) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, flushing partial batch");
            let report = aggregator.flush().await;
            info!(
                groups = report.groups,
                submitted = report.submitted,
                failed = report.failed,
                "Final flush complete"
            );
        }
    }

    Ok(())
}
