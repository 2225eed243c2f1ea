//! The anchor worker: a long-running process that consumes anchor triggers
//! by periodically running one batch-anchoring pass under the cross-process
//! advisory mutex (§4.5, §4.10). Exit codes follow §6: 0 on a clean
//! shutdown, 1 on a fatal startup error, 2 if the scheduler accumulates too
//! many consecutive failures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anchor_core::{AnchorConfig, Error};
use anchor_db::{AnchorRepository, RequestRepository};
use anchor_eth::{EthAnchorService, EthSettings, EthersAnchorContract, TransactionSubmitter};
use anchor_ipfs::{IpfsService, KuboIpfsService};
use anchor_merkle::car::{CachedCarStore, CarStore, InMemoryCarStore, S3CarStore};
use anchor_service::{AnchorService, PgRecentAnchorLookup, Scheduler};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Consecutive scheduler failures after which the process gives up and
/// exits with code 2, ceding the batch to another worker replica.
const FATAL_FAILURE_THRESHOLD: u32 = 10;

fn build_car_store(config: &AnchorConfig) -> anyhow::Result<Arc<dyn CarStore>> {
    let store: Arc<dyn CarStore> = match std::env::var("CAR_STORE_BACKEND").as_deref() {
        Ok("s3") => {
            let endpoint = std::env::var("CAR_STORE_S3_ENDPOINT")?;
            let bucket_prefix = std::env::var("CAR_STORE_S3_BUCKET_PREFIX").unwrap_or_else(|_| "cas-merkle-cars".to_string());
            Arc::new(CachedCarStore::new(S3CarStore::new(endpoint, bucket_prefix), config.ipfs_cache_size)?)
        }
        _ => Arc::new(CachedCarStore::new(InMemoryCarStore::new(), config.ipfs_cache_size)?),
    };
    Ok(store)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, starting graceful shutdown");
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "anchor_worker=info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    dotenvy::dotenv().ok();

    let config = AnchorConfig::load()?;
    let eth_settings = EthSettings::load()?;

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = anchor_db::build_pool(&database_url, 10)?;

    let request_repo = RequestRepository::new(pool.clone());
    let anchor_repo = AnchorRepository::new(pool.clone());

    let ipfs_api_url = std::env::var("IPFS_API_URL").unwrap_or_else(|_| "http://127.0.0.1:5001".to_string());
    let pubsub_topic = std::env::var("PUBSUB_TOPIC").unwrap_or_else(|_| "/ceramic/anchors".to_string());
    let recent_anchor_lookup = Arc::new(PgRecentAnchorLookup::new(anchor_repo.clone()));
    let ipfs = Arc::new(
        KuboIpfsService::new(
            ipfs_api_url,
            config.ipfs_cache_size,
            Duration::from_secs(config.ipfs_get_timeout_secs),
            Duration::from_secs(config.ipfs_put_timeout_secs),
            config.ipfs_get_retries,
            pubsub_topic,
        )?
        .with_recent_anchor_lookup(recent_anchor_lookup, Duration::from_secs(config.pubsub_freshness_window_secs)),
    );
    let ipfs_dyn: Arc<dyn IpfsService> = ipfs.clone();
    ipfs.spawn_query_responder(CancellationToken::new());

    let car_store = build_car_store(&config)?;

    let contract = EthersAnchorContract::connect(&eth_settings).await?;
    let eth_service = EthAnchorService::new(contract, Duration::from_secs(config.eth_step_timeout_secs), config.eth_max_attempts);
    let eth: Arc<dyn TransactionSubmitter> = Arc::new(eth_service);

    let anchor_service = Arc::new(AnchorService::new(
        request_repo,
        anchor_repo,
        ipfs_dyn,
        car_store,
        eth,
        config.clone(),
    ));

    let fatal_shutdown = Arc::new(tokio::sync::Notify::new());
    let exit_code = Arc::new(AtomicU32::new(0));

    let interval = Duration::from_millis(config.scheduler_interval_ms);
    let task_service = anchor_service.clone();
    let task_pool = pool.clone();
    let lock_key = config.advisory_lock_key;
    let lock_retries = config.advisory_lock_retries;
    let lock_retry_delay = Duration::from_millis(config.advisory_lock_retry_delay_ms);
    let fatal_shutdown_for_task = fatal_shutdown.clone();
    let exit_code_for_task = exit_code.clone();
    let scheduler = Scheduler::spawn(
        interval,
        move || {
            let service = task_service.clone();
            let pool = task_pool.clone();
            async move {
                let guard = match anchor_db::acquire_mutex(&pool, lock_key, lock_retries, lock_retry_delay).await {
                    Ok(guard) => guard,
                    Err(Error::MutexAcquisitionFailed { attempts }) => {
                        tracing::debug!(attempts, "advisory lock held elsewhere, skipping this tick");
                        return Ok(());
                    }
                    Err(err) => return Err(err),
                };

                let cancel = CancellationToken::new();
                let result = match service.anchor_requests(&cancel).await {
                    Ok(outcome) => {
                        tracing::info!(?outcome, "anchor run complete");
                        Ok(())
                    }
                    Err(err) => Err(err),
                };
                guard.release().await?;
                result
            }
        },
        move |consecutive_failures| {
            if consecutive_failures >= FATAL_FAILURE_THRESHOLD {
                exit_code_for_task.store(2, Ordering::SeqCst);
                fatal_shutdown_for_task.notify_one();
            }
        },
    );

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = fatal_shutdown.notified() => {
            tracing::error!("scheduler exceeded failure threshold, shutting down");
        }
    }

    scheduler.stop().await;

    let code = exit_code.load(Ordering::SeqCst);
    if code != 0 {
        std::process::exit(code as i32);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!(%err, "fatal startup error");
        std::process::exit(1);
    }
}
