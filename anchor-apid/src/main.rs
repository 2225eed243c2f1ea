//! The anchor API daemon: serves the HTTP surface of §6 and runs the Ready
//! Scheduler that aggregates PENDING requests into READY batches and emits
//! anchor triggers for `anchor-worker` to consume (§4.4, §4.10).

use std::sync::Arc;
use std::time::Duration;

use anchor_api::AppState;
use anchor_core::{AnchorConfig, Error};
use anchor_db::{AnchorRepository, MetadataRepository, RequestRepository};
use anchor_eth::{AnchorContract, EthAnchorService, EthSettings, EthersAnchorContract, TransactionSubmitter};
use anchor_ipfs::{IpfsService, KuboIpfsService};
use anchor_merkle::car::{CachedCarStore, CarStore, InMemoryCarStore, S3CarStore};
use anchor_service::{
    AnchorService, AnchorTrigger, MetadataService, NullTrigger, PgRecentAnchorLookup, ReadyRunner, Scheduler, WebhookTrigger,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

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
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "anchor_apid=info,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    dotenvy::dotenv().ok();

    let config = AnchorConfig::load()?;
    let eth_settings = EthSettings::load()?;

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = anchor_db::build_pool(&database_url, 10)?;

    let request_repo = RequestRepository::new(pool.clone());
    let anchor_repo = AnchorRepository::new(pool.clone());
    let metadata_repo = MetadataRepository::new(pool.clone());

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

    let metadata_service = MetadataService::new(ipfs_dyn.clone(), metadata_repo);

    let car_store = build_car_store(&config)?;

    let contract = EthersAnchorContract::connect(&eth_settings).await?;
    let supported_chains = vec![contract.chain_name().to_string()];
    let eth_service = EthAnchorService::new(contract, Duration::from_secs(config.eth_step_timeout_secs), config.eth_max_attempts);
    let eth: Arc<dyn TransactionSubmitter> = Arc::new(eth_service);

    let anchor_service = Arc::new(AnchorService::new(
        request_repo.clone(),
        anchor_repo.clone(),
        ipfs_dyn.clone(),
        car_store.clone(),
        eth,
        config.clone(),
    ));

    let state = Arc::new(AppState::new(
        pool.clone(),
        request_repo.clone(),
        anchor_repo,
        metadata_service,
        anchor_service,
        ipfs_dyn,
        car_store,
        config.clone(),
        supported_chains,
    )?);

    let trigger: Arc<dyn AnchorTrigger> = match std::env::var("ANCHOR_TRIGGER_WEBHOOK_URL") {
        Ok(url) => Arc::new(WebhookTrigger::new(url)),
        Err(_) => Arc::new(NullTrigger),
    };
    let ready_runner = Arc::new(ReadyRunner::new(pool, request_repo, trigger, config.clone()));
    let ready_interval = Duration::from_millis(config.scheduler_interval_ms);
    let scheduler = Scheduler::spawn(
        ready_interval,
        move || {
            let runner = ready_runner.clone();
            async move {
                match runner.run_once().await {
                    Ok(claimed) => {
                        if claimed > 0 {
                            tracing::info!(claimed, "claimed a ready batch");
                        }
                        Ok(())
                    }
                    Err(Error::MutexAcquisitionFailed { attempts }) => {
                        tracing::debug!(attempts, "advisory lock held elsewhere, skipping this tick");
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        },
        |_consecutive_failures| {},
    );

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "anchor-apid listening");

    axum::serve(listener, anchor_api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        tracing::error!(%err, "fatal startup error");
        std::process::exit(1);
    }
}
