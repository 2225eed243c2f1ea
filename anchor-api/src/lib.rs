//! The HTTP surface of §6: the Request Controller's routes plus the
//! ambient `/healthz`/`/readyz` endpoints, grounded on
//! `bonapart3-guardrail::chain-anchor`'s axum `Router`/`AppState`/
//! `TraceLayer`/`CorsLayer` wiring.

mod controller;
mod error;
mod presentation;

use std::sync::Arc;

use anchor_core::AnchorConfig;
use anchor_db::{AnchorRepository, PgPool, RequestRepository};
use anchor_ipfs::IpfsService;
use anchor_merkle::car::CarStore;
use anchor_service::{AnchorService, MetadataService};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use presentation::WitnessCache;

pub struct AppState {
    pub pool: PgPool,
    pub request_repo: RequestRepository,
    pub anchor_repo: AnchorRepository,
    pub metadata_service: MetadataService,
    pub anchor_service: Arc<AnchorService>,
    pub ipfs: Arc<dyn IpfsService>,
    pub car_store: Arc<dyn CarStore>,
    pub witness_cache: WitnessCache,
    pub config: AnchorConfig,
    /// `["eip155:<id>"]`, rendered verbatim by `GET /service-info/supported_chains`.
    pub supported_chains: Vec<String>,
}

#[allow(clippy::too_many_arguments)]
impl AppState {
    pub fn new(
        pool: PgPool,
        request_repo: RequestRepository,
        anchor_repo: AnchorRepository,
        metadata_service: MetadataService,
        anchor_service: Arc<AnchorService>,
        ipfs: Arc<dyn IpfsService>,
        car_store: Arc<dyn CarStore>,
        config: AnchorConfig,
        supported_chains: Vec<String>,
    ) -> anyhow::Result<Self> {
        let witness_cache = WitnessCache::new(config.witness_cache_size)?;
        Ok(Self {
            pool,
            request_repo,
            anchor_repo,
            metadata_service,
            anchor_service,
            ipfs,
            car_store,
            witness_cache,
            config,
            supported_chains,
        })
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// A trivial always-absent lookup, just to prove the pool can reach Postgres.
async fn readyz(state: axum::extract::State<Arc<AppState>>) -> StatusCode {
    match state.request_repo.find_by_id(uuid::Uuid::nil()).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/v0/requests", post(controller::create_request))
        .route("/api/v0/requests/:cid", get(controller::get_request))
        .route("/api/v0/anchors", post(controller::run_anchor))
        .route(
            "/api/v0/service-info/supported_chains",
            get(controller::supported_chains),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
