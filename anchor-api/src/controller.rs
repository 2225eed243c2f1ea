//! Request Controller (§4.3): parse, fill metadata, dedupe/replace, persist,
//! and render a request; plus the synchronous `POST /api/v0/anchors`
//! trigger and the supported-chains service-info endpoint of §6.

use std::sync::Arc;

use anchor_core::model::{FreshRequest, RequestStatus, MESSAGE_PENDING};
use anchor_core::{parser, Error};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{body::Bytes, Json};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::presentation::{self, Presentation};
use crate::AppState;

const CAR_CONTENT_TYPE: &str = "application/vnd.ipld.car";

#[derive(Serialize)]
struct RequestBody {
    id: uuid::Uuid,
    status: &'static str,
    cid: String,
    #[serde(rename = "streamId")]
    stream_id: String,
    message: String,
    #[serde(rename = "createdAt")]
    created_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "updatedAt")]
    updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "anchorCommit", skip_serializing_if = "Option::is_none")]
    anchor_commit: Option<AnchorCommitBody>,
    #[serde(rename = "witnessCar", skip_serializing_if = "Option::is_none")]
    witness_car: Option<String>,
}

#[derive(Serialize)]
struct AnchorCommitBody {
    cid: String,
}

impl From<Presentation> for RequestBody {
    fn from(p: Presentation) -> Self {
        Self {
            id: p.id,
            status: p.status,
            cid: p.cid,
            stream_id: p.stream_id,
            message: p.message,
            created_at: p.created_at,
            updated_at: p.updated_at,
            anchor_commit: p.anchor_commit_cid.map(|cid| AnchorCommitBody { cid }),
            witness_car: p.witness_car.map(|bytes| {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.encode(bytes)
            }),
        }
    }
}

/// Render either a JSON body or, when the client asked for a CAR, the raw
/// witness CAR bytes (§4.9).
fn render(status: StatusCode, presentation: Presentation, headers: &HeaderMap) -> axum::response::Response {
    let wants_car = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains(CAR_CONTENT_TYPE))
        .unwrap_or(false);

    if wants_car {
        if let Some(bytes) = &presentation.witness_car {
            return (status, [(axum::http::header::CONTENT_TYPE, CAR_CONTENT_TYPE)], bytes.clone()).into_response();
        }
    }

    (status, Json(RequestBody::from(presentation))).into_response()
}

fn origin_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
}

/// `POST /api/v0/requests` (§4.3 steps 1-5): parse, fill metadata, dedupe on
/// `cid` (idempotent create), mark older requests on the same stream
/// REPLACED, respond 201 with the presentation.
pub async fn create_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<axum::response::Response, ApiError> {
    let is_car = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains(CAR_CONTENT_TYPE))
        .unwrap_or(false);

    let parsed = if is_car {
        let car = anchor_merkle::car::Car::from_bytes(&body).await.map_err(Error::Other)?;
        let root = car
            .roots
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidRequest("CAR request has no root".into()))?;
        parser::parse_car(&car.blocks, root)?
    } else {
        parser::parse_json(&body)?
    };

    let cancel = CancellationToken::new();
    state.metadata_service.fill(&parsed.stream_id, &cancel).await?;

    let fresh = FreshRequest {
        cid: parsed.cid.to_string(),
        stream_id: parsed.stream_id.to_string(),
        status: RequestStatus::Pending,
        origin: origin_of(&headers),
        timestamp: parsed.timestamp,
        message: MESSAGE_PENDING.to_string(),
    };

    let request = state.request_repo.create(fresh).await?;
    state.request_repo.mark_replaced(&request).await?;

    let presentation = presentation::build(
        &request,
        &state.anchor_repo,
        &state.ipfs,
        &state.car_store,
        &state.witness_cache,
        &cancel,
    )
    .await?;

    Ok(render(StatusCode::CREATED, presentation, &headers))
}

/// `GET /api/v0/requests/:cid` (§6): 404 via `RequestNotFound` if unknown.
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<axum::response::Response, ApiError> {
    let request = state
        .request_repo
        .find_by_cid(cid.clone())
        .await?
        .ok_or_else(|| Error::RequestNotFound(cid))?;

    let cancel = CancellationToken::new();
    let presentation = presentation::build(
        &request,
        &state.anchor_repo,
        &state.ipfs,
        &state.car_store,
        &state.witness_cache,
        &cancel,
    )
    .await?;

    Ok(render(StatusCode::OK, presentation, &headers))
}

/// `POST /api/v0/anchors` (§6): synchronously run one batch-anchoring pass
/// under the cross-process advisory mutex (§4.10).
pub async fn run_anchor(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let guard = anchor_db::acquire_mutex(
        &state.pool,
        state.config.advisory_lock_key,
        state.config.advisory_lock_retries,
        std::time::Duration::from_millis(state.config.advisory_lock_retry_delay_ms),
    )
    .await?;

    let cancel = CancellationToken::new();
    let outcome = state.anchor_service.anchor_requests(&cancel).await?;
    guard.release().await?;
    Ok((StatusCode::OK, format!("{outcome:?}")))
}

#[derive(Serialize)]
struct SupportedChainsBody {
    #[serde(rename = "supportedChains")]
    supported_chains: Vec<String>,
}

/// `GET /api/v0/service-info/supported_chains` (§6).
pub async fn supported_chains(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SupportedChainsBody {
        supported_chains: state.supported_chains.clone(),
    })
}
