//! Request Presentation (§4.9): render a request as the `{id, status, cid,
//! streamId, message, createdAt, updatedAt, anchorCommit?, witnessCar?}`
//! schema of §4.3, building and LRU-caching the witness CAR for COMPLETED
//! requests.

use std::str::FromStr;
use std::sync::Arc;

use anchor_core::model::{Request, RequestStatus};
use anchor_core::Error;
use anchor_db::AnchorRepository;
use anchor_ipfs::IpfsService;
use anchor_merkle::car::{Car, CarStore};
use anchor_merkle::witness;
use ceramic_core::Cid;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// LRU cache of built witness CARs keyed by anchor commit CID (§4.9, "LRU
/// ~1000").
pub struct WitnessCache {
    inner: Mutex<LruCache<Cid, Car>>,
}

impl WitnessCache {
    pub fn new(capacity: usize) -> anyhow::Result<Self> {
        let cap = NonZeroUsize::new(capacity).ok_or_else(|| anyhow::anyhow!("{capacity} is not a valid cache size"))?;
        Ok(Self {
            inner: Mutex::new(LruCache::new(cap)),
        })
    }

    async fn get(&self, cid: Cid) -> Option<Car> {
        self.inner.lock().await.get(&cid).cloned()
    }

    async fn put(&self, cid: Cid, car: Car) {
        self.inner.lock().await.put(cid, car);
    }
}

/// A rendered request, independent of wire format; the controller decides
/// whether to serialize this as JSON (witness CAR base64-encoded) or hand
/// back the raw CAR bytes.
#[derive(Debug, Clone)]
pub struct Presentation {
    pub id: Uuid,
    pub status: &'static str,
    pub cid: String,
    pub stream_id: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub anchor_commit_cid: Option<String>,
    pub witness_car: Option<Vec<u8>>,
}

#[allow(clippy::too_many_arguments)]
pub async fn build(
    request: &Request,
    anchor_repo: &AnchorRepository,
    ipfs: &Arc<dyn IpfsService>,
    car_store: &Arc<dyn CarStore>,
    witness_cache: &WitnessCache,
    cancel: &CancellationToken,
) -> anchor_core::Result<Presentation> {
    let mut anchor_commit_cid = None;
    let mut witness_car = None;

    if matches!(request.status, RequestStatus::Completed) {
        if let Some(anchor) = anchor_repo.find_by_request_id(request.id).await? {
            let commit_cid = Cid::from_str(&anchor.cid)
                .map_err(|e| Error::InvalidWitnessCar(format!("stored anchor cid {:?} is invalid: {e}", anchor.cid)))?;
            anchor_commit_cid = Some(anchor.cid.clone());

            if let Some(cached) = witness_cache.get(commit_cid).await {
                witness_car = Some(cached.to_bytes().await.map_err(Error::Other)?);
            } else if let Some(car) = build_witness(&anchor, commit_cid, ipfs, car_store, cancel).await? {
                witness_cache.put(commit_cid, car.clone()).await;
                witness_car = Some(car.to_bytes().await.map_err(Error::Other)?);
            }
        }
    }

    Ok(Presentation {
        id: request.id,
        status: request.status.public_name(),
        cid: request.cid.clone(),
        stream_id: request.stream_id.clone(),
        message: request.message.clone(),
        created_at: request.created_at,
        updated_at: request.updated_at,
        anchor_commit_cid,
        witness_car,
    })
}

/// Fetch the Merkle CAR and the anchor commit block needed to build the
/// witness. Returns `None` (not an error) if the Merkle CAR has expired
/// from the CAR store — the presentation still renders, just without a
/// witness.
async fn build_witness(
    anchor: &anchor_core::model::Anchor,
    commit_cid: Cid,
    ipfs: &Arc<dyn IpfsService>,
    car_store: &Arc<dyn CarStore>,
    cancel: &CancellationToken,
) -> anchor_core::Result<Option<Car>> {
    let proof_cid = Cid::from_str(&anchor.proof_cid)
        .map_err(|e| Error::InvalidWitnessCar(format!("stored proof cid {:?} is invalid: {e}", anchor.proof_cid)))?;

    let Some(merkle_car) = car_store.retrieve_car_file(proof_cid).await else {
        return Ok(None);
    };

    let commit_bytes = ipfs.retrieve_record(&commit_cid, cancel).await?;
    let car = witness::build(commit_cid, &commit_bytes, anchor, &merkle_car)?;
    Ok(Some(car))
}
