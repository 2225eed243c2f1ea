//! Anchor Service (§4.5): the core pipeline. Claims the current READY
//! batch, resolves per-stream conflicts, builds a Merkle tree over the
//! surviving candidates, submits the root to the configured chain, mints an
//! anchor commit per leaf, persists, and publishes.

use std::collections::HashMap;
use std::sync::Arc;

use anchor_core::model::{Candidate, Transaction, MESSAGE_ANCHORED};
use anchor_core::{AnchorConfig, Error};
use anchor_db::{AnchorRepository, RequestRepository};
use anchor_eth::TransactionSubmitter;
use anchor_ipfs::IpfsService;
use anchor_merkle::car::{Car, CarStore};
use anchor_merkle::tree;
use ceramic_core::Cid;
use libipld::cbor::DagCborCodec;
use libipld::prelude::Codec;
use libipld::Ipld;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::conflict;

/// `f(bytes32)`'s wire name, embedded verbatim in the proof record (§4.5
/// step 5, §6 contract ABI).
const ANCHOR_FN_TYPE: &str = "f(bytes32)";

/// Outcome of one `anchor_requests()` invocation, for metrics/logging.
#[derive(Debug)]
pub enum AnchorRunOutcome {
    /// No READY batch existed.
    NoBatch,
    /// Too few distinct streams and nothing overdue; batch rolled back to
    /// PENDING (§4.5 step 3, metric `REVERT_TO_PENDING`).
    RevertedToPending { stream_count: usize },
    /// Batch anchored successfully.
    Completed { anchored: usize, rejected: usize },
}

pub struct AnchorService {
    request_repo: RequestRepository,
    anchor_repo: AnchorRepository,
    ipfs: Arc<dyn IpfsService>,
    car_store: Arc<dyn CarStore>,
    eth: Arc<dyn TransactionSubmitter>,
    config: AnchorConfig,
}

impl AnchorService {
    pub fn new(
        request_repo: RequestRepository,
        anchor_repo: AnchorRepository,
        ipfs: Arc<dyn IpfsService>,
        car_store: Arc<dyn CarStore>,
        eth: Arc<dyn TransactionSubmitter>,
        config: AnchorConfig,
    ) -> Self {
        Self {
            request_repo,
            anchor_repo,
            ipfs,
            car_store,
            eth,
            config,
        }
    }

    /// `anchorRequests()` (§4.5). Callers are expected to already hold the
    /// cross-process advisory-lock mutex (§4.10) for the duration of this
    /// call.
    pub async fn anchor_requests(&self, cancel: &CancellationToken) -> anchor_core::Result<AnchorRunOutcome> {
        let batch = self.request_repo.find_and_mark_as_processing().await?;
        if batch.is_empty() {
            return Ok(AnchorRunOutcome::NoBatch);
        }

        let mut by_stream: HashMap<String, Vec<anchor_core::model::Request>> = HashMap::new();
        for request in batch {
            by_stream.entry(request.stream_id.clone()).or_default().push(request);
        }

        let mut candidates = Vec::new();
        let mut rejected_by_message: HashMap<String, Vec<Uuid>> = HashMap::new();

        for (stream_id_str, requests) in by_stream {
            let request_ids: Vec<Uuid> = requests.iter().map(|r| r.id).collect();
            let stream_id = match anchor_core::codec::decode_stream_id(&stream_id_str) {
                Ok(s) => s,
                Err(_) => {
                    rejected_by_message
                        .entry(anchor_core::model::MESSAGE_FAILED_LOAD.to_string())
                        .or_default()
                        .extend(request_ids);
                    continue;
                }
            };

            match conflict::resolve(&self.ipfs, requests, cancel).await {
                Ok(resolution) => {
                    for (request, message) in resolution.rejected {
                        rejected_by_message.entry(message).or_default().push(request.id);
                    }
                    candidates.push(Candidate::new(stream_id, resolution.winner, resolution.winner_tip));
                }
                Err(_) => {
                    // Every candidate in this stream failed to load — §4.5's
                    // "do not abort the whole batch unless all leaves fail"
                    // applies per stream, not to the whole batch.
                    tracing::warn!(stream_id = %stream_id_str, "every candidate for this stream failed to load, excluding from batch");
                    rejected_by_message
                        .entry(anchor_core::model::MESSAGE_FAILED_LOAD.to_string())
                        .or_default()
                        .extend(request_ids);
                }
            }
        }

        for (message, ids) in rejected_by_message {
            self.request_repo.mark_failed(ids, message).await?;
        }

        let timing: anchor_db::RequestTiming = (&self.config).into();
        let has_overdue = candidates
            .iter()
            .any(|c| c.selected.created_at < chrono::Utc::now() - chrono::Duration::from_std(timing.max_anchoring_delay).unwrap());

        if candidates.len() < self.config.min_stream_count && !has_overdue {
            let ids: Vec<Uuid> = candidates.iter().map(|c| c.selected.id).collect();
            self.request_repo.revert_processing_to_pending(ids).await?;
            tracing::info!(stream_count = candidates.len(), "reverting undersized batch to pending");
            return Ok(AnchorRunOutcome::RevertedToPending {
                stream_count: candidates.len(),
            });
        }

        if candidates.is_empty() {
            return Ok(AnchorRunOutcome::Completed {
                anchored: 0,
                rejected: 0,
            });
        }

        // CompareFn: lexicographic order over leaf (tip) CIDs.
        candidates.sort_by(|a, b| a.tip_cid.to_string().cmp(&b.tip_cid.to_string()));
        let leaves: Vec<Cid> = candidates.iter().map(|c| c.tip_cid).collect();

        let merkle_tree = match tree::build(&leaves, self.config.merkle_depth_limit) {
            Ok(t) => t,
            Err(err @ Error::MerkleDepthError { .. }) => {
                let ids: Vec<Uuid> = candidates.iter().map(|c| c.selected.id).collect();
                self.request_repo.revert_processing_to_pending(ids).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let root_bytes32 = root_to_bytes32(merkle_tree.root)?;

        let submit_result = self.eth.submit_root(root_bytes32, Some(cancel.clone())).await;
        let tx = match submit_result {
            Ok(tx) => tx,
            Err(err) => {
                let ids: Vec<Uuid> = candidates.iter().map(|c| c.selected.id).collect();
                self.request_repo.revert_processing_to_pending(ids).await?;
                tracing::error!(%err, "blockchain submission exhausted retries, reverting batch to pending");
                return Err(err);
            }
        };

        let chain_id = chain_id_of(&tx.chain);
        let (proof_cid, proof_bytes) = self.create_proof_record(merkle_tree.root, &tx, chain_id).await?;

        let mut car_blocks = merkle_tree.blocks.clone();
        car_blocks.insert(proof_cid, proof_bytes);

        let mut anchor_rows = Vec::with_capacity(candidates.len());
        for (candidate, path) in candidates.iter().zip(merkle_tree.paths.iter()) {
            let (anchor_cid, anchor_bytes) = self
                .create_anchor_commit(candidate, proof_cid, path)
                .await?;
            anchor_rows.push((candidate, path.to_string(), anchor_cid, anchor_bytes));
        }

        for (candidate, path, anchor_cid, _bytes) in &anchor_rows {
            self.anchor_repo
                .create(
                    candidate.selected.id,
                    path.clone(),
                    anchor_cid.to_string(),
                    proof_cid.to_string(),
                )
                .await?;
        }

        let completed_ids: Vec<Uuid> = candidates.iter().map(|c| c.selected.id).collect();
        self.request_repo
            .mark_completed(completed_ids, MESSAGE_ANCHORED.to_string())
            .await?;

        for (candidate, _path, anchor_cid, _bytes) in &anchor_rows {
            if let Err(err) = self
                .ipfs
                .publish_anchor_commit(candidate.stream_id.clone(), *anchor_cid)
                .await
            {
                tracing::warn!(%err, stream_id = %candidate.stream_id, "failed to publish anchor commit over pubsub");
            }
        }

        let car = Car::single_root(merkle_tree.root, car_blocks);
        self.car_store.store_car_file(proof_cid, car).await?;

        Ok(AnchorRunOutcome::Completed {
            anchored: anchor_rows.len(),
            rejected: 0,
        })
    }

    async fn create_proof_record(
        &self,
        root: Cid,
        tx: &Transaction,
        chain_id: u64,
    ) -> anchor_core::Result<(Cid, Vec<u8>)> {
        let tx_hash_bytes = hex::decode(tx.tx_hash.trim_start_matches("0x"))
            .map_err(|e| Error::TransactionFailure(format!("malformed tx hash {:?}: {e}", tx.tx_hash)))?;
        let node = Ipld::Map(
            [
                ("root".to_string(), Ipld::Link(root)),
                ("txHash".to_string(), Ipld::Bytes(tx_hash_bytes)),
                ("txType".to_string(), Ipld::String(ANCHOR_FN_TYPE.to_string())),
                ("chainId".to_string(), Ipld::Integer(chain_id as i128)),
            ]
            .into_iter()
            .collect(),
        );
        let bytes = DagCborCodec.encode(&node).map_err(|e| Error::Other(e.into()))?;
        let proof_cid = self.ipfs.store_record(bytes.clone()).await?;
        Ok((proof_cid, bytes))
    }

    async fn create_anchor_commit(
        &self,
        candidate: &Candidate,
        proof_cid: Cid,
        path: &anchor_core::codec::MerklePath,
    ) -> anchor_core::Result<(Cid, Vec<u8>)> {
        let node = Ipld::Map(
            [
                ("id".to_string(), Ipld::Link(candidate.stream_id.cid)),
                ("prev".to_string(), Ipld::Link(candidate.tip_cid)),
                ("proof".to_string(), Ipld::Link(proof_cid)),
                ("path".to_string(), Ipld::String(path.to_string())),
            ]
            .into_iter()
            .collect(),
        );
        let bytes = DagCborCodec.encode(&node).map_err(|e| Error::Other(e.into()))?;
        let anchor_cid = self.ipfs.store_record(bytes.clone()).await?;
        Ok((anchor_cid, bytes))
    }
}

/// §6: "the raw multihash digest extracted from the root CID bytes
/// (`cid.bytes.slice(4)`)" — the first 4 bytes of a CIDv1 dag-cbor/sha2-256
/// CID are the version, codec, hash-function and digest-length varints
/// (each single-byte for this CID shape), leaving exactly the 32-byte
/// digest.
fn root_to_bytes32(root: Cid) -> anchor_core::Result<[u8; 32]> {
    let bytes = root.to_bytes();
    let digest = bytes.get(4..).ok_or_else(|| {
        Error::Other(anyhow::anyhow!("merkle root CID {root} too short for bytes32 extraction"))
    })?;
    digest
        .try_into()
        .map_err(|_| Error::Other(anyhow::anyhow!("merkle root CID {root} digest is not 32 bytes")))
}

fn chain_id_of(chain: &str) -> u64 {
    chain
        .rsplit_once(':')
        .and_then(|(_, id)| id.parse().ok())
        .unwrap_or_default()
}
