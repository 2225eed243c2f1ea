//! Conflict resolution (§4.5 step 2, §9 Open Question decision recorded in
//! DESIGN.md): per stream, select the candidate whose commit has the
//! longest valid log, and reject the rest with the sentinel message.
//!
//! Reachability is determined by walking each candidate tip's `prev` chain
//! (decoding through DAG-JOSE where needed, per `anchor_core::commit`) up to
//! `MAX_CHAIN_WALK` links. A request whose tip cannot be loaded at all is
//! rejected immediately with the (non-sentinel) "failed to load" message
//! rather than folded into the conflict decision.

use std::sync::Arc;

use anchor_core::commit::{dag_jose_link, decode_prev, CODEC_DAG_CBOR, CODEC_DAG_JOSE};
use anchor_core::model::{Request, MESSAGE_FAILED_LOAD};
use anchor_core::{Error, CONFLICT_RESOLUTION_MESSAGE};
use anchor_ipfs::IpfsService;
use ceramic_core::Cid;
use tokio_util::sync::CancellationToken;

/// A bound on how many `prev` hops are walked to compare two candidates'
/// log lengths. Real Ceramic logs are bounded in practice by anchoring
/// cadence; this guards against a pathological/malicious unbounded chain.
const MAX_CHAIN_WALK: usize = 100_000;

pub struct Resolution {
    pub winner: Request,
    pub winner_tip: Cid,
    /// Rejected requests paired with the message they should be marked
    /// FAILED with (either the conflict sentinel or the load-failure text).
    pub rejected: Vec<(Request, String)>,
}

/// Resolve one stream's candidate requests down to a single tip to anchor.
/// `requests` must be non-empty and all share the same `streamId`.
pub async fn resolve(
    ipfs: &Arc<dyn IpfsService>,
    requests: Vec<Request>,
    cancel: &CancellationToken,
) -> anchor_core::Result<Resolution> {
    debug_assert!(!requests.is_empty());

    let mut loaded = Vec::new();
    let mut rejected = Vec::new();
    for request in requests {
        let tip_cid = match anchor_core::codec::decode_cid(&request.cid) {
            Ok(cid) => cid,
            Err(_) => {
                rejected.push((request, MESSAGE_FAILED_LOAD.to_string()));
                continue;
            }
        };
        match chain_depth(ipfs, tip_cid, cancel).await {
            Ok(depth) => loaded.push((request, tip_cid, depth)),
            Err(_) => rejected.push((request, MESSAGE_FAILED_LOAD.to_string())),
        }
    }

    if loaded.is_empty() {
        return Err(Error::InvalidRequest(
            "every candidate commit for this stream failed to load from IPFS".into(),
        ));
    }

    // Longest log wins; tie-break on the lexicographically smallest CID
    // string for a deterministic outcome among genuine siblings.
    loaded.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.1.to_string().cmp(&b.1.to_string())));
    let (winner, winner_tip, _) = loaded.remove(0);

    for (request, _tip, _depth) in loaded {
        rejected.push((request, CONFLICT_RESOLUTION_MESSAGE.to_string()));
    }

    Ok(Resolution {
        winner,
        winner_tip,
        rejected,
    })
}

/// Count the number of commits from `tip` back to (and including) its
/// genesis, following `prev` links. Fails if any block on the path cannot
/// be retrieved or decoded.
async fn chain_depth(
    ipfs: &Arc<dyn IpfsService>,
    tip: Cid,
    cancel: &CancellationToken,
) -> anchor_core::Result<usize> {
    let mut current = tip;
    let mut depth = 0usize;
    loop {
        let bytes = ipfs.retrieve_record(&current, cancel).await?;
        let payload_bytes = match current.codec() {
            CODEC_DAG_CBOR => bytes,
            CODEC_DAG_JOSE => {
                let link = dag_jose_link(&bytes)?;
                ipfs.retrieve_record(&link, cancel).await?
            }
            other => {
                return Err(Error::InvalidRequest(format!(
                    "unsupported commit codec 0x{other:x} at {current}"
                )))
            }
        };
        depth += 1;
        match decode_prev(&payload_bytes)? {
            Some(prev) => {
                current = prev;
                if depth >= MAX_CHAIN_WALK {
                    return Err(Error::InvalidRequest(format!(
                        "commit chain at {tip} exceeds walk limit of {MAX_CHAIN_WALK}"
                    )));
                }
            }
            None => return Ok(depth),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_core::model::RequestStatus;
    use async_trait::async_trait;
    use chrono::Utc;
    use libipld::cbor::DagCborCodec;
    use libipld::multihash::{Code, MultihashDigest};
    use libipld::prelude::Codec;
    use libipld::Ipld;
    use std::collections::HashMap;
    use uuid::Uuid;

    struct FakeIpfs {
        blocks: HashMap<Cid, Vec<u8>>,
    }

    #[async_trait]
    impl IpfsService for FakeIpfs {
        async fn store_record(&self, _record: Vec<u8>) -> anchor_core::Result<Cid> {
            unimplemented!()
        }

        async fn retrieve_record(&self, cid: &Cid, _cancel: &CancellationToken) -> anchor_core::Result<Vec<u8>> {
            self.blocks
                .get(cid)
                .cloned()
                .ok_or_else(|| Error::MetadataServiceUnavailable(format!("{cid} not found")))
        }

        async fn import_car(&self, _blocks: Vec<(Cid, Vec<u8>)>, _roots: &[Cid]) -> anchor_core::Result<()> {
            unimplemented!()
        }

        async fn publish_anchor_commit(&self, _stream: ceramic_core::StreamId, _tip: Cid) -> anchor_core::Result<()> {
            unimplemented!()
        }
    }

    fn commit_cid(bytes: &[u8]) -> Cid {
        Cid::new_v1(CODEC_DAG_CBOR, Code::Sha2_256.digest(bytes))
    }

    fn encode(node: &Ipld) -> Vec<u8> {
        DagCborCodec.encode(node).unwrap()
    }

    fn request(cid: Cid, stream_id: &str, created_at: chrono::DateTime<Utc>) -> Request {
        Request {
            id: Uuid::new_v4(),
            cid: cid.to_string(),
            stream_id: stream_id.to_string(),
            status: RequestStatus::Processing,
            origin: None,
            timestamp: created_at,
            message: String::new(),
            pinned: false,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn longer_chain_wins_over_ancestor() {
        let genesis_bytes = encode(&Ipld::Map(Default::default()));
        let genesis_cid = commit_cid(&genesis_bytes);

        let mut blocks = HashMap::new();
        blocks.insert(genesis_cid, genesis_bytes);

        let child_bytes = encode(&Ipld::Map(
            [("prev".to_string(), Ipld::Link(genesis_cid))].into_iter().collect(),
        ));
        let child_cid = commit_cid(&child_bytes);
        blocks.insert(child_cid, child_bytes);

        let ipfs: Arc<dyn IpfsService> = Arc::new(FakeIpfs { blocks });
        let now = Utc::now();
        let requests = vec![request(genesis_cid, "stream-a", now), request(child_cid, "stream-a", now)];

        let resolution = resolve(&ipfs, requests, &CancellationToken::new()).await.unwrap();
        assert_eq!(resolution.winner.cid, child_cid.to_string());
        assert_eq!(resolution.rejected.len(), 1);
        assert_eq!(resolution.rejected[0].1, CONFLICT_RESOLUTION_MESSAGE);
    }

    #[tokio::test]
    async fn unreachable_commit_rejected_without_failing_whole_batch() {
        let genesis_bytes = encode(&Ipld::Map(Default::default()));
        let genesis_cid = commit_cid(&genesis_bytes);
        let mut blocks = HashMap::new();
        blocks.insert(genesis_cid, genesis_bytes);

        let missing_cid = commit_cid(b"never stored");

        let ipfs: Arc<dyn IpfsService> = Arc::new(FakeIpfs { blocks });
        let now = Utc::now();
        let requests = vec![request(genesis_cid, "stream-a", now), request(missing_cid, "stream-a", now)];

        let resolution = resolve(&ipfs, requests, &CancellationToken::new()).await.unwrap();
        assert_eq!(resolution.winner.cid, genesis_cid.to_string());
        assert_eq!(resolution.rejected[0].1, MESSAGE_FAILED_LOAD);
    }
}
