//! Metadata Service (§4.2): idempotent genesis-header extraction and
//! persistence, fed by every `POST /api/v0/requests` and consumed by
//! garbage collection's `usedAt` tracking.

use std::sync::Arc;

use anchor_core::commit::{decode_genesis_header, dag_jose_link, CODEC_DAG_CBOR, CODEC_DAG_JOSE};
use anchor_core::{Error, Result};
use anchor_db::MetadataRepository;
use anchor_ipfs::IpfsService;
use ceramic_core::StreamId;
use tokio_util::sync::CancellationToken;

pub struct MetadataService {
    ipfs: Arc<dyn IpfsService>,
    repo: MetadataRepository,
}

impl MetadataService {
    pub fn new(ipfs: Arc<dyn IpfsService>, repo: MetadataRepository) -> Self {
        Self { ipfs, repo }
    }

    /// `fill` (§4.2): idempotent. Touches `usedAt` if a row already exists;
    /// otherwise retrieves the genesis record from IPFS, validates its
    /// header, and persists with `onConflict-ignore`.
    pub async fn fill(&self, stream_id: &StreamId, cancel: &CancellationToken) -> Result<()> {
        let key = stream_id.to_string();
        if self.repo.find(key.clone()).await?.is_some() {
            self.repo.touch(key).await?;
            return Ok(());
        }

        let genesis_cid = stream_id.cid;
        let genesis_bytes = self
            .ipfs
            .retrieve_record(&genesis_cid, cancel)
            .await
            .map_err(|e| Error::MetadataServiceUnavailable(e.to_string()))?;

        let payload_bytes = match genesis_cid.codec() {
            CODEC_DAG_CBOR => genesis_bytes,
            CODEC_DAG_JOSE => {
                let link = dag_jose_link(&genesis_bytes)?;
                self.ipfs
                    .retrieve_record(&link, cancel)
                    .await
                    .map_err(|e| Error::MetadataServiceUnavailable(e.to_string()))?
            }
            other => {
                return Err(Error::InvalidGenesis {
                    path: genesis_cid.to_string(),
                    reason: format!("unsupported genesis codec 0x{other:x}"),
                })
            }
        };

        let header = decode_genesis_header(&payload_bytes)?;
        let inserted = self.repo.insert_if_absent(key.clone(), header).await?;
        if !inserted {
            // Lost a race against a concurrent `fill` for the same stream;
            // the row now exists either way, so touch it like the fast path.
            self.repo.touch(key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_core::model::GenesisMetadata;
    use async_trait::async_trait;
    use ceramic_core::Cid;
    use libipld::cbor::DagCborCodec;
    use libipld::multihash::{Code, MultihashDigest};
    use libipld::prelude::Codec;
    use libipld::Ipld;

    struct FakeIpfs {
        bytes: std::collections::HashMap<Cid, Vec<u8>>,
    }

    #[async_trait]
    impl IpfsService for FakeIpfs {
        async fn store_record(&self, _record: Vec<u8>) -> Result<Cid> {
            unimplemented!()
        }

        async fn retrieve_record(&self, cid: &Cid, _cancel: &CancellationToken) -> Result<Vec<u8>> {
            self.bytes
                .get(cid)
                .cloned()
                .ok_or_else(|| Error::MetadataServiceUnavailable(format!("{cid} not found")))
        }

        async fn import_car(&self, _blocks: Vec<(Cid, Vec<u8>)>, _roots: &[Cid]) -> Result<()> {
            unimplemented!()
        }

        async fn publish_anchor_commit(&self, _stream: StreamId, _tip: Cid) -> Result<()> {
            unimplemented!()
        }
    }

    fn dag_cbor_cid(bytes: &[u8]) -> Cid {
        Cid::new_v1(CODEC_DAG_CBOR, Code::Sha2_256.digest(bytes))
    }

    #[tokio::test]
    async fn decodes_and_persists_genesis_header() {
        let header = Ipld::Map(
            [(
                "controllers".to_string(),
                Ipld::List(vec![Ipld::String(
                    "did:key:z6MkjM91pd9wZrTA2T1LJiZLuZGTd4bHQHKLmnEy7gfdTJxj".to_string(),
                )]),
            )]
            .into_iter()
            .collect(),
        );
        let genesis = Ipld::Map([("header".to_string(), header)].into_iter().collect());
        let bytes = DagCborCodec.encode(&genesis).unwrap();
        let cid = dag_cbor_cid(&bytes);
        let stream_id = StreamId {
            r#type: ceramic_core::StreamIdType::Tile,
            cid,
        };

        let ipfs: Arc<dyn IpfsService> = Arc::new(FakeIpfs {
            bytes: std::collections::HashMap::from([(cid, bytes)]),
        });
        // in-memory sqlite-less repository double is not available here;
        // this test only exercises the pure decode path via `fill`'s
        // genesis-retrieval branch through a database-backed integration
        // test in `anchor-db`'s own suite. Keep this as a decode smoke test.
        let fetched = ipfs.retrieve_record(&cid, &CancellationToken::new()).await.unwrap();
        let decoded: GenesisMetadata = decode_genesis_header(&fetched).unwrap();
        assert_eq!(decoded.controllers.len(), 1);
    }
}
