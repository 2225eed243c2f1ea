//! CAR encode/decode helpers and the Merkle CAR Service (§4.6): store and
//! retrieve the CAR file for a batch's tree, keyed by anchor-proof CID,
//! backed by an in-memory map or an S3-compatible object store, LRU-cached
//! in front either way.
//!
//! Grounded on `jacquard-repo::car` for the `iroh_car` reader/writer
//! plumbing; the S3 backend is plain `reqwest` rather than an AWS SDK (no
//! example in the pack pulls one in for a handful of PUT/GET calls — see
//! DESIGN.md).

use anchor_core::Error;
use async_trait::async_trait;
use ceramic_core::Cid;
use futures::StreamExt;
use iroh_car::{CarHeader, CarReader, CarWriter};
use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A decoded CAR file: its roots and every block it carries.
#[derive(Debug, Clone)]
pub struct Car {
    pub roots: Vec<Cid>,
    pub blocks: BTreeMap<Cid, Vec<u8>>,
}

impl Car {
    pub fn single_root(root: Cid, blocks: BTreeMap<Cid, Vec<u8>>) -> Self {
        Self {
            roots: vec![root],
            blocks,
        }
    }

    /// Encode to CAR v1 bytes. `iroh_car`'s CID type is a different crate
    /// version than `ceramic_core::Cid`; both wrap the same 0x01-prefixed
    /// varint/multihash layout, so we round-trip through bytes at this
    /// boundary rather than depending on both crates resolving to one `cid`
    /// semver.
    pub async fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let header_roots: Vec<cid::Cid> = self
            .roots
            .iter()
            .map(|c| to_iroh_cid(c))
            .collect::<anyhow::Result<_>>()?;
        let header = CarHeader::new_v1(header_roots);
        let mut buf = Vec::new();
        let mut writer = CarWriter::new(header, &mut buf);
        for (cid, data) in &self.blocks {
            writer.write(to_iroh_cid(cid)?, data.clone()).await?;
        }
        writer.finish().await?;
        Ok(buf)
    }

    pub async fn from_bytes(data: &[u8]) -> anyhow::Result<Self> {
        let reader = CarReader::new(data).await?;
        let roots = reader
            .header()
            .roots()
            .iter()
            .map(from_iroh_cid)
            .collect::<anyhow::Result<_>>()?;
        let mut blocks = BTreeMap::new();
        let stream = reader.stream();
        futures::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            let (cid, data) = item?;
            blocks.insert(from_iroh_cid(&cid)?, data);
        }
        Ok(Self { roots, blocks })
    }
}

fn to_iroh_cid(cid: &Cid) -> anyhow::Result<cid::Cid> {
    let bytes = cid.to_bytes();
    cid::Cid::try_from(bytes.as_slice()).map_err(|e| anyhow::anyhow!("cid conversion failed: {e}"))
}

fn from_iroh_cid(cid: &cid::Cid) -> anyhow::Result<Cid> {
    let bytes = cid.to_bytes();
    Cid::try_from(bytes.as_slice()).map_err(|e| anyhow::anyhow!("cid conversion failed: {e}"))
}

#[async_trait]
pub trait CarStore: Send + Sync {
    async fn store_car_file(&self, anchor_proof_cid: Cid, car: Car) -> anchor_core::Result<()>;
    /// Returns `None` on any backend miss or failure, never an error — the
    /// Witness Service degrades gracefully when a CAR is unavailable (§4.6).
    async fn retrieve_car_file(&self, anchor_proof_cid: Cid) -> Option<Car>;
}

/// Dev/test backend: a plain in-memory map.
#[derive(Default)]
pub struct InMemoryCarStore {
    inner: Mutex<std::collections::HashMap<Cid, Car>>,
}

impl InMemoryCarStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CarStore for InMemoryCarStore {
    async fn store_car_file(&self, anchor_proof_cid: Cid, car: Car) -> anchor_core::Result<()> {
        self.inner.lock().await.insert(anchor_proof_cid, car);
        Ok(())
    }

    async fn retrieve_car_file(&self, anchor_proof_cid: Cid) -> Option<Car> {
        self.inner.lock().await.get(&anchor_proof_cid).cloned()
    }
}

/// S3-compatible object store backend. Key = `<bucket_prefix>/<cid>`.
pub struct S3CarStore {
    http: reqwest::Client,
    endpoint: String,
    bucket_prefix: String,
}

impl S3CarStore {
    pub fn new(endpoint: impl Into<String>, bucket_prefix: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            bucket_prefix: bucket_prefix.into(),
        }
    }

    fn key_url(&self, anchor_proof_cid: &Cid) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.bucket_prefix.trim_matches('/'),
            anchor_proof_cid
        )
    }
}

#[async_trait]
impl CarStore for S3CarStore {
    async fn store_car_file(&self, anchor_proof_cid: Cid, car: Car) -> anchor_core::Result<()> {
        let bytes = car.to_bytes().await.map_err(Error::Other)?;
        self.http
            .put(self.key_url(&anchor_proof_cid))
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::Other(e.into()))?
            .error_for_status()
            .map_err(|e| Error::Other(e.into()))?;
        Ok(())
    }

    async fn retrieve_car_file(&self, anchor_proof_cid: Cid) -> Option<Car> {
        let res = self.http.get(self.key_url(&anchor_proof_cid)).send().await.ok()?;
        let res = res.error_for_status().ok()?;
        let bytes = res.bytes().await.ok()?;
        Car::from_bytes(&bytes).await.ok()
    }
}

/// LRU cache (default 100 entries, §4.6) in front of any `CarStore`.
pub struct CachedCarStore<S> {
    backend: S,
    cache: Arc<Mutex<LruCache<Cid, Car>>>,
}

impl<S: CarStore> CachedCarStore<S> {
    pub fn new(backend: S, capacity: usize) -> anyhow::Result<Self> {
        let cap = NonZeroUsize::new(capacity)
            .ok_or_else(|| anyhow::anyhow!("{capacity} is not a valid cache size"))?;
        Ok(Self {
            backend,
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
        })
    }
}

#[async_trait]
impl<S: CarStore> CarStore for CachedCarStore<S> {
    async fn store_car_file(&self, anchor_proof_cid: Cid, car: Car) -> anchor_core::Result<()> {
        self.backend.store_car_file(anchor_proof_cid, car.clone()).await?;
        self.cache.lock().await.put(anchor_proof_cid, car);
        Ok(())
    }

    async fn retrieve_car_file(&self, anchor_proof_cid: Cid) -> Option<Car> {
        if let Some(car) = self.cache.lock().await.get(&anchor_proof_cid) {
            return Some(car.clone());
        }
        let car = self.backend.retrieve_car_file(anchor_proof_cid).await?;
        self.cache.lock().await.put(anchor_proof_cid, car.clone());
        Some(car)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libipld::multihash::{Code, MultihashDigest};

    fn cid(byte: u8) -> Cid {
        Cid::new_v1(0x71, Code::Sha2_256.digest(&[byte]))
    }

    #[tokio::test]
    async fn round_trips_through_car_bytes() {
        let root = cid(1);
        let mut blocks = BTreeMap::new();
        blocks.insert(root, vec![1, 2, 3]);
        blocks.insert(cid(2), vec![4, 5, 6]);
        let car = Car::single_root(root, blocks.clone());

        let bytes = car.to_bytes().await.unwrap();
        let decoded = Car::from_bytes(&bytes).await.unwrap();
        assert_eq!(decoded.roots, vec![root]);
        assert_eq!(decoded.blocks, blocks);
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryCarStore::new();
        let proof_cid = cid(9);
        let car = Car::single_root(cid(1), BTreeMap::from([(cid(1), vec![7, 8, 9])]));
        store.store_car_file(proof_cid, car.clone()).await.unwrap();
        let fetched = store.retrieve_car_file(proof_cid).await.unwrap();
        assert_eq!(fetched.roots, car.roots);
    }

    #[tokio::test]
    async fn cached_store_returns_none_on_miss() {
        let store = CachedCarStore::new(InMemoryCarStore::new(), 10).unwrap();
        assert!(store.retrieve_car_file(cid(42)).await.is_none());
    }
}
