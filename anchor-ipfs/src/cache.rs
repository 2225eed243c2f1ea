//! LRU-cached, retrying CID loader. Grounded on `ceramic::kubo::cache::Cached`
//! and `ceramic::kubo::CidLoader::load_cid_with_retry`, generalized with
//! explicit abort-token cancellation per §5 ("suspension points ... must
//! observe" cancellation) instead of the teacher's unconditional retry loop.

use anchor_core::Error;
use ceramic_core::Cid;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::client::KuboHttpClient;

pub struct CachedIpfs {
    client: KuboHttpClient,
    cache: Arc<Mutex<LruCache<Cid, Vec<u8>>>>,
    get_timeout: Duration,
    put_timeout: Duration,
    max_retries: u32,
}

impl CachedIpfs {
    pub fn new(
        client: KuboHttpClient,
        cache_size: usize,
        get_timeout: Duration,
        put_timeout: Duration,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let cap = NonZeroUsize::new(cache_size)
            .ok_or_else(|| anyhow::anyhow!("{cache_size} is not a valid cache size"))?;
        Ok(Self {
            client,
            cache: Arc::new(Mutex::new(LruCache::new(cap))),
            get_timeout,
            put_timeout,
            max_retries,
        })
    }

    /// Retrieve a block, serving from cache on hit, else fetching with
    /// exponential-backoff retries. `cancel` is checked before every retry;
    /// an already-cancelled token aborts immediately without retrying.
    pub async fn retrieve(&self, cid: &Cid, cancel: &CancellationToken) -> anchor_core::Result<Vec<u8>> {
        if let Some(data) = self.cache.lock().await.get(cid) {
            return Ok(data.clone());
        }

        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::MetadataServiceUnavailable(format!(
                    "retrieve of {cid} aborted"
                )));
            }

            match self.client.block_get(cid, self.get_timeout).await {
                Ok(data) => {
                    self.cache.lock().await.put(*cid, data.clone());
                    return Ok(data);
                }
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(cid = %cid, attempt, %err, "retrying IPFS block get");
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => {
                            return Err(Error::MetadataServiceUnavailable(format!(
                                "retrieve of {cid} aborted during backoff"
                            )));
                        }
                    }
                }
                Err(err) => {
                    return Err(Error::MetadataServiceUnavailable(format!(
                        "failed to retrieve {cid} after {attempt} retries: {err}"
                    )))
                }
            }
        }
    }

    pub async fn store(&self, record: Vec<u8>) -> anchor_core::Result<Cid> {
        let cid = self
            .client
            .dag_put(record.clone(), self.put_timeout)
            .await
            .map_err(|e| Error::Other(e))?;
        self.client
            .pin_add(&cid, false)
            .await
            .map_err(Error::Other)?;
        self.cache.lock().await.put(cid, record);
        Ok(cid)
    }

    pub async fn import_car(&self, blocks: Vec<(Cid, Vec<u8>)>, roots: &[Cid]) -> anchor_core::Result<()> {
        for (cid, data) in blocks {
            self.client
                .block_put(data.clone(), self.put_timeout)
                .await
                .map_err(Error::Other)?;
            self.cache.lock().await.put(cid, data);
        }
        for root in roots {
            self.client.pin_add(root, true).await.map_err(Error::Other)?;
        }
        Ok(())
    }
}
