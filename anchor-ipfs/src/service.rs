//! The IPFS Service (§4.8): the single seam the rest of the workspace uses
//! to talk to Kubo. Grounded on `ceramic::kubo::IpfsService` (the teacher's
//! trait-object seam over `StreamLoader`/`StreamOperator`), generalized from
//! "load one stream's commits" to "store, retrieve, import and publish
//! anchor records".

use anchor_core::Error;
use async_trait::async_trait;
use ceramic_core::{Cid, StreamId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::CachedIpfs;
use crate::client::KuboHttpClient;
use crate::pubsub::{Message, RecentAnchorLookup, RecentTips};

#[async_trait]
pub trait IpfsService: Send + Sync {
    /// Store a DAG-CBOR encoded record and return its CID (§4.8 `storeRecord`).
    async fn store_record(&self, record: Vec<u8>) -> anchor_core::Result<Cid>;

    /// Retrieve a block by CID, observing `cancel` at every retry boundary
    /// (§4.8 `retrieveRecord`).
    async fn retrieve_record(
        &self,
        cid: &Cid,
        cancel: &CancellationToken,
    ) -> anchor_core::Result<Vec<u8>>;

    /// Import every block of a witness CAR and pin its roots (§4.8 `importCAR`).
    async fn import_car(&self, blocks: Vec<(Cid, Vec<u8>)>, roots: &[Cid]) -> anchor_core::Result<()>;

    /// Publish an UPDATE pubsub message announcing a stream's new anchor
    /// commit tip (§4.8 `publishAnchorCommit`, §6).
    async fn publish_anchor_commit(&self, stream: StreamId, tip: Cid) -> anchor_core::Result<()>;
}

pub struct KuboIpfsService {
    cached: CachedIpfs,
    client: KuboHttpClient,
    recent_tips: RecentTips,
    pubsub_topic: String,
    recent_anchor_lookup: Option<Arc<dyn RecentAnchorLookup>>,
    pubsub_freshness_window: Duration,
}

impl KuboIpfsService {
    pub fn new(
        base_url: impl Into<String>,
        cache_size: usize,
        get_timeout: Duration,
        put_timeout: Duration,
        max_retries: u32,
        pubsub_topic: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = KuboHttpClient::new(base_url);
        let cached = CachedIpfs::new(client.clone(), cache_size, get_timeout, put_timeout, max_retries)?;
        Ok(Self {
            cached,
            client,
            recent_tips: RecentTips::new(),
            pubsub_topic: pubsub_topic.into(),
            recent_anchor_lookup: None,
            pubsub_freshness_window: Duration::from_secs(3600),
        })
    }

    /// Attach the durable fallback lookup (§4.8) consulted on a QUERY miss
    /// against the in-process `RecentTips` index, with the freshness window
    /// within which a COMPLETED request still counts as "recently anchored".
    pub fn with_recent_anchor_lookup(
        mut self,
        lookup: Arc<dyn RecentAnchorLookup>,
        freshness_window: Duration,
    ) -> Self {
        self.recent_anchor_lookup = Some(lookup);
        self.pubsub_freshness_window = freshness_window;
        self
    }

    /// Spawns the pubsub responder loop answering QUERY messages for
    /// recently-anchored streams: first from the in-process `RecentTips`
    /// index, falling back to the anchor database (§4.8). Runs until
    /// `cancel` fires.
    pub fn spawn_query_responder(self: &Arc<Self>, cancel: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let stream = match this.client.pubsub_subscribe(&this.pubsub_topic).await {
                Ok(s) => s,
                Err(err) => {
                    tracing::error!(%err, "failed to subscribe to pubsub topic, responder not running");
                    return;
                }
            };
            futures::pin_mut!(stream);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = futures::StreamExt::next(&mut stream) => {
                        let Some(Ok(frame)) = next else { break };
                        let Ok(msg) = crate::pubsub::decode_frame(&frame) else { continue };
                        let response = match this.recent_tips.respond_to(&msg).await {
                            Some(response) => Some(response),
                            None => this.lookup_fallback(&msg).await,
                        };
                        if let Some(response) = response {
                            if let Ok(payload) = serde_json::to_vec(&response) {
                                if let Err(err) = this.client.pubsub_publish(&this.pubsub_topic, &payload).await {
                                    tracing::warn!(%err, "failed to publish pubsub QUERY response");
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    async fn lookup_fallback(&self, query: &Message) -> Option<Message> {
        let Message::Query { id, stream } = query else {
            return None;
        };
        let lookup = self.recent_anchor_lookup.as_ref()?;
        match lookup.lookup(stream, self.pubsub_freshness_window).await {
            Ok(Some(tip)) => Some(Message::Response {
                id: id.clone(),
                tips: std::collections::HashMap::from([(stream.clone(), tip)]),
            }),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(%err, %stream, "recent anchor lookup failed, not responding to query");
                None
            }
        }
    }
}

#[async_trait]
impl IpfsService for KuboIpfsService {
    async fn store_record(&self, record: Vec<u8>) -> anchor_core::Result<Cid> {
        self.cached.store(record).await
    }

    async fn retrieve_record(
        &self,
        cid: &Cid,
        cancel: &CancellationToken,
    ) -> anchor_core::Result<Vec<u8>> {
        self.cached.retrieve(cid, cancel).await
    }

    async fn import_car(&self, blocks: Vec<(Cid, Vec<u8>)>, roots: &[Cid]) -> anchor_core::Result<()> {
        self.cached.import_car(blocks, roots).await
    }

    async fn publish_anchor_commit(&self, stream: StreamId, tip: Cid) -> anchor_core::Result<()> {
        self.recent_tips.record(stream.clone(), tip).await;
        let update = Message::Update { stream, tip };
        let payload = serde_json::to_vec(&update).map_err(|e| Error::Other(e.into()))?;
        self.client
            .pubsub_publish(&self.pubsub_topic, &payload)
            .await
            .map_err(Error::Other)?;
        Ok(())
    }
}
