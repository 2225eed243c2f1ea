//! Database-backed fallback for the pubsub QUERY responder (§4.8): a stream
//! anchored by a different `anchor-apid`/`anchor-worker` replica is absent
//! from this process's in-memory `RecentTips`, so the responder falls back
//! to the anchor repository before giving up.

use std::time::Duration;

use anchor_core::Result;
use anchor_db::AnchorRepository;
use anchor_ipfs::pubsub::RecentAnchorLookup;
use async_trait::async_trait;
use ceramic_core::{Cid, StreamId};

pub struct PgRecentAnchorLookup {
    anchors: AnchorRepository,
}

impl PgRecentAnchorLookup {
    pub fn new(anchors: AnchorRepository) -> Self {
        Self { anchors }
    }
}

#[async_trait]
impl RecentAnchorLookup for PgRecentAnchorLookup {
    async fn lookup(&self, stream: &StreamId, freshness: Duration) -> Result<Option<Cid>> {
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(freshness).unwrap();
        let cid = self
            .anchors
            .find_recent_tip_by_stream(stream.to_string(), cutoff)
            .await?;
        Ok(cid.and_then(|s| s.parse().ok()))
    }
}
