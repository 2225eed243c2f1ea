//! Ceramic pubsub message envelope and the QUERY responder loop. Grounded on
//! `ceramic::pubsub` (the teacher's `Message` enum tagged by `typ`), narrowed
//! to the three message kinds the anchor service actually participates in:
//! it never issues UPDATE itself but answers QUERY for streams it has just
//! anchored, per §6.

use async_trait::async_trait;
use ceramic_core::{Cid, StreamId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub enum Message {
    Update { stream: StreamId, tip: Cid },
    Query { id: String, stream: StreamId },
    Response { id: String, tips: HashMap<StreamId, Cid> },
}

// `typ` is numeric on the wire (§4.8: `{ typ: 0 }`), which an internally
// tagged `#[serde(tag = "typ")]` enum can't express (it would serialize the
// variant name as a JSON string). These wire structs carry the real shape;
// `Message`'s Serialize/Deserialize impls below dispatch on `typ` by hand.
#[derive(Serialize, Deserialize)]
struct UpdateWire {
    typ: u8,
    stream: StreamId,
    tip: Cid,
}

#[derive(Serialize, Deserialize)]
struct QueryWire {
    typ: u8,
    id: String,
    stream: StreamId,
}

#[derive(Serialize, Deserialize)]
struct ResponseWire {
    typ: u8,
    id: String,
    tips: HashMap<StreamId, Cid>,
}

#[derive(Deserialize)]
struct TypTag {
    typ: u8,
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Message::Update { stream, tip } => UpdateWire {
                typ: 0,
                stream: stream.clone(),
                tip: *tip,
            }
            .serialize(serializer),
            Message::Query { id, stream } => QueryWire {
                typ: 1,
                id: id.clone(),
                stream: stream.clone(),
            }
            .serialize(serializer),
            Message::Response { id, tips } => ResponseWire {
                typ: 2,
                id: id.clone(),
                tips: tips.clone(),
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let tag = TypTag::deserialize(&value).map_err(serde::de::Error::custom)?;
        match tag.typ {
            0 => UpdateWire::deserialize(value)
                .map(|w| Message::Update { stream: w.stream, tip: w.tip })
                .map_err(serde::de::Error::custom),
            1 => QueryWire::deserialize(value)
                .map(|w| Message::Query { id: w.id, stream: w.stream })
                .map_err(serde::de::Error::custom),
            2 => ResponseWire::deserialize(value)
                .map(|w| Message::Response { id: w.id, tips: w.tips })
                .map_err(serde::de::Error::custom),
            other => Err(serde::de::Error::custom(format!("unknown pubsub message typ {other}"))),
        }
    }
}

/// The Kubo `/api/v0/pubsub/sub` envelope (mirrors
/// `ceramic::kubo::message::MessageResponse`): the real payload arrives
/// base64-encoded in `data`, wrapped with peer/sequence metadata this
/// service has no use for.
#[derive(Deserialize)]
struct KuboEnvelope {
    data: String,
}

/// Decode one newline-framed `/api/v0/pubsub/sub` line into the inner
/// [`Message`] it carries.
pub fn decode_frame(line: &[u8]) -> anyhow::Result<Message> {
    use base64::Engine;
    let envelope: KuboEnvelope = serde_json::from_slice(line)?;
    let payload = base64::engine::general_purpose::STANDARD.decode(envelope.data.as_bytes())?;
    Ok(serde_json::from_slice(&payload)?)
}

/// The durable fallback behind the in-process `RecentTips` index (§4.8):
/// a stream anchored by a *different* process within the freshness window
/// is invisible to this process's own memory, so the responder consults
/// the anchor database before giving up on a QUERY.
#[async_trait]
pub trait RecentAnchorLookup: Send + Sync {
    /// The anchor commit CID of the most recent COMPLETED request on
    /// `stream` updated no longer than `freshness` ago, if any.
    async fn lookup(&self, stream: &StreamId, freshness: Duration) -> anchor_core::Result<Option<Cid>>;
}

/// In-memory index of streams this process has just anchored, so it can
/// answer QUERY messages for them without a database round trip. Entries
/// age out independently via the caller's own bookkeeping; this type only
/// holds the latest known tip per stream.
#[derive(Default, Clone)]
pub struct RecentTips {
    inner: Arc<RwLock<HashMap<StreamId, Cid>>>,
}

impl RecentTips {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, stream: StreamId, tip: Cid) {
        self.inner.write().await.insert(stream, tip);
    }

    pub async fn respond_to(&self, query: &Message) -> Option<Message> {
        let Message::Query { id, stream } = query else {
            return None;
        };
        let tips = self.inner.read().await;
        let tip = tips.get(stream)?;
        Some(Message::Response {
            id: id.clone(),
            tips: HashMap::from([(stream.clone(), *tip)]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responds_only_to_known_streams() {
        let recent = RecentTips::new();
        let stream: StreamId = "k2t6wyfsu4pfxbf0cfn0c3eg6ueei71cy8nq30xk2fnzwyqr8qrcvv1dhh8b6o"
            .parse()
            .unwrap();
        let query = Message::Query {
            id: "req-1".to_string(),
            stream: stream.clone(),
        };
        assert!(recent.respond_to(&query).await.is_none());

        let tip: Cid = "bafyreiczsscdsbs7ffqz55asqdf3smv6klcw3gofszvwlyarci47bgf354"
            .parse()
            .unwrap();
        recent.record(stream.clone(), tip).await;
        let response = recent.respond_to(&query).await.expect("now known");
        match response {
            Message::Response { id, tips } => {
                assert_eq!(id, "req-1");
                assert_eq!(tips.get(&stream), Some(&tip));
            }
            _ => panic!("expected Response"),
        }
    }
}
