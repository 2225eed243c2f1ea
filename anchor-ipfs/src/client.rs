//! A thin Kubo HTTP RPC client. The teacher crate talks to Kubo through a
//! swagger-generated `ceramic-kubo-rpc-server` client (`ceramic::kubo::new`);
//! that crate pulls in a full OpenAPI codegen + `swagger` stack purely to
//! call four RPC endpoints, so here we call the same Kubo HTTP API directly
//! with `reqwest` — the HTTP client already used for every other outbound
//! call in the pack (`ceramic-http-client`, `dapp-table-client`). See
//! DESIGN.md for this substitution.

use anchor_core::Error;
use bytes::{Bytes, BytesMut};
use ceramic_core::Cid;
use futures::{Stream, StreamExt};
use std::time::Duration;

#[derive(Clone)]
pub struct KuboHttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl KuboHttpClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub async fn block_get(&self, cid: &Cid, timeout: Duration) -> anyhow::Result<Vec<u8>> {
        let res = self
            .http
            .post(self.url("/api/v0/block/get"))
            .query(&[("arg", cid.to_string())])
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(res.bytes().await?.to_vec())
    }

    pub async fn block_put(&self, data: Vec<u8>, timeout: Duration) -> anyhow::Result<()> {
        let part = reqwest::multipart::Part::bytes(data).file_name("block");
        let form = reqwest::multipart::Form::new().part("file", part);
        self.http
            .post(self.url("/api/v0/block/put"))
            .query(&[("mhtype", "sha2-256"), ("pin", "false")])
            .multipart(form)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn dag_put(&self, data: Vec<u8>, timeout: Duration) -> anyhow::Result<Cid> {
        let part = reqwest::multipart::Part::bytes(data).file_name("node");
        let form = reqwest::multipart::Form::new().part("file", part);
        let res = self
            .http
            .post(self.url("/api/v0/dag/put"))
            .query(&[("store-codec", "dag-cbor"), ("input-codec", "dag-cbor")])
            .multipart(form)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?;
        let body: DagPutResponse = res.json().await?;
        let cid: Cid = body.cid.slash.parse()?;
        Ok(cid)
    }

    pub async fn pin_add(&self, cid: &Cid, recursive: bool) -> anyhow::Result<()> {
        self.http
            .post(self.url("/api/v0/pin/add"))
            .query(&[
                ("arg", cid.to_string()),
                ("recursive", recursive.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn pubsub_publish(&self, topic: &str, data: &[u8]) -> anyhow::Result<()> {
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name("msg");
        let form = reqwest::multipart::Form::new().part("file", part);
        self.http
            .post(self.url("/api/v0/pubsub/pub"))
            .query(&[("arg", topic)])
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Returns a stream of complete newline-delimited-JSON frames from
    /// `/api/v0/pubsub/sub`. Each frame is one Kubo pubsub envelope
    /// (`{from, data, seqno, topicIDs}`); `bytes_stream()` chunk boundaries
    /// don't align with line boundaries, so frames are buffered and split
    /// here rather than handed to callers raw.
    pub async fn pubsub_subscribe(
        &self,
        topic: &str,
    ) -> anyhow::Result<impl Stream<Item = anyhow::Result<Bytes>>> {
        let res = self
            .http
            .post(self.url("/api/v0/pubsub/sub"))
            .query(&[("arg", topic)])
            .send()
            .await?
            .error_for_status()?;
        Ok(line_frames(res.bytes_stream()))
    }
}

fn line_frames(chunks: impl Stream<Item = reqwest::Result<Bytes>>) -> impl Stream<Item = anyhow::Result<Bytes>> {
    futures::stream::unfold((Box::pin(chunks), BytesMut::new()), |(mut chunks, mut buf)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let mut line = buf.split_to(pos + 1);
                line.truncate(pos);
                if line.is_empty() {
                    continue;
                }
                return Some((Ok(line.freeze()), (chunks, buf)));
            }
            match chunks.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                Some(Err(err)) => return Some((Err(err.into()), (chunks, buf))),
                None if buf.is_empty() => return None,
                None => {
                    let line = std::mem::replace(&mut buf, BytesMut::new());
                    return Some((Ok(line.freeze()), (chunks, buf)));
                }
            }
        }
    })
}

#[derive(serde::Deserialize)]
struct DagPutResponse {
    #[serde(rename = "Cid")]
    cid: DagPutCid,
}

#[derive(serde::Deserialize)]
struct DagPutCid {
    #[serde(rename = "/")]
    slash: String,
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::MetadataServiceUnavailable(e.to_string())
    }
}
