//! Anchor Request Parser (§4.1): JSON v1/v3 and CAR v2 wire formats.
//!
//! The CAR decode path mirrors how the teacher's `ceramic::event` module
//! dispatches on a CID's multicodec (`0x71` dag-cbor / `0x85` dag-jose,
//! see `EventValue::decode`) rather than trusting a declared content type.

use crate::codec::{decode_cid, decode_iso_date, decode_stream_id};
use crate::error::{Error, Result};
use ceramic_core::{Cid, StreamId};
use chrono::{DateTime, Utc};
use libipld::cbor::DagCborCodec;
use libipld::codec::Codec;
use libipld::Ipld;
use serde::Deserialize;
use std::collections::BTreeMap;

/// A structurally-validated anchor request, independent of wire format.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub stream_id: StreamId,
    pub cid: Cid,
    pub timestamp: DateTime<Utc>,
    pub js_ceramic_version: Option<String>,
    pub ceramic_one_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonRequestBody {
    #[serde(rename = "streamId")]
    stream_id: String,
    cid: String,
    timestamp: Option<String>,
    #[serde(rename = "jsCeramicVersion")]
    js_ceramic_version: Option<String>,
    #[serde(rename = "ceramicOneVersion")]
    ceramic_one_version: Option<String>,
}

/// Parse the JSON v1/v3 anchor request body. `timestamp` defaults to `now`
/// when absent.
pub fn parse_json(body: &[u8]) -> Result<ParsedRequest> {
    let parsed: JsonRequestBody = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidRequest(format!("malformed JSON request body: {e}")))?;

    let stream_id = decode_stream_id(&parsed.stream_id)?;
    let cid = decode_cid(&parsed.cid)?;
    let timestamp = match parsed.timestamp {
        Some(ts) => decode_iso_date(&ts)?,
        None => Utc::now(),
    };

    Ok(ParsedRequest {
        stream_id,
        cid,
        timestamp,
        js_ceramic_version: parsed.js_ceramic_version,
        ceramic_one_version: parsed.ceramic_one_version,
    })
}

use crate::commit::{CODEC_DAG_CBOR, CODEC_DAG_JOSE};

/// Parse a `application/vnd.ipld.car` request body. The CAR must have a
/// single root pointing at a record `{ streamId: bytes, timestamp, tip }`;
/// the genesis commit is recovered by following `streamId` as a CID into
/// the same CAR, dereferencing through a DAG-JOSE `.link` if needed.
pub fn parse_car(blocks: &BTreeMap<Cid, Vec<u8>>, root: Cid) -> Result<ParsedRequest> {
    let root_bytes = blocks
        .get(&root)
        .ok_or_else(|| Error::InvalidRequest("CAR root block missing from archive".into()))?;

    let root_node: Ipld = DagCborCodec
        .decode(root_bytes)
        .map_err(|e| Error::InvalidRequest(format!("CAR root is not valid dag-cbor: {e}")))?;

    let stream_id_bytes = ipld_bytes(&root_node, "streamId")?;
    let stream_id = StreamId::try_from(stream_id_bytes.as_slice())
        .map_err(|e| Error::InvalidRequest(format!("invalid streamId in CAR root: {e}")))?;

    let timestamp_str = ipld_string(&root_node, "timestamp")?;
    let timestamp = decode_iso_date(&timestamp_str)?;

    let tip = ipld_link(&root_node, "tip")?;

    // Validate the genesis record is reachable within this CAR, dereferencing
    // through DAG-JOSE's `.link` when the stream's genesis is a signed commit.
    let genesis_cid = stream_id.cid;
    let genesis_bytes = blocks.get(&genesis_cid).ok_or_else(|| {
        Error::InvalidRequest(format!("genesis commit {genesis_cid} missing from CAR"))
    })?;

    match genesis_cid.codec() {
        CODEC_DAG_CBOR => { /* already the genesis record */ }
        CODEC_DAG_JOSE => {
            let jose_node: Ipld = dag_jose::DagJoseCodec
                .decode(genesis_bytes)
                .map_err(|e| Error::InvalidRequest(format!("invalid dag-jose genesis: {e}")))?;
            let link = ipld_link(&jose_node, "link")?;
            if !blocks.contains_key(&link) {
                return Err(Error::InvalidRequest(
                    "dag-jose genesis .link target missing from CAR".into(),
                ));
            }
        }
        other => {
            return Err(Error::InvalidRequest(format!(
                "unsupported genesis codec 0x{other:x}"
            )))
        }
    }

    Ok(ParsedRequest {
        stream_id,
        cid: tip,
        timestamp,
        js_ceramic_version: None,
        ceramic_one_version: None,
    })
}

fn ipld_bytes(node: &Ipld, key: &str) -> Result<Vec<u8>> {
    match node.get(key) {
        Ok(Ipld::Bytes(b)) => Ok(b.clone()),
        _ => Err(Error::InvalidRequest(format!("missing/invalid field {key:?}"))),
    }
}

fn ipld_string(node: &Ipld, key: &str) -> Result<String> {
    match node.get(key) {
        Ok(Ipld::String(s)) => Ok(s.clone()),
        _ => Err(Error::InvalidRequest(format!("missing/invalid field {key:?}"))),
    }
}

fn ipld_link(node: &Ipld, key: &str) -> Result<Cid> {
    match node.get(key) {
        Ok(Ipld::Link(cid)) => Ok(*cid),
        _ => Err(Error::InvalidRequest(format!("missing/invalid link {key:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_with_default_timestamp() {
        let body = br#"{"streamId":"k2t6wyfsu4pg0t2n4j8ms3s33xsgqjhtto04mvq8w5a2v5xo48idyz38l7ydki","cid":"bafyreie2reaaphqcrm2s3ysey6s32kdpcj34gcircgfdvd3m6tipbr3pfu"}"#;
        let parsed = parse_json(body).unwrap();
        assert_eq!(
            parsed.cid.to_string(),
            "bafyreie2reaaphqcrm2s3ysey6s32kdpcj34gcircgfdvd3m6tipbr3pfu"
        );
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_json(b"not json").unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
