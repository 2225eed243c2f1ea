//! Decoders for the wire formats the request parser and presentation layer
//! need: CID, StreamID, CommitID, ISO-date, bytes-as-base64, DID strings,
//! and Merkle path lines. Grounded on `ceramic/src/stream/{stream_id,commit_id}.rs`
//! of the teacher crate, generalized from a single `StreamIdType` wrapper
//! into the full decode surface the request parser needs.

mod commit_id;
mod merkle_path;

pub use commit_id::CommitId;
pub use merkle_path::{Direction, MerklePath};

use crate::error::{Error, Result};
use ceramic_core::{Cid, StreamId};
use chrono::{DateTime, Utc};
use std::str::FromStr;

/// Decode a CID from its string form, mapping any failure to `InvalidRequest`.
pub fn decode_cid(s: &str) -> Result<Cid> {
    Cid::from_str(s).map_err(|e| Error::InvalidRequest(format!("invalid cid {s:?}: {e}")))
}

/// Decode a StreamID from its string form.
pub fn decode_stream_id(s: &str) -> Result<StreamId> {
    StreamId::from_str(s).map_err(|e| Error::InvalidRequest(format!("invalid streamId {s:?}: {e}")))
}

/// Decode an ISO-8601 timestamp, defaulting the caller's policy (e.g. "now if
/// absent") is left to the call site — this only validates the string.
pub fn decode_iso_date(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidRequest(format!("invalid ISO date {s:?}: {e}")))
}

/// Decode a base64-encoded byte array (standard, padded alphabet, matching
/// the `Uint8Array`-as-base64 wire convention used by the genesis header's
/// `model` field).
pub fn decode_base64(s: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|e| Error::InvalidRequest(format!("invalid base64: {e}")))
}

/// Structural validation of a DID string (`did:<method>:<id>`). This is
/// intentionally not a cryptographic check (§1 Non-goals): we only assert
/// the three-colon-segment shape a genesis header's `controllers[0]` must
/// have.
pub fn decode_did(s: &str) -> Result<String> {
    let mut parts = s.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("did"), Some(_method), Some(id)) if !id.is_empty() => Ok(s.to_string()),
        _ => Err(Error::InvalidRequest(format!("invalid DID {s:?}"))),
    }
}
