//! Shared commit-record decoding: the DAG-CBOR/DAG-JOSE codec dispatch used
//! by both the Metadata Service (genesis header extraction, §4.2) and the
//! Anchor Service's conflict resolution (commit-chain walking, §4.5).
//! Grounded on `ceramic::event::EventValue::decode`'s codec-tag dispatch.

use crate::error::{Error, Result};
use crate::model::GenesisMetadata;
use ceramic_core::Cid;
use libipld::cbor::DagCborCodec;
use libipld::prelude::Codec;
use libipld::Ipld;

pub const CODEC_DAG_CBOR: u64 = 0x71;
pub const CODEC_DAG_JOSE: u64 = 0x85;

/// Dereference a DAG-JOSE record's `.link` field to the CID of the
/// underlying DAG-CBOR payload it signs.
pub fn dag_jose_link(bytes: &[u8]) -> Result<Cid> {
    let node: Ipld = dag_jose::DagJoseCodec
        .decode(bytes)
        .map_err(|e| Error::InvalidGenesis {
            path: "jws".into(),
            reason: format!("invalid dag-jose record: {e}"),
        })?;
    match node.get("link") {
        Ok(Ipld::Link(cid)) => Ok(*cid),
        _ => Err(Error::InvalidGenesis {
            path: "jws.link".into(),
            reason: "missing link to linked block".into(),
        }),
    }
}

/// Extract and strictly validate the genesis header record
/// `{ controllers: [DID], model?, family?, schema?, tags? }` (§4.2) from a
/// DAG-CBOR genesis payload's `header` field. Unknown sibling fields of
/// `header` are ignored (extra-field stripping); a malformed or missing
/// `controllers` entry is the only hard failure.
pub fn decode_genesis_header(payload_bytes: &[u8]) -> Result<GenesisMetadata> {
    let node: Ipld = DagCborCodec
        .decode(payload_bytes)
        .map_err(|e| Error::InvalidGenesis {
            path: "$".into(),
            reason: format!("genesis payload is not valid dag-cbor: {e}"),
        })?;
    let header = node.get("header").map_err(|_| Error::InvalidGenesis {
        path: "$.header".into(),
        reason: "missing header".into(),
    })?;

    let controllers = match header.get("controllers") {
        Ok(Ipld::List(items)) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Ipld::String(s) => crate::codec::decode_did(s).map_err(|_| Error::InvalidGenesis {
                    path: "$.header.controllers[]".into(),
                    reason: format!("{item:?} is not a valid DID"),
                }),
                other => Err(Error::InvalidGenesis {
                    path: "$.header.controllers[]".into(),
                    reason: format!("{other:?} is not a string"),
                }),
            })
            .collect::<Result<Vec<String>>>()?,
        _ => {
            return Err(Error::InvalidGenesis {
                path: "$.header.controllers".into(),
                reason: "missing or empty controllers array".into(),
            })
        }
    };

    let model = match header.get("model") {
        Ok(Ipld::Bytes(b)) => Some(b.clone()),
        Ok(Ipld::Null) | Err(_) => None,
        Ok(other) => {
            return Err(Error::InvalidGenesis {
                path: "$.header.model".into(),
                reason: format!("{other:?} is not bytes"),
            })
        }
    };

    let family = match header.get("family") {
        Ok(Ipld::String(s)) => Some(s.clone()),
        Ok(Ipld::Null) | Err(_) => None,
        Ok(other) => {
            return Err(Error::InvalidGenesis {
                path: "$.header.family".into(),
                reason: format!("{other:?} is not a string"),
            })
        }
    };

    let schema = match header.get("schema") {
        Ok(Ipld::String(s)) => Some(s.clone()),
        Ok(Ipld::Null) | Err(_) => None,
        Ok(other) => {
            return Err(Error::InvalidGenesis {
                path: "$.header.schema".into(),
                reason: format!("{other:?} is not a string"),
            })
        }
    };

    let tags = match header.get("tags") {
        Ok(Ipld::List(items)) => items
            .iter()
            .map(|item| match item {
                Ipld::String(s) => Ok(s.clone()),
                other => Err(Error::InvalidGenesis {
                    path: "$.header.tags[]".into(),
                    reason: format!("{other:?} is not a string"),
                }),
            })
            .collect::<Result<Vec<String>>>()?,
        Ok(Ipld::Null) | Err(_) => Vec::new(),
        Ok(other) => {
            return Err(Error::InvalidGenesis {
                path: "$.header.tags".into(),
                reason: format!("{other:?} is not a list"),
            })
        }
    };

    Ok(GenesisMetadata {
        controllers,
        model,
        family,
        schema,
        tags,
    })
}

/// The parent commit a non-genesis commit record points to, if any. A
/// genesis commit carries no `prev`.
pub fn decode_prev(payload_bytes: &[u8]) -> Result<Option<Cid>> {
    let node: Ipld = DagCborCodec
        .decode(payload_bytes)
        .map_err(|e| Error::InvalidRequest(format!("commit payload is not valid dag-cbor: {e}")))?;
    match node.get("prev") {
        Ok(Ipld::Link(cid)) => Ok(Some(*cid)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libipld::multihash::{Code, MultihashDigest};

    fn cbor(node: &Ipld) -> Vec<u8> {
        DagCborCodec.encode(node).unwrap()
    }

    #[test]
    fn decodes_minimal_header() {
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
        let meta = decode_genesis_header(&cbor(&genesis)).unwrap();
        assert_eq!(meta.controllers.len(), 1);
        assert!(meta.tags.is_empty());
    }

    #[test]
    fn rejects_missing_controllers() {
        let header = Ipld::Map(Default::default());
        let genesis = Ipld::Map([("header".to_string(), header)].into_iter().collect());
        let err = decode_genesis_header(&cbor(&genesis)).unwrap_err();
        assert!(matches!(err, Error::InvalidGenesis { .. }));
    }

    #[test]
    fn decodes_prev_link() {
        let leaf_cid = Cid::new_v1(0x71, Code::Sha2_256.digest(b"genesis"));
        let commit = Ipld::Map([("prev".to_string(), Ipld::Link(leaf_cid))].into_iter().collect());
        let prev = decode_prev(&cbor(&commit)).unwrap();
        assert_eq!(prev, Some(leaf_cid));
    }

    #[test]
    fn genesis_commit_has_no_prev() {
        let commit = Ipld::Map(Default::default());
        let prev = decode_prev(&cbor(&commit)).unwrap();
        assert_eq!(prev, None);
    }
}
