//! Witness Service (§4.7): extract the minimal CAR proving one request's
//! anchor, and verify such a CAR independently.

use crate::car::Car;
use anchor_core::codec::{Direction, MerklePath};
use anchor_core::model::Anchor;
use anchor_core::Error;
use ceramic_core::Cid;
use libipld::cbor::DagCborCodec;
use libipld::prelude::Codec;
use libipld::Ipld;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Build the minimal CAR for `anchor`: the anchor commit block, the proof
/// block, the Merkle root block, and every intermediate node along
/// `anchor.path`. Root of the returned CAR is the anchor commit's own CID.
pub fn build(
    anchor_commit_cid: Cid,
    anchor_commit_bytes: &[u8],
    anchor: &Anchor,
    merkle_car: &Car,
) -> anchor_core::Result<Car> {
    let mut blocks = BTreeMap::new();
    blocks.insert(anchor_commit_cid, anchor_commit_bytes.to_vec());

    let proof_cid = Cid::from_str(&anchor.proof_cid)
        .map_err(|e| Error::InvalidWitnessCar(format!("anchor row has invalid proofCid: {e}")))?;
    let proof_bytes = merkle_car
        .blocks
        .get(&proof_cid)
        .ok_or_else(|| Error::InvalidWitnessCar("proof block missing from merkle CAR".into()))?;
    blocks.insert(proof_cid, proof_bytes.clone());

    let path: MerklePath = anchor
        .path
        .parse()
        .map_err(|_: Error| Error::InvalidWitnessCar(format!("malformed merkle path {:?}", anchor.path)))?;

    let root = merkle_car
        .roots
        .first()
        .copied()
        .ok_or_else(|| Error::InvalidWitnessCar("merkle CAR has no root".into()))?;
    let root_bytes = merkle_car
        .blocks
        .get(&root)
        .ok_or_else(|| Error::InvalidWitnessCar("merkle root block missing from merkle CAR".into()))?;
    blocks.insert(root, root_bytes.clone());

    // Walk root -> leaf along `path`, copying each intermediate node block.
    let mut current = root;
    for step in &path.0 {
        let node_bytes = merkle_car
            .blocks
            .get(&current)
            .ok_or_else(|| Error::InvalidWitnessCar(format!("merkle node {current} missing from merkle CAR")))?;
        blocks.insert(current, node_bytes.clone());

        let node: Ipld = DagCborCodec
            .decode(node_bytes)
            .map_err(|e| Error::InvalidWitnessCar(format!("merkle node {current} is not valid dag-cbor: {e}")))?;
        let Ipld::List(elems) = node else {
            return Err(Error::InvalidWitnessCar(format!("merkle node {current} is not a list")));
        };
        let idx = match step {
            Direction::Left => 0,
            Direction::Right => 1,
        };
        let Some(Ipld::Link(next)) = elems.get(idx) else {
            return Err(Error::InvalidWitnessCar(format!(
                "merkle node {current} has no {step} child"
            )));
        };
        current = *next;
    }

    Ok(Car {
        roots: vec![anchor_commit_cid],
        blocks,
    })
}

/// Walk `witnessCar` from root to leaf, returning the anchor commit CID it
/// proves. Fails with `InvalidWitnessCar` naming whichever block is absent.
pub fn verify(witness_car: &Car) -> anchor_core::Result<Cid> {
    let anchor_commit_cid = witness_car
        .roots
        .first()
        .copied()
        .ok_or_else(|| Error::InvalidWitnessCar("witness CAR has no root".into()))?;
    let anchor_commit_bytes = witness_car.blocks.get(&anchor_commit_cid).ok_or_else(|| {
        Error::InvalidWitnessCar("witness CAR missing its own root anchor commit block".into())
    })?;

    let anchor_commit: Ipld = DagCborCodec
        .decode(anchor_commit_bytes)
        .map_err(|e| Error::InvalidWitnessCar(format!("anchor commit is not valid dag-cbor: {e}")))?;
    let proof_cid = ipld_link(&anchor_commit, "proof")?;
    let prev_cid = ipld_link(&anchor_commit, "prev")?;
    let path_str = ipld_string(&anchor_commit, "path")?;

    witness_car
        .blocks
        .get(&proof_cid)
        .ok_or_else(|| Error::InvalidWitnessCar("witness CAR missing proof block".into()))?;

    let path: MerklePath = path_str
        .parse()
        .map_err(|_: Error| Error::InvalidWitnessCar(format!("malformed merkle path {path_str:?}")))?;

    let merkle_root = find_merkle_root(witness_car)?;
    let mut current = merkle_root;
    let mut final_leaf = merkle_root;
    for step in &path.0 {
        let node_bytes = witness_car
            .blocks
            .get(&current)
            .ok_or_else(|| Error::InvalidWitnessCar(format!("witness CAR missing path node {current}")))?;
        let node: Ipld = DagCborCodec
            .decode(node_bytes)
            .map_err(|e| Error::InvalidWitnessCar(format!("path node {current} is not valid dag-cbor: {e}")))?;
        let Ipld::List(elems) = node else {
            return Err(Error::InvalidWitnessCar(format!("path node {current} is not a list")));
        };
        let idx = match step {
            Direction::Left => 0,
            Direction::Right => 1,
        };
        let Some(Ipld::Link(next)) = elems.get(idx) else {
            return Err(Error::InvalidWitnessCar(format!("path node {current} has no {step} child")));
        };
        current = *next;
        final_leaf = *next;
    }

    if final_leaf != prev_cid {
        return Err(Error::InvalidWitnessCar(format!(
            "witness path leaf {final_leaf} does not match anchor commit prev {prev_cid}"
        )));
    }

    Ok(anchor_commit_cid)
}

/// All CIDs a well-formed witness CAR for `anchor_commit_cid` should carry:
/// the commit itself, the proof, the root, and every path node — used to
/// check a CAR is exactly minimal, not merely sufficient.
pub fn cids(witness_car: &Car) -> anchor_core::Result<Vec<Cid>> {
    let anchor_commit_cid = verify(witness_car)?;
    let mut out = vec![anchor_commit_cid];
    let anchor_commit_bytes = &witness_car.blocks[&anchor_commit_cid];
    let anchor_commit: Ipld = DagCborCodec
        .decode(anchor_commit_bytes.as_slice())
        .map_err(|e| Error::InvalidWitnessCar(format!("anchor commit is not valid dag-cbor: {e}")))?;
    out.push(ipld_link(&anchor_commit, "proof")?);

    let path_str = ipld_string(&anchor_commit, "path")?;
    let path: MerklePath = path_str
        .parse()
        .map_err(|_: Error| Error::InvalidWitnessCar(format!("malformed merkle path {path_str:?}")))?;

    let merkle_root = find_merkle_root(witness_car)?;
    out.push(merkle_root);
    let mut current = merkle_root;
    for step in &path.0 {
        let node_bytes = &witness_car.blocks[&current];
        let node: Ipld = DagCborCodec
            .decode(node_bytes.as_slice())
            .map_err(|e| Error::InvalidWitnessCar(format!("path node is not valid dag-cbor: {e}")))?;
        let Ipld::List(elems) = node else {
            return Err(Error::InvalidWitnessCar("path node is not a list".into()));
        };
        let idx = match step {
            Direction::Left => 0,
            Direction::Right => 1,
        };
        let Some(Ipld::Link(next)) = elems.get(idx) else {
            return Err(Error::InvalidWitnessCar("path node missing child".into()));
        };
        current = *next;
        out.push(current);
    }
    Ok(out)
}

/// The merkle root is the one block in the CAR that is neither the anchor
/// commit nor the proof, and is the sole node never referenced as a child
/// by another node — i.e. a list-shaped block with no inbound link from
/// any other list-shaped block present.
fn find_merkle_root(witness_car: &Car) -> anchor_core::Result<Cid> {
    let anchor_commit_cid = *witness_car
        .roots
        .first()
        .ok_or_else(|| Error::InvalidWitnessCar("witness CAR has no root".into()))?;

    let mut list_nodes = Vec::new();
    let mut referenced = std::collections::HashSet::new();
    for (cid, bytes) in &witness_car.blocks {
        if *cid == anchor_commit_cid {
            continue;
        }
        if let Ok(Ipld::List(elems)) = DagCborCodec.decode::<Ipld>(bytes.as_slice()) {
            for elem in &elems {
                if let Ipld::Link(child) = elem {
                    referenced.insert(*child);
                }
            }
            list_nodes.push(*cid);
        }
    }

    list_nodes
        .into_iter()
        .find(|cid| !referenced.contains(cid))
        .ok_or_else(|| Error::InvalidWitnessCar("witness CAR missing merkle root block".into()))
}

fn ipld_link(node: &Ipld, key: &str) -> anchor_core::Result<Cid> {
    match node.get(key) {
        Ok(Ipld::Link(cid)) => Ok(*cid),
        _ => Err(Error::InvalidWitnessCar(format!("anchor commit missing link field {key:?}"))),
    }
}

fn ipld_string(node: &Ipld, key: &str) -> anchor_core::Result<String> {
    match node.get(key) {
        Ok(Ipld::String(s)) => Ok(s.clone()),
        _ => Err(Error::InvalidWitnessCar(format!("anchor commit missing string field {key:?}"))),
    }
}
