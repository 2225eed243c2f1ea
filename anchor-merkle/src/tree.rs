//! Merkle tree construction over a batch's candidates (§4.5 step 4).
//! Node CIDs are computed locally with the same `Cid::new_v1(0x71,
//! Sha2_256)` recipe the teacher uses for signed-commit CIDs (see
//! `types::ceramic::jws::ToCid`), rather than round-tripping through Kubo's
//! `dag put` for every internal node.

use anchor_core::codec::{Direction, MerklePath};
use anchor_core::{Error, Result};
use ceramic_core::Cid;
use libipld::cbor::DagCborCodec;
use libipld::multihash::{Code, MultihashDigest};
use libipld::prelude::Codec;
use libipld::Ipld;
use std::collections::BTreeMap;

/// The constructed tree: its root CID, every node block keyed by CID (ready
/// to be written into a CAR file), and the root-to-leaf path of each leaf in
/// the same order the leaves were supplied.
pub struct MerkleTree {
    pub root: Cid,
    pub blocks: BTreeMap<Cid, Vec<u8>>,
    pub paths: Vec<MerklePath>,
}

/// Build a tree over `leaves` (one CID per candidate, in `CompareFn` —
/// i.e. already lexicographically sorted — order). A single leaf still
/// produces one internal node, `merge(leaf, null)`, per §4.5.
pub fn build(leaves: &[Cid], depth_limit: u32) -> Result<MerkleTree> {
    if leaves.is_empty() {
        return Err(Error::InvalidRequest("cannot build a merkle tree with no leaves".into()));
    }
    let max_leaves = 1usize.checked_shl(depth_limit).unwrap_or(usize::MAX);
    if leaves.len() > max_leaves {
        return Err(Error::MerkleDepthError {
            leaves: leaves.len(),
            depth_limit,
        });
    }

    let mut blocks = BTreeMap::new();
    let mut groups: Vec<(Cid, Vec<usize>)> = leaves
        .iter()
        .enumerate()
        .map(|(i, cid)| (*cid, vec![i]))
        .collect();
    let mut leaf_paths: Vec<Vec<Direction>> = vec![Vec::new(); leaves.len()];

    if groups.len() == 1 {
        let (leaf_cid, idxs) = groups.remove(0);
        let (node_cid, node_bytes) = encode_node(leaf_cid, None, None)?;
        blocks.insert(node_cid, node_bytes);
        for i in idxs {
            leaf_paths[i].push(Direction::Left);
        }
        let paths = leaf_paths.into_iter().map(MerklePath).collect();
        return Ok(MerkleTree {
            root: node_cid,
            blocks,
            paths,
        });
    }

    while groups.len() > 1 {
        let mut next = Vec::with_capacity(groups.len().div_ceil(2));
        let mut iter = groups.into_iter();
        while let Some((left_cid, left_idxs)) = iter.next() {
            match iter.next() {
                Some((right_cid, right_idxs)) => {
                    let (node_cid, node_bytes) = encode_node(left_cid, Some(right_cid), None)?;
                    blocks.insert(node_cid, node_bytes);
                    for i in &left_idxs {
                        leaf_paths[*i].push(Direction::Left);
                    }
                    for i in &right_idxs {
                        leaf_paths[*i].push(Direction::Right);
                    }
                    let mut idxs = left_idxs;
                    idxs.extend(right_idxs);
                    next.push((node_cid, idxs));
                }
                None => {
                    // odd one out: merge(leaf, null)
                    let (node_cid, node_bytes) = encode_node(left_cid, None, None)?;
                    blocks.insert(node_cid, node_bytes);
                    for i in &left_idxs {
                        leaf_paths[*i].push(Direction::Left);
                    }
                    next.push((node_cid, left_idxs));
                }
            }
        }
        groups = next;
    }

    let root = groups[0].0;
    // Directions were pushed leaf-first (bottom-up); a path is root-first.
    let paths = leaf_paths
        .into_iter()
        .map(|mut dirs| {
            dirs.reverse();
            MerklePath(dirs)
        })
        .collect();

    Ok(MerkleTree { root, blocks, paths })
}

/// Encode one internal node as the CBOR list `[left, right?, metadata?]`
/// and derive its CID. `metadata` is carried only on the root, and is
/// `None` in every batch this implementation produces (§3: "currently
/// empty/absent in the target spec").
fn encode_node(left: Cid, right: Option<Cid>, metadata: Option<Cid>) -> Result<(Cid, Vec<u8>)> {
    let mut elems = vec![Ipld::Link(left)];
    elems.push(right.map(Ipld::Link).unwrap_or(Ipld::Null));
    if let Some(m) = metadata {
        elems.push(Ipld::Link(m));
    }
    let node = Ipld::List(elems);
    let bytes = DagCborCodec
        .encode(&node)
        .map_err(|e| Error::Other(e.into()))?;
    let cid = Cid::new_v1(0x71, Code::Sha2_256.digest(&bytes));
    Ok((cid, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use libipld::multihash::{Code, MultihashDigest};

    fn leaf(byte: u8) -> Cid {
        Cid::new_v1(0x71, Code::Sha2_256.digest(&[byte]))
    }

    #[test]
    fn single_leaf_wraps_in_merge_with_null() {
        let leaves = vec![leaf(1)];
        let tree = build(&leaves, 32).unwrap();
        assert_eq!(tree.blocks.len(), 1);
        assert_eq!(tree.paths[0], MerklePath(vec![Direction::Left]));
    }

    #[test]
    fn four_leaves_produce_balanced_tree() {
        let leaves = vec![leaf(1), leaf(2), leaf(3), leaf(4)];
        let tree = build(&leaves, 32).unwrap();
        // 2 internal nodes at the bottom level + 1 root
        assert_eq!(tree.blocks.len(), 3);
        assert_eq!(tree.paths[0], MerklePath(vec![Direction::Left, Direction::Left]));
        assert_eq!(tree.paths[1], MerklePath(vec![Direction::Left, Direction::Right]));
        assert_eq!(tree.paths[2], MerklePath(vec![Direction::Right, Direction::Left]));
        assert_eq!(tree.paths[3], MerklePath(vec![Direction::Right, Direction::Right]));
    }

    #[test]
    fn odd_leaf_out_merges_with_null() {
        let leaves = vec![leaf(1), leaf(2), leaf(3)];
        let tree = build(&leaves, 32).unwrap();
        assert_eq!(tree.paths[2], MerklePath(vec![Direction::Right, Direction::Left]));
    }

    #[test]
    fn rejects_batches_over_depth_limit() {
        let leaves: Vec<Cid> = (0..5).map(leaf).collect();
        let err = build(&leaves, 2).unwrap_err();
        assert!(matches!(err, Error::MerkleDepthError { .. }));
    }
}
