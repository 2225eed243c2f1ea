//! Merkle CAR Service (§4.6) and Witness Service (§4.7): builds the batch
//! Merkle tree, stores/retrieves its CAR file, and extracts/verifies the
//! minimal per-request witness CAR.

pub mod car;
pub mod tree;
pub mod witness;

pub use car::{Car, CarStore, CachedCarStore, InMemoryCarStore, S3CarStore};
pub use tree::{build as build_tree, MerkleTree};
