//! IPFS Service (§4.8): Kubo HTTP RPC access, LRU-cached retrieval with
//! retry/backoff, and the pubsub QUERY responder, behind the `IpfsService`
//! trait object the rest of the workspace depends on.

pub mod cache;
pub mod client;
pub mod pubsub;
pub mod service;

pub use client::KuboHttpClient;
pub use service::{IpfsService, KuboIpfsService};
