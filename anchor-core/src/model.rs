//! The data model of §3: Request, Anchor, Metadata, Transaction, Candidate.
//! These are plain value types; persistence lives in `anchor-db`, which
//! converts to/from its Diesel `Queryable`/`Insertable` rows the way the
//! teacher's `pgsql-store::models` converts to/from `dataverse_ceramic::Event`.

use ceramic_core::{Cid, StreamId};
use chrono::{DateTime, Utc};
use int_enum::IntEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request status, stored as an integer column (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntEnum)]
#[repr(i32)]
pub enum RequestStatus {
    Pending = 0,
    Processing = 1,
    Completed = 2,
    Failed = 3,
    Ready = 4,
    Replaced = 5,
}

impl RequestStatus {
    /// Name as surfaced to HTTP clients. REPLACED is hidden as an internal
    /// detail and always renders as FAILED (§4.3 presentation schema).
    pub fn public_name(self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Processing => "PROCESSING",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Failed | RequestStatus::Replaced => "FAILED",
            RequestStatus::Ready => "READY",
        }
    }
}

/// An anchor request: one (streamId, cid) pair a Ceramic node wants
/// witnessed in a blockchain transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub cid: String,
    pub stream_id: String,
    pub status: RequestStatus,
    pub origin: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the controller when creating a new request row; the
/// repository fills in `id`/`created_at`/`updated_at`.
#[derive(Debug, Clone)]
pub struct FreshRequest {
    pub cid: String,
    pub stream_id: String,
    pub status: RequestStatus,
    pub origin: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl Request {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, RequestStatus::Completed)
    }
}

pub const MESSAGE_PENDING: &str = "Request is pending.";
pub const MESSAGE_ANCHORED: &str = "CID successfully anchored.";
pub const MESSAGE_FAILED_LOAD: &str = "Failed to load commit from IPFS";

/// One anchor per request: the Merkle witness coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    pub id: Uuid,
    pub request_id: Uuid,
    pub path: String,
    pub cid: String,
    pub proof_cid: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The genesis-derived metadata for a stream (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub stream_id: String,
    pub metadata: GenesisMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub used_at: DateTime<Utc>,
}

/// The strict genesis header schema validated by the Metadata Service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisMetadata {
    pub controllers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A blockchain transaction result; not a stored table, carried end-to-end
/// through the anchor pipeline (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub chain: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
}

/// In-memory per-batch aggregation: all in-flight requests for one stream,
/// the selected tip, and those rejected by conflict resolution.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub stream_id: StreamId,
    pub selected: Request,
    pub tip_cid: Cid,
    pub rejected: Vec<Request>,
    /// Set once the Merkle tree and blockchain submission have run.
    pub anchor_commit_cid: Option<Cid>,
    pub proof_cid: Option<Cid>,
    pub path: Option<String>,
}

impl Candidate {
    pub fn new(stream_id: StreamId, selected: Request, tip_cid: Cid) -> Self {
        Self {
            stream_id,
            selected,
            tip_cid,
            rejected: Vec::new(),
            anchor_commit_cid: None,
            proof_cid: None,
            path: None,
        }
    }
}
