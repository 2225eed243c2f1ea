//! Diesel row types for §6's logical schema, and their conversions to/from
//! the plain value types of `anchor_core::model`. Grounded on the teacher's
//! `pgsql-store::models::{Event, Stream}` `TryFrom`/`TryInto` pairs between
//! a Diesel row and a domain type.

use anchor_core::model::{Anchor, FreshRequest, GenesisMetadata, Metadata, Request, RequestStatus};
use anchor_core::Error;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use int_enum::IntEnum;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::request)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RequestRow {
    pub id: Uuid,
    pub cid: String,
    pub stream_id: String,
    pub status: i32,
    pub message: String,
    pub pinned: bool,
    pub origin: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for Request {
    type Error = Error;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let status = RequestStatus::from_int(row.status)
            .map_err(|_| Error::Other(anyhow::anyhow!("invalid request status {}", row.status)))?;
        Ok(Request {
            id: row.id,
            cid: row.cid,
            stream_id: row.stream_id,
            status,
            origin: row.origin,
            timestamp: row.timestamp,
            message: row.message,
            pinned: row.pinned,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl RequestRow {
    pub fn new(fresh: &FreshRequest, now: DateTime<Utc>) -> Self {
        RequestRow {
            id: Uuid::new_v4(),
            cid: fresh.cid.clone(),
            stream_id: fresh.stream_id.clone(),
            status: fresh.status.int_value(),
            message: fresh.message.clone(),
            pinned: false,
            origin: fresh.origin.clone(),
            timestamp: fresh.timestamp,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::anchor)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AnchorRow {
    pub id: Uuid,
    pub request_id: Uuid,
    pub path: String,
    pub cid: String,
    pub proof_cid: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AnchorRow> for Anchor {
    fn from(row: AnchorRow) -> Self {
        Anchor {
            id: row.id,
            request_id: row.request_id,
            path: row.path,
            cid: row.cid,
            proof_cid: row.proof_cid,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl AnchorRow {
    pub fn new(request_id: Uuid, path: String, cid: String, proof_cid: String, now: DateTime<Utc>) -> Self {
        AnchorRow {
            id: Uuid::new_v4(),
            request_id,
            path,
            cid,
            proof_cid,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::metadata)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MetadataRow {
    pub stream_id: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub used_at: DateTime<Utc>,
}

impl TryFrom<MetadataRow> for Metadata {
    type Error = Error;

    fn try_from(row: MetadataRow) -> Result<Self, Self::Error> {
        let metadata: GenesisMetadata =
            serde_json::from_value(row.metadata).map_err(|e| Error::Other(e.into()))?;
        Ok(Metadata {
            stream_id: row.stream_id,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
            used_at: row.used_at,
        })
    }
}

impl MetadataRow {
    pub fn new(stream_id: String, metadata: &GenesisMetadata, now: DateTime<Utc>) -> anchor_core::Result<Self> {
        Ok(MetadataRow {
            stream_id,
            metadata: serde_json::to_value(metadata).map_err(|e| Error::Other(e.into()))?,
            created_at: now,
            updated_at: now,
            used_at: now,
        })
    }
}
