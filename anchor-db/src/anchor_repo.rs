//! Anchor Repository (§2, §3): anchors table CRUD. One row per anchored
//! request; `(path, proofCid)` reconstructs the Merkle witness (§3).

use anchor_core::model::{Anchor, RequestStatus};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use int_enum::IntEnum;
use uuid::Uuid;

use crate::error::map_diesel;
use crate::models::AnchorRow;
use crate::pool::PgPool;
use crate::schema::anchor::dsl as a;
use crate::schema::request::dsl as r;
use crate::util::blocking;

#[derive(Clone)]
pub struct AnchorRepository {
    pool: PgPool,
}

impl AnchorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        request_id: Uuid,
        path: String,
        cid: String,
        proof_cid: String,
    ) -> anchor_core::Result<Anchor> {
        blocking(&self.pool, move |conn| {
            let row = AnchorRow::new(request_id, path, cid, proof_cid, chrono::Utc::now());
            diesel::insert_into(a::anchor)
                .values(&row)
                .get_result::<AnchorRow>(conn)
                .map_err(map_diesel)
                .map(Anchor::from)
        })
        .await
    }

    pub async fn find_by_request_id(&self, request_id: Uuid) -> anchor_core::Result<Option<Anchor>> {
        blocking(&self.pool, move |conn| {
            a::anchor
                .filter(a::request_id.eq(request_id))
                .select(AnchorRow::as_select())
                .first::<AnchorRow>(conn)
                .optional()
                .map_err(map_diesel)
                .map(|row| row.map(Anchor::from))
        })
        .await
    }

    pub async fn find_by_cid(&self, cid: String) -> anchor_core::Result<Option<Anchor>> {
        blocking(&self.pool, move |conn| {
            a::anchor
                .filter(a::cid.eq(&cid))
                .select(AnchorRow::as_select())
                .first::<AnchorRow>(conn)
                .optional()
                .map_err(map_diesel)
                .map(|row| row.map(Anchor::from))
        })
        .await
    }

    /// The anchor commit CID of the most recently completed request on
    /// `stream_id`, provided its request row was updated no earlier than
    /// `freshness_cutoff` — backs the pubsub responder's QUERY handling
    /// (§4.8: "look up the latest COMPLETED request on `stream` anchored
    /// within a configured freshness window").
    pub async fn find_recent_tip_by_stream(
        &self,
        stream_id: String,
        freshness_cutoff: DateTime<Utc>,
    ) -> anchor_core::Result<Option<String>> {
        blocking(&self.pool, move |conn| {
            a::anchor
                .inner_join(r::request)
                .filter(r::stream_id.eq(&stream_id))
                .filter(r::status.eq(RequestStatus::Completed.int_value()))
                .filter(r::updated_at.ge(freshness_cutoff))
                .order(r::updated_at.desc())
                .select(a::cid)
                .first::<String>(conn)
                .optional()
                .map_err(map_diesel)
        })
        .await
    }
}
