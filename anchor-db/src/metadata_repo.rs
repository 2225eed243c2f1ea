//! Metadata Repository backing the Metadata Service (§4.2): genesis-derived
//! per-stream metadata, persisted with `onConflict-ignore` and a `usedAt`
//! touch for garbage collection eligibility.

use anchor_core::model::{GenesisMetadata, Metadata};
use diesel::prelude::*;

use crate::error::map_diesel;
use crate::models::MetadataRow;
use crate::pool::PgPool;
use crate::schema::metadata::dsl as m;
use crate::util::blocking;

#[derive(Clone)]
pub struct MetadataRepository {
    pool: PgPool,
}

impl MetadataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(&self, stream_id: String) -> anchor_core::Result<Option<Metadata>> {
        blocking(&self.pool, move |conn| {
            let row = m::metadata
                .filter(m::stream_id.eq(&stream_id))
                .select(MetadataRow::as_select())
                .first::<MetadataRow>(conn)
                .optional()
                .map_err(map_diesel)?;
            row.map(Metadata::try_from).transpose()
        })
        .await
    }

    /// Touch `usedAt` for an existing row — called every time the stream is
    /// the subject of a new request (§3 Metadata lifecycle).
    pub async fn touch(&self, stream_id: String) -> anchor_core::Result<()> {
        blocking(&self.pool, move |conn| {
            diesel::update(m::metadata.filter(m::stream_id.eq(&stream_id)))
                .set(m::used_at.eq(chrono::Utc::now()))
                .execute(conn)
                .map_err(map_diesel)?;
            Ok(())
        })
        .await
    }

    /// Insert the row if absent (`onConflict-ignore`, §4.2). Returns
    /// whether a new row was created, so `fill` can decide whether to touch
    /// `usedAt` afterward.
    pub async fn insert_if_absent(
        &self,
        stream_id: String,
        metadata: GenesisMetadata,
    ) -> anchor_core::Result<bool> {
        blocking(&self.pool, move |conn| {
            let row = MetadataRow::new(stream_id, &metadata, chrono::Utc::now())?;
            let inserted = diesel::insert_into(m::metadata)
                .values(&row)
                .on_conflict(m::stream_id)
                .do_nothing()
                .execute(conn)
                .map_err(map_diesel)?;
            Ok(inserted > 0)
        })
        .await
    }

    /// Rows unused past `retention` — garbage collection candidates (§3).
    pub async fn find_unused_since(
        &self,
        retention: std::time::Duration,
    ) -> anchor_core::Result<Vec<Metadata>> {
        blocking(&self.pool, move |conn| {
            let cutoff = chrono::Utc::now() - chrono::Duration::from_std(retention).unwrap();
            m::metadata
                .filter(m::used_at.lt(cutoff))
                .select(MetadataRow::as_select())
                .load::<MetadataRow>(conn)
                .map_err(map_diesel)?
                .into_iter()
                .map(Metadata::try_from)
                .collect()
        })
        .await
    }

    pub async fn delete(&self, stream_ids: Vec<String>) -> anchor_core::Result<usize> {
        if stream_ids.is_empty() {
            return Ok(0);
        }
        blocking(&self.pool, move |conn| {
            diesel::delete(m::metadata.filter(m::stream_id.eq_any(&stream_ids)))
                .execute(conn)
                .map_err(map_diesel)
        })
        .await
    }
}
