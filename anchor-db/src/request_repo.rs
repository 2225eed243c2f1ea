//! Request Repository (§4.4): all request-row SQL, including the
//! ready-batch claim algorithm under the advisory lock.

use std::collections::BTreeSet;
use std::time::Duration;

use anchor_core::model::{FreshRequest, Request, RequestStatus};
use anchor_core::CONFLICT_RESOLUTION_MESSAGE;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use int_enum::IntEnum;
use uuid::Uuid;

use crate::error::map_diesel;
use crate::models::RequestRow;
use crate::pool::PgPool;
use crate::schema::request::dsl as r;
use crate::util::blocking;

#[derive(Clone)]
pub struct RequestRepository {
    pool: PgPool,
}

/// Timing constants of §4.4, with the spec's defaults.
#[derive(Debug, Clone, Copy)]
pub struct RequestTiming {
    pub max_anchoring_delay: Duration,
    pub processing_timeout: Duration,
    pub failure_retry_window: Duration,
    pub gc_window: Duration,
}

impl Default for RequestTiming {
    fn default() -> Self {
        Self {
            max_anchoring_delay: Duration::from_secs(12 * 3600),
            processing_timeout: Duration::from_secs(3 * 3600),
            failure_retry_window: Duration::from_secs(6 * 3600),
            gc_window: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

impl RequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `create` (§4.4): INSERT; on unique-violation of `cid`, return the
    /// existing row instead of erroring — this is how §4.3 step 3's
    /// idempotent POST is implemented underneath.
    pub async fn create(&self, fresh: FreshRequest) -> anchor_core::Result<Request> {
        blocking(&self.pool, move |conn| {
            let now = Utc::now();
            let row = RequestRow::new(&fresh, now);
            let inserted = diesel::insert_into(r::request)
                .values(&row)
                .on_conflict(r::cid)
                .do_nothing()
                .get_result::<RequestRow>(conn)
                .optional()
                .map_err(map_diesel)?;

            let row = match inserted {
                Some(row) => row,
                None => r::request
                    .filter(r::cid.eq(&fresh.cid))
                    .select(RequestRow::as_select())
                    .first(conn)
                    .map_err(map_diesel)?,
            };
            row.try_into()
        })
        .await
    }

    pub async fn find_by_cid(&self, cid: String) -> anchor_core::Result<Option<Request>> {
        blocking(&self.pool, move |conn| {
            let row = r::request
                .filter(r::cid.eq(&cid))
                .select(RequestRow::as_select())
                .first::<RequestRow>(conn)
                .optional()
                .map_err(map_diesel)?;
            row.map(Request::try_from).transpose()
        })
        .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> anchor_core::Result<Option<Request>> {
        blocking(&self.pool, move |conn| {
            let row = r::request
                .filter(r::id.eq(id))
                .select(RequestRow::as_select())
                .first::<RequestRow>(conn)
                .optional()
                .map_err(map_diesel)?;
            row.map(Request::try_from).transpose()
        })
        .await
    }

    /// `markReplaced` (§4.4): mark prior PENDING/READY/PROCESSING/FAILED/
    /// REPLACED rows on the same stream older than `request` as REPLACED, so
    /// that after this step runs no older row on the stream remains in
    /// PENDING/READY/PROCESSING (§8 invariant).
    pub async fn mark_replaced(&self, request: &Request) -> anchor_core::Result<usize> {
        let stream_id = request.stream_id.clone();
        let created_at = request.created_at;
        let keep_id = request.id;
        blocking(&self.pool, move |conn| {
            let replaceable = [
                RequestStatus::Pending.int_value(),
                RequestStatus::Ready.int_value(),
                RequestStatus::Processing.int_value(),
                RequestStatus::Failed.int_value(),
                RequestStatus::Replaced.int_value(),
            ];
            diesel::update(
                r::request
                    .filter(r::stream_id.eq(&stream_id))
                    .filter(r::id.ne(keep_id))
                    .filter(r::created_at.lt(created_at))
                    .filter(r::status.eq_any(replaceable)),
            )
            .set((
                r::status.eq(RequestStatus::Replaced.int_value()),
                r::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .map_err(map_diesel)
        })
        .await
    }

    /// The ready-batch claim (§4.4). Runs inside a single transaction; the
    /// caller is expected to already hold the advisory lock (§4.10) for the
    /// duration of the call.
    pub async fn find_and_mark_ready(
        &self,
        stream_limit: usize,
        min_stream_count: usize,
        timing: RequestTiming,
    ) -> anchor_core::Result<Vec<Request>> {
        blocking(&self.pool, move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let ready_int = RequestStatus::Ready.int_value();
                let existing: Vec<RequestRow> = r::request
                    .filter(r::status.eq(ready_int))
                    .select(RequestRow::as_select())
                    .load(conn)?;
                if !existing.is_empty() {
                    return Ok(existing);
                }

                let now = Utc::now();
                let pending: Vec<RequestRow> = r::request
                    .filter(r::status.eq(RequestStatus::Pending.int_value()))
                    .select(RequestRow::as_select())
                    .load(conn)?;

                let processing_cutoff = now - chrono::Duration::from_std(timing.processing_timeout).unwrap();
                let retryable_processing: Vec<RequestRow> = r::request
                    .filter(r::status.eq(RequestStatus::Processing.int_value()))
                    .filter(r::updated_at.lt(processing_cutoff))
                    .select(RequestRow::as_select())
                    .load(conn)?;

                let failure_cutoff = now - chrono::Duration::from_std(timing.failure_retry_window).unwrap();
                let retryable_failed: Vec<RequestRow> = r::request
                    .filter(r::status.eq(RequestStatus::Failed.int_value()))
                    .filter(r::created_at.ge(failure_cutoff))
                    .filter(r::message.ne(CONFLICT_RESOLUTION_MESSAGE))
                    .select(RequestRow::as_select())
                    .load(conn)?;

                let delay_cutoff = now - chrono::Duration::from_std(timing.max_anchoring_delay).unwrap();
                let selected_ids = select_ready_batch(
                    &pending,
                    retryable_processing,
                    retryable_failed,
                    stream_limit,
                    min_stream_count,
                    delay_cutoff,
                );

                if selected_ids.is_empty() {
                    return Ok(Vec::new());
                }

                diesel::update(r::request.filter(r::id.eq_any(&selected_ids)))
                    .set((r::status.eq(ready_int), r::updated_at.eq(now)))
                    .execute(conn)?;

                r::request
                    .filter(r::id.eq_any(&selected_ids))
                    .select(RequestRow::as_select())
                    .load(conn)
            })
            .map_err(map_diesel)?
            .into_iter()
            .map(Request::try_from)
            .collect()
        })
        .await
    }

    /// `findAndMarkAsProcessing` (§4.4): transition every READY row to
    /// PROCESSING and return them. Called by the Anchor Service once it has
    /// acquired the cross-process mutex.
    pub async fn find_and_mark_as_processing(&self) -> anchor_core::Result<Vec<Request>> {
        blocking(&self.pool, move |conn| {
            conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let now = Utc::now();
                let ids: Vec<Uuid> = r::request
                    .filter(r::status.eq(RequestStatus::Ready.int_value()))
                    .select(r::id)
                    .load(conn)?;
                if ids.is_empty() {
                    return Ok(Vec::new());
                }
                diesel::update(r::request.filter(r::id.eq_any(&ids)))
                    .set((
                        r::status.eq(RequestStatus::Processing.int_value()),
                        r::updated_at.eq(now),
                    ))
                    .execute(conn)?;
                r::request
                    .filter(r::id.eq_any(&ids))
                    .select(RequestRow::as_select())
                    .load(conn)
            })
            .map_err(map_diesel)?
            .into_iter()
            .map(Request::try_from)
            .collect()
        })
        .await
    }

    /// Revert every PROCESSING row of this batch back to PENDING (§4.5
    /// step 3, the `REVERT_TO_PENDING` path, and §7's "any fatal error
    /// during a batch rolls the batch back to PENDING").
    pub async fn revert_processing_to_pending(&self, ids: Vec<Uuid>) -> anchor_core::Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        blocking(&self.pool, move |conn| {
            diesel::update(
                r::request
                    .filter(r::id.eq_any(&ids))
                    .filter(r::status.eq(RequestStatus::Processing.int_value())),
            )
            .set((
                r::status.eq(RequestStatus::Pending.int_value()),
                r::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .map_err(map_diesel)
        })
        .await
    }

    /// Mark specific rows FAILED with `message` — used both for conflict
    /// rejections (sentinel message, excluded from retry) and unreachable
    /// commits (§4.5).
    pub async fn mark_failed(&self, ids: Vec<Uuid>, message: String) -> anchor_core::Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        blocking(&self.pool, move |conn| {
            diesel::update(r::request.filter(r::id.eq_any(&ids)))
                .set((
                    r::status.eq(RequestStatus::Failed.int_value()),
                    r::message.eq(message),
                    r::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .map_err(map_diesel)
        })
        .await
    }

    /// Mark specific rows COMPLETED with `message` (§4.5 step 8).
    pub async fn mark_completed(&self, ids: Vec<Uuid>, message: String) -> anchor_core::Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        blocking(&self.pool, move |conn| {
            diesel::update(r::request.filter(r::id.eq_any(&ids)))
                .set((
                    r::status.eq(RequestStatus::Completed.int_value()),
                    r::message.eq(message),
                    r::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .map_err(map_diesel)
        })
        .await
    }

    /// `findRequestsToGarbageCollect` (§4.4): COMPLETED/FAILED rows whose
    /// `updatedAt` is older than the GC window, excluding pinned rows and
    /// streams with any other request updated within the window.
    pub async fn find_requests_to_garbage_collect(
        &self,
        timing: RequestTiming,
    ) -> anchor_core::Result<Vec<Request>> {
        blocking(&self.pool, move |conn| {
            let now = Utc::now();
            let cutoff = now - chrono::Duration::from_std(timing.gc_window).unwrap();

            let stale: Vec<RequestRow> = r::request
                .filter(r::status.eq_any([
                    RequestStatus::Completed.int_value(),
                    RequestStatus::Failed.int_value(),
                ]))
                .filter(r::updated_at.lt(cutoff))
                .filter(r::pinned.eq(false))
                .select(RequestRow::as_select())
                .load(conn)
                .map_err(map_diesel)?;

            if stale.is_empty() {
                return Ok(Vec::new());
            }

            let streams: Vec<String> = stale.iter().map(|row| row.stream_id.clone()).collect();
            let recently_active: BTreeSet<String> = r::request
                .filter(r::stream_id.eq_any(&streams))
                .filter(r::updated_at.ge(cutoff))
                .select(r::stream_id)
                .load::<String>(conn)
                .map_err(map_diesel)?
                .into_iter()
                .collect();

            stale
                .into_iter()
                .filter(|row| !recently_active.contains(&row.stream_id))
                .map(Request::try_from)
                .collect()
        })
        .await
    }

    /// `updateRequests` (§4.4): bulk status + message update, used by the
    /// garbage collector to drop rows (via the caller's own delete/archival
    /// policy) and by the Anchor Service's misc bookkeeping.
    pub async fn update_status(
        &self,
        ids: Vec<Uuid>,
        status: RequestStatus,
        message: Option<String>,
    ) -> anchor_core::Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        blocking(&self.pool, move |conn| {
            let now = Utc::now();
            match message {
                Some(message) => diesel::update(r::request.filter(r::id.eq_any(&ids)))
                    .set((r::status.eq(status.int_value()), r::message.eq(message), r::updated_at.eq(now)))
                    .execute(conn)
                    .map_err(map_diesel),
                None => diesel::update(r::request.filter(r::id.eq_any(&ids)))
                    .set((r::status.eq(status.int_value()), r::updated_at.eq(now)))
                    .execute(conn)
                    .map_err(map_diesel),
            }
        })
        .await
    }

    pub async fn delete(&self, ids: Vec<Uuid>) -> anchor_core::Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        blocking(&self.pool, move |conn| {
            diesel::delete(r::request.filter(r::id.eq_any(&ids)))
                .execute(conn)
                .map_err(map_diesel)
        })
        .await
    }
}

impl From<&anchor_core::AnchorConfig> for RequestTiming {
    fn from(cfg: &anchor_core::AnchorConfig) -> Self {
        RequestTiming {
            max_anchoring_delay: cfg.max_anchoring_delay(),
            processing_timeout: cfg.processing_timeout(),
            failure_retry_window: cfg.failure_retry_window(),
            gc_window: cfg.gc_window(),
        }
    }
}

/// Pure decision core of `find_and_mark_ready`'s step 3-4 (§4.4), split out
/// of the Diesel transaction so it can be exercised without a database.
/// `pending` is also folded into `retryable_processing`/`retryable_failed`
/// to form the full candidate set; it is passed separately only so the
/// overdue check can look at PENDING rows alone.
fn select_ready_batch(
    pending: &[RequestRow],
    retryable_processing: Vec<RequestRow>,
    retryable_failed: Vec<RequestRow>,
    stream_limit: usize,
    min_stream_count: usize,
    delay_cutoff: DateTime<Utc>,
) -> Vec<Uuid> {
    let mut candidates: Vec<RequestRow> = pending.to_vec();
    candidates.extend(retryable_processing);
    candidates.extend(retryable_failed);

    let has_overdue_pending = pending.iter().any(|row| row.created_at < delay_cutoff);
    let distinct_streams: BTreeSet<&str> = candidates.iter().map(|row| row.stream_id.as_str()).collect();

    if !has_overdue_pending && distinct_streams.len() < min_stream_count {
        return Vec::new();
    }

    candidates.sort_by_key(|row| row.created_at);
    let mut chosen_streams: BTreeSet<String> = BTreeSet::new();
    for row in &candidates {
        if chosen_streams.len() >= stream_limit && !chosen_streams.contains(&row.stream_id) {
            continue;
        }
        chosen_streams.insert(row.stream_id.clone());
    }

    candidates
        .iter()
        .filter(|row| chosen_streams.contains(&row.stream_id))
        .map(|row| row.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn row(stream_id: &str, created_at: DateTime<Utc>) -> RequestRow {
        RequestRow {
            id: Uuid::new_v4(),
            cid: format!("cid-{stream_id}-{created_at}"),
            stream_id: stream_id.to_string(),
            status: RequestStatus::Pending.int_value(),
            message: String::new(),
            pinned: false,
            origin: None,
            timestamp: created_at,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn returns_empty_below_min_stream_count_and_no_overdue() {
        let now = Utc::now();
        let pending = vec![row("a", now), row("b", now)];
        let delay_cutoff = now - ChronoDuration::hours(12);
        let selected = select_ready_batch(&pending, Vec::new(), Vec::new(), 5, 5, delay_cutoff);
        assert!(selected.is_empty());
    }

    #[test]
    fn forces_batch_when_a_pending_row_is_overdue() {
        let now = Utc::now();
        let old = now - ChronoDuration::hours(13);
        let pending = vec![row("a", old)];
        let delay_cutoff = now - ChronoDuration::hours(12);
        let selected = select_ready_batch(&pending, Vec::new(), Vec::new(), 5, 5, delay_cutoff);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn caps_primary_streams_at_stream_limit_but_keeps_all_their_rows() {
        let now = Utc::now();
        let mut pending = Vec::new();
        for i in 0..5 {
            let t = now - ChronoDuration::minutes(10 - i);
            pending.push(row(&format!("stream-{i}"), t));
        }
        // A second row on stream-0, interleaved in time, must ride along
        // with its stream even though stream-0 already filled a slot.
        pending.push(row("stream-0", now - ChronoDuration::minutes(1)));

        let delay_cutoff = now - ChronoDuration::hours(12);
        let selected = select_ready_batch(&pending, Vec::new(), Vec::new(), 2, 1, delay_cutoff);

        // stream-0 and stream-1 are the two oldest distinct streams; both of
        // stream-0's rows come along, stream-1 contributes one.
        assert_eq!(selected.len(), 3);
    }
}
