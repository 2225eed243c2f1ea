use diesel::pg::PgConnection;

use crate::error::{map_join, map_pool};
use crate::pool::PgPool;

/// Bridge a blocking Diesel closure into async code: check out a pooled
/// connection and run `f` on the blocking thread pool. Diesel's `PgConnection`
/// is synchronous; every repository method funnels through this instead of
/// calling Diesel directly on the async executor the way the teacher's
/// `pgsql-store::Client` does, since that crate's callers are exclusively
/// single-shot CLI jobs rather than a concurrently-hit axum server.
pub(crate) async fn blocking<F, T>(pool: &PgPool, f: F) -> anchor_core::Result<T>
where
    F: FnOnce(&mut PgConnection) -> anchor_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().map_err(map_pool)?;
        f(&mut conn)
    })
    .await
    .map_err(map_join)?
}
