//! Cross-process mutex (§4.10): a Postgres advisory lock guarding the
//! batch-claim/anchor critical section. `pg_try_advisory_lock` is polled
//! with a configurable retry count and delay rather than blocking on
//! `pg_advisory_lock`, so a caller that gives up can still return control
//! to its scheduler loop instead of hanging on the connection.

use std::time::Duration;

use anchor_core::Error;
use diesel::sql_types::{BigInt, Bool};
use diesel::{QueryableByName, RunQueryDsl};

use crate::pool::{PgPool, PgPooledConnection};

#[derive(QueryableByName)]
struct LockAttempt {
    #[diesel(sql_type = Bool)]
    locked: bool,
}

/// Held for the duration of one batch-claim + anchor-persist critical
/// section. Dropping it releases the advisory lock; callers that want to
/// observe release failures should call `release` explicitly instead.
pub struct MutexGuard {
    conn: Option<PgPooledConnection>,
    key: i64,
}

impl MutexGuard {
    /// Explicitly release the lock, observing any failure. A guard that is
    /// merely dropped releases best-effort on a detached blocking task.
    pub async fn release(mut self) -> anchor_core::Result<()> {
        if let Some(mut conn) = self.conn.take() {
            let key = self.key;
            tokio::task::spawn_blocking(move || unlock(&mut conn, key))
                .await
                .map_err(|e| Error::Other(e.into()))??;
        }
        Ok(())
    }
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let key = self.key;
            tokio::task::spawn_blocking(move || {
                if let Err(err) = unlock(&mut conn, key) {
                    tracing::warn!(%err, key, "failed to release advisory lock on drop");
                }
            });
        }
    }
}

fn unlock(conn: &mut diesel::pg::PgConnection, key: i64) -> anchor_core::Result<()> {
    diesel::sql_query("SELECT pg_advisory_unlock($1) AS locked")
        .bind::<BigInt, _>(key)
        .get_result::<LockAttempt>(conn)
        .map_err(|e| Error::Other(e.into()))?;
    Ok(())
}

/// Attempt to acquire the advisory lock identified by `key`, retrying up to
/// `retries` times with `delay` between attempts. Fails with
/// `MutexAcquisitionFailed` once attempts are exhausted (§7).
pub async fn acquire(pool: &PgPool, key: i64, retries: u32, delay: Duration) -> anchor_core::Result<MutexGuard> {
    let mut attempt = 0;
    loop {
        let pool = pool.clone();
        let try_lock = tokio::task::spawn_blocking(move || -> anchor_core::Result<(PgPooledConnection, bool)> {
            let mut conn = pool.get().map_err(|e| Error::Other(e.into()))?;
            let result: LockAttempt = diesel::sql_query("SELECT pg_try_advisory_lock($1) AS locked")
                .bind::<BigInt, _>(key)
                .get_result(&mut conn)
                .map_err(|e| Error::Other(e.into()))?;
            Ok((conn, result.locked))
        })
        .await
        .map_err(|e| Error::Other(e.into()))??;

        let (conn, locked) = try_lock;
        if locked {
            return Ok(MutexGuard { conn: Some(conn), key });
        }

        attempt += 1;
        if attempt > retries {
            return Err(Error::MutexAcquisitionFailed { attempts: attempt });
        }
        tracing::debug!(attempt, key, "advisory lock held elsewhere, retrying");
        tokio::time::sleep(delay).await;
    }
}
