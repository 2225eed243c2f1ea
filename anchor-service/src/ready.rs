//! Ready Scheduler (§4.4, §4.10): the API-side periodic task that
//! aggregates PENDING rows into a READY batch and emits an anchor trigger
//! for a worker to consume. Runs under the same cross-process advisory
//! mutex as the Anchor Service, since both read/write request status.

use std::sync::Arc;

use anchor_core::AnchorConfig;
use anchor_db::{acquire_mutex, PgPool, RequestRepository};

use crate::queue::AnchorTrigger;

pub struct ReadyRunner {
    pool: PgPool,
    request_repo: RequestRepository,
    trigger: Arc<dyn AnchorTrigger>,
    config: AnchorConfig,
}

impl ReadyRunner {
    pub fn new(
        pool: PgPool,
        request_repo: RequestRepository,
        trigger: Arc<dyn AnchorTrigger>,
        config: AnchorConfig,
    ) -> Self {
        Self {
            pool,
            request_repo,
            trigger,
            config,
        }
    }

    /// One tick: claim a ready batch under the advisory lock and, if
    /// non-empty, emit the anchor trigger. Mirrors `findAndMarkReady` of
    /// §4.4.
    pub async fn run_once(&self) -> anchor_core::Result<usize> {
        let _guard = acquire_mutex(
            &self.pool,
            self.config.advisory_lock_key,
            self.config.advisory_lock_retries,
            std::time::Duration::from_millis(self.config.advisory_lock_retry_delay_ms),
        )
        .await?;

        let timing: anchor_db::RequestTiming = (&self.config).into();
        let ready = self
            .request_repo
            .find_and_mark_ready(self.config.stream_limit, self.config.min_stream_count, timing)
            .await?;

        if ready.is_empty() {
            return Ok(0);
        }

        if let Err(err) = self.trigger.emit().await {
            tracing::warn!(%err, "failed to emit anchor trigger; worker's own scheduler tick remains the fallback");
        }

        Ok(ready.len())
    }
}
