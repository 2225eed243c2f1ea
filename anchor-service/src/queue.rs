//! Event / Queue producers (§2): the Ready Scheduler's "a ready batch
//! exists" signal to a worker, and decoupling of API request intake from
//! anchor-batch processing.
//!
//! Grounded on `anchor-merkle::car`'s precedent of a plain `reqwest` backend
//! where the pack has no example pulling in a managed-queue SDK for a
//! handful of calls (see DESIGN.md) — the webhook trigger below is the
//! concrete backend; `AnchorTrigger` itself is queue-agnostic so an SQS (or
//! any other) backend can be added without touching callers.

use async_trait::async_trait;

/// Fired once a batch of requests has been marked READY, so a worker
/// process picks up `anchor_requests()` without waiting for its next
/// scheduler tick.
#[async_trait]
pub trait AnchorTrigger: Send + Sync {
    async fn emit(&self) -> anyhow::Result<()>;
}

/// POSTs an empty notification to a configured webhook URL. Delivery is
/// best-effort: a worker's own Scheduler tick is the authoritative fallback
/// if the webhook is unreachable, so failures are logged, not retried here.
pub struct WebhookTrigger {
    http: reqwest::Client,
    url: String,
}

impl WebhookTrigger {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AnchorTrigger for WebhookTrigger {
    async fn emit(&self) -> anyhow::Result<()> {
        self.http
            .post(&self.url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// No-op backend for single-process deployments where the worker polls its
/// own Scheduler and no external signal is needed.
pub struct NullTrigger;

#[async_trait]
impl AnchorTrigger for NullTrigger {
    async fn emit(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_trigger_always_succeeds() {
        NullTrigger.emit().await.unwrap();
    }
}
