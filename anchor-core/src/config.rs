//! Tunables shared across the repository, scheduler, and anchor pipeline.
//! Loaded by each binary via the `config` crate (`anchor-apid`/`anchor-worker`
//! main.rs), with the defaults below matching §4.4/§4.10/§4.11.

use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AnchorConfig {
    /// An unanchored request this old forces a ready batch regardless of count.
    pub max_anchoring_delay_secs: u64,
    /// A PROCESSING row untouched this long is eligible for re-claim.
    pub processing_timeout_secs: u64,
    /// FAILED rows created within this window (and not conflict-rejected) are retryable.
    pub failure_retry_window_secs: u64,
    /// Rows older than this are candidates for garbage collection (§4.4).
    pub gc_window_secs: u64,

    /// Max distinct streams claimed as "primary" into one ready batch.
    pub stream_limit: usize,
    /// Minimum distinct stream count required to form a batch early.
    pub min_stream_count: usize,
    /// Merkle tree depth limit; `2^depth_limit` is the max leaf count.
    pub merkle_depth_limit: u32,

    pub ipfs_put_timeout_secs: u64,
    pub ipfs_get_timeout_secs: u64,
    pub ipfs_get_retries: u32,
    pub ipfs_cache_size: usize,
    pub ipfs_concurrent_get_limit: usize,

    /// Postgres advisory lock key guarding the batch-claim/anchor critical section.
    pub advisory_lock_key: i64,
    pub advisory_lock_retries: u32,
    pub advisory_lock_retry_delay_ms: u64,

    pub eth_step_timeout_secs: u64,
    pub eth_max_attempts: u32,

    pub scheduler_interval_ms: u64,
    pub witness_cache_size: usize,

    pub pubsub_freshness_window_secs: u64,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            max_anchoring_delay_secs: 12 * 3600,
            processing_timeout_secs: 3 * 3600,
            failure_retry_window_secs: 6 * 3600,
            gc_window_secs: 30 * 24 * 3600,

            stream_limit: 500,
            min_stream_count: 10,
            merkle_depth_limit: 20,

            ipfs_put_timeout_secs: 30,
            ipfs_get_timeout_secs: 10,
            ipfs_get_retries: 3,
            ipfs_cache_size: 1_000,
            ipfs_concurrent_get_limit: 50,

            advisory_lock_key: 0x4341_5321, // "CAS!" as a fixed, arbitrary 64-bit key
            advisory_lock_retries: 5,
            advisory_lock_retry_delay_ms: 500,

            eth_step_timeout_secs: 60,
            eth_max_attempts: 3,

            scheduler_interval_ms: 30_000,
            witness_cache_size: 1_000,

            pubsub_freshness_window_secs: 3600,
        }
    }
}

impl AnchorConfig {
    pub fn load() -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Config::try_from(&AnchorConfig::default())?)
            .add_source(config::Environment::with_prefix("CAS").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn max_anchoring_delay(&self) -> Duration {
        Duration::from_secs(self.max_anchoring_delay_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn failure_retry_window(&self) -> Duration {
        Duration::from_secs(self.failure_retry_window_secs)
    }

    pub fn gc_window(&self) -> Duration {
        Duration::from_secs(self.gc_window_secs)
    }
}
