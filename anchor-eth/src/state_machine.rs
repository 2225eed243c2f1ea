use std::future::Future;
use std::time::Duration;

use anchor_core::model::Transaction;
use anchor_core::{Error, Result};
use ethers_core::types::U256;
use tokio_util::sync::CancellationToken;

use crate::contract::AnchorContract;

/// Per-step retry count of §4.11 ("max 3 per step"); a fixed spec constant,
/// distinct from the whole-machine attempt cap which is configurable.
const STEP_RETRIES: u32 = 3;

/// Drives one contract's `anchorDagCbor` call through
/// `GetFeeHistory -> SimulateContract -> WriteContract ->
/// GetTransactionReceipt -> GetBlock -> done` (§4.11), bumping fees and
/// retrying the whole state on a reverted receipt, up to `max_attempts`.
pub struct EthAnchorService<C: AnchorContract> {
    contract: C,
    step_timeout: Duration,
    max_attempts: u32,
}

impl<C: AnchorContract> EthAnchorService<C> {
    pub fn new(contract: C, step_timeout: Duration, max_attempts: u32) -> Self {
        Self { contract, step_timeout, max_attempts }
    }

    #[cfg(test)]
    pub(crate) fn contract(&self) -> &C {
        &self.contract
    }

    pub async fn submit_root(&self, root: [u8; 32], cancel: Option<CancellationToken>) -> Result<Transaction> {
        let mut attempt: u32 = 1;
        loop {
            if let Some(cancel) = &cancel {
                if cancel.is_cancelled() {
                    return Err(Error::TransactionFailure("cancelled".into()));
                }
            }
            if attempt > self.max_attempts {
                return Err(Error::TransactionFailure(format!(
                    "exhausted {} attempts submitting anchor transaction",
                    self.max_attempts
                )));
            }

            let (base_fee, suggested_priority) = self.retry("GetFeeHistory", || self.contract.suggest_fees()).await?;
            let priority = bumped_priority(suggested_priority, attempt);
            let max_fee = max_fee_for(base_fee, priority);

            self.retry("SimulateContract", || self.contract.simulate(root, max_fee, priority)).await?;
            let tx_hash = self.retry("WriteContract", || self.contract.write(root, max_fee, priority)).await?;
            let receipt = self.await_receipt(tx_hash, &cancel).await?;

            if receipt.success {
                let block_timestamp = self.retry("GetBlock", || self.contract.block_timestamp(receipt.block_number)).await?;
                return Ok(Transaction {
                    chain: self.contract.chain_name().to_string(),
                    tx_hash: format!("{tx_hash:?}"),
                    block_number: receipt.block_number,
                    block_timestamp,
                });
            }

            tracing::warn!(attempt, ?tx_hash, "anchor transaction reverted, bumping fees and retrying");
            attempt += 1;
        }
    }

    async fn await_receipt(
        &self,
        tx_hash: ethers_core::types::H256,
        cancel: &Option<CancellationToken>,
    ) -> Result<crate::contract::ReceiptInfo> {
        let deadline = tokio::time::Instant::now() + self.step_timeout;
        let mut poll_delay = Duration::from_millis(500);
        let mut consecutive_errors = 0u32;
        loop {
            if let Some(cancel) = cancel {
                if cancel.is_cancelled() {
                    return Err(Error::TransactionFailure("cancelled".into()));
                }
            }
            match self.contract.receipt(tx_hash).await {
                Ok(Some(info)) => return Ok(info),
                Ok(None) => {}
                Err(err) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= STEP_RETRIES {
                        return Err(Error::TransactionFailure(format!(
                            "GetTransactionReceipt failed after {STEP_RETRIES} attempts: {err}"
                        )));
                    }
                    tracing::warn!(?tx_hash, ?err, consecutive_errors, "receipt fetch failed, retrying");
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::TransactionFailure(format!("GetTransactionReceipt timed out for {tx_hash:?}")));
            }
            tokio::time::sleep(poll_delay).await;
            poll_delay = (poll_delay * 2).min(Duration::from_secs(10));
        }
    }

    /// Runs `f` up to `STEP_RETRIES` times with exponential backoff,
    /// each attempt bounded by `step_timeout` (§4.11 "retried with
    /// exponential backoff" on any transition failure).
    async fn retry<F, Fut, T>(&self, step: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut delay = Duration::from_millis(250);
        let mut last_err = None;
        for step_attempt in 1..=STEP_RETRIES {
            match tokio::time::timeout(self.step_timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => {
                    tracing::warn!(step, step_attempt, ?err, "step failed, retrying");
                    last_err = Some(err.to_string());
                }
                Err(_) => {
                    tracing::warn!(step, step_attempt, "step timed out, retrying");
                    last_err = Some(format!("{step} timed out after {:?}", self.step_timeout));
                }
            }
            if step_attempt < STEP_RETRIES {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
        Err(Error::TransactionFailure(format!(
            "{step} failed after {STEP_RETRIES} attempts: {}",
            last_err.unwrap_or_default()
        )))
    }
}

/// `maxPriorityFeePerGas *= (100 + 10*attempt)/100` (§4.11); the first
/// attempt uses the provider's raw suggestion unscaled.
fn bumped_priority(suggested: U256, attempt: u32) -> U256 {
    if attempt <= 1 {
        return suggested;
    }
    suggested * U256::from(100 + 10 * attempt) / U256::from(100)
}

/// `maxFeePerGas = baseFeePerGas * 1.2 + maxPriorityFeePerGas` (§4.11).
fn max_fee_for(base_fee: U256, priority: U256) -> U256 {
    base_fee * U256::from(12) / U256::from(10) + priority
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumped_priority_unscaled_on_first_attempt() {
        assert_eq!(bumped_priority(U256::from(10u64), 1), U256::from(10u64));
    }

    #[test]
    fn bumped_priority_scales_by_ten_percent_per_attempt() {
        assert_eq!(bumped_priority(U256::from(10u64), 2), U256::from(12u64));
        assert_eq!(bumped_priority(U256::from(10u64), 3), U256::from(13u64));
    }

    #[test]
    fn max_fee_applies_twelve_tenths_base_plus_priority() {
        assert_eq!(max_fee_for(U256::from(100u64), U256::from(10u64)), U256::from(130u64));
    }
}
