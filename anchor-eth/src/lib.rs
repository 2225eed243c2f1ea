//! Ethereum Transaction State Machine (§4.11): `GetFeeHistory ->
//! SimulateContract -> WriteContract -> GetTransactionReceipt -> GetBlock ->
//! done`, with per-step retry and attempt-scoped fee bumps on a reverted
//! receipt. Grounded on `bonapart3-guardrail::chain-anchor`'s
//! `anchor_to_ethereum` (abigen!+`SignerMiddleware`) generalized from its
//! fixed `storeBatch` ABI to the spec's `anchorDagCbor(bytes32)` call and its
//! EIP-1559 fee-bump loop, adapted to the split `ethers-core`/`-providers`/
//! `-signers`/`-middleware` crates this workspace pins instead of the
//! unified `ethers` crate.

mod contract;
mod settings;
mod state_machine;

pub use contract::{AnchorContract, EthersAnchorContract, ReceiptInfo};
pub use settings::EthSettings;
pub use state_machine::EthAnchorService;

/// Object-safe seam over `EthAnchorService<C>` so callers outside this crate
/// (the Anchor Service pipeline) can hold `Arc<dyn TransactionSubmitter>`
/// without naming the concrete `AnchorContract` type parameter.
#[async_trait::async_trait]
pub trait TransactionSubmitter: Send + Sync {
    async fn submit_root(
        &self,
        root: [u8; 32],
        cancel: Option<tokio_util::sync::CancellationToken>,
    ) -> anchor_core::Result<anchor_core::model::Transaction>;
}

#[async_trait::async_trait]
impl<C: AnchorContract> TransactionSubmitter for EthAnchorService<C> {
    async fn submit_root(
        &self,
        root: [u8; 32],
        cancel: Option<tokio_util::sync::CancellationToken>,
    ) -> anchor_core::Result<anchor_core::model::Transaction> {
        EthAnchorService::submit_root(self, root, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use ethers_core::types::{H256, U256};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// An in-memory `AnchorContract` double: every receipt after
    /// `revert_until_attempt` succeeds, so the fee-bump/retry loop of
    /// `EthAnchorService::submit_root` can be exercised without an RPC node.
    struct FakeContract {
        revert_until_attempt: u32,
        calls: AtomicU32,
        seen_priorities: Mutex<Vec<U256>>,
    }

    #[async_trait]
    impl AnchorContract for FakeContract {
        fn chain_name(&self) -> &str {
            "eip155:1337"
        }

        async fn suggest_fees(&self) -> anyhow::Result<(U256, U256)> {
            Ok((U256::from(100u64), U256::from(10u64)))
        }

        async fn simulate(&self, _root: [u8; 32], _max_fee: U256, _priority: U256) -> anyhow::Result<()> {
            Ok(())
        }

        async fn write(&self, _root: [u8; 32], _max_fee: U256, priority: U256) -> anyhow::Result<H256> {
            self.seen_priorities.lock().unwrap().push(priority);
            Ok(H256::from_low_u64_be(self.calls.fetch_add(1, Ordering::SeqCst) as u64 + 1))
        }

        async fn receipt(&self, tx_hash: H256) -> anyhow::Result<Option<ReceiptInfo>> {
            let attempt = tx_hash.to_low_u64_be();
            Ok(Some(ReceiptInfo {
                success: attempt >= self.revert_until_attempt as u64,
                block_number: 42,
            }))
        }

        async fn block_timestamp(&self, _block_number: u64) -> anyhow::Result<chrono::DateTime<Utc>> {
            Ok(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_without_fee_bump() {
        let contract = FakeContract {
            revert_until_attempt: 1,
            calls: AtomicU32::new(0),
            seen_priorities: Mutex::new(Vec::new()),
        };
        let service = EthAnchorService::new(contract, std::time::Duration::from_secs(5), 3);
        let tx = service.submit_root([7u8; 32], None).await.unwrap();
        assert_eq!(tx.chain, "eip155:1337");
        assert_eq!(tx.block_number, 42);
        let priorities = service.contract().seen_priorities.lock().unwrap();
        assert_eq!(priorities.len(), 1);
        assert_eq!(priorities[0], U256::from(10u64));
    }

    #[tokio::test]
    async fn bumps_priority_fee_on_each_retry() {
        let contract = FakeContract {
            revert_until_attempt: 3,
            calls: AtomicU32::new(0),
            seen_priorities: Mutex::new(Vec::new()),
        };
        let service = EthAnchorService::new(contract, std::time::Duration::from_secs(5), 3);
        let tx = service.submit_root([7u8; 32], None).await.unwrap();
        assert_eq!(tx.block_number, 42);
        let priorities = service.contract().seen_priorities.lock().unwrap().clone();
        // attempt 1 unscaled, attempt 2 *1.2, attempt 3 *1.3 (suggested=10).
        assert_eq!(priorities, vec![U256::from(10u64), U256::from(12u64), U256::from(13u64)]);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_transaction_failure() {
        let contract = FakeContract {
            revert_until_attempt: u32::MAX,
            calls: AtomicU32::new(0),
            seen_priorities: Mutex::new(Vec::new()),
        };
        let service = EthAnchorService::new(contract, std::time::Duration::from_secs(5), 3);
        let err = service.submit_root([7u8; 32], None).await.unwrap_err();
        assert_eq!(err.code(), "TRANSACTION_FAILURE");
    }
}
