use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ethers_core::types::{Address, Bytes, Eip1559TransactionRequest, H256, U256};
use ethers_core::utils::keccak256;
use ethers_middleware::SignerMiddleware;
use ethers_providers::{Http, Middleware, Provider};
use ethers_signers::{LocalWallet, Signer};

use crate::settings::EthSettings;

/// The outcome of `GetTransactionReceipt`: whether the transaction succeeded
/// on-chain, and the block it landed in.
#[derive(Debug, Clone, Copy)]
pub struct ReceiptInfo {
    pub success: bool,
    pub block_number: u64,
}

/// Seam the state machine drives; a real RPC-backed implementation
/// (`EthersAnchorContract`) and a test double both satisfy it, mirroring the
/// teacher's `Arc<dyn StreamOperator>` injection pattern.
#[async_trait]
pub trait AnchorContract: Send + Sync {
    fn chain_name(&self) -> &str;

    /// `GetFeeHistory`: current `(baseFeePerGas, suggested maxPriorityFeePerGas)`.
    async fn suggest_fees(&self) -> anyhow::Result<(U256, U256)>;

    /// `SimulateContract`: a dry-run `eth_call` against `anchorDagCbor(root)`.
    async fn simulate(&self, root: [u8; 32], max_fee_per_gas: U256, max_priority_fee_per_gas: U256) -> anyhow::Result<()>;

    /// `WriteContract`: send the signed transaction, return its hash.
    async fn write(&self, root: [u8; 32], max_fee_per_gas: U256, max_priority_fee_per_gas: U256) -> anyhow::Result<H256>;

    /// `GetTransactionReceipt`: `None` while still pending.
    async fn receipt(&self, tx_hash: H256) -> anyhow::Result<Option<ReceiptInfo>>;

    /// `GetBlock`: the timestamp of the block the receipt landed in.
    async fn block_timestamp(&self, block_number: u64) -> anyhow::Result<DateTime<Utc>>;
}

type SignerProvider = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Calls the `anchorDagCbor(bytes32)` contract function directly (selector +
/// raw 32-byte argument) rather than through an `abigen!`-generated binding,
/// since this workspace pins the split `ethers-*` crates and not
/// `ethers-contract`.
pub struct EthersAnchorContract {
    client: SignerProvider,
    contract_address: Address,
    chain_name: String,
}

const ANCHOR_FN_SIGNATURE: &str = "anchorDagCbor(bytes32)";

impl EthersAnchorContract {
    pub async fn connect(settings: &EthSettings) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(settings.rpc_url.as_str())?;
        let wallet: LocalWallet = settings.private_key.parse::<LocalWallet>()?.with_chain_id(settings.chain_id);
        let client = SignerMiddleware::new(provider, wallet);
        Ok(Self {
            client,
            contract_address: settings.contract_address()?,
            chain_name: format!("eip155:{}", settings.chain_id),
        })
    }

    fn call_data(root: [u8; 32]) -> Bytes {
        let selector = &keccak256(ANCHOR_FN_SIGNATURE.as_bytes())[..4];
        let mut data = Vec::with_capacity(4 + 32);
        data.extend_from_slice(selector);
        data.extend_from_slice(&root);
        Bytes::from(data)
    }

    fn tx_request(&self, root: [u8; 32], max_fee_per_gas: U256, max_priority_fee_per_gas: U256) -> Eip1559TransactionRequest {
        Eip1559TransactionRequest::new()
            .to(self.contract_address)
            .data(Self::call_data(root))
            .max_fee_per_gas(max_fee_per_gas)
            .max_priority_fee_per_gas(max_priority_fee_per_gas)
            .chain_id(self.client.signer().chain_id())
    }
}

#[async_trait]
impl AnchorContract for EthersAnchorContract {
    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    async fn suggest_fees(&self) -> anyhow::Result<(U256, U256)> {
        let history = self.client.fee_history(1u64, ethers_core::types::BlockNumber::Latest, &[]).await?;
        let base_fee = *history.base_fee_per_gas.last().ok_or_else(|| anyhow::anyhow!("empty fee history"))?;
        let priority = self.client.get_gas_price().await?;
        Ok((base_fee, priority))
    }

    async fn simulate(&self, root: [u8; 32], max_fee_per_gas: U256, max_priority_fee_per_gas: U256) -> anyhow::Result<()> {
        let tx = self.tx_request(root, max_fee_per_gas, max_priority_fee_per_gas).into();
        self.client.call(&tx, None).await?;
        Ok(())
    }

    async fn write(&self, root: [u8; 32], max_fee_per_gas: U256, max_priority_fee_per_gas: U256) -> anyhow::Result<H256> {
        let tx = self.tx_request(root, max_fee_per_gas, max_priority_fee_per_gas);
        let pending = self.client.send_transaction(tx, None).await?;
        Ok(pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: H256) -> anyhow::Result<Option<ReceiptInfo>> {
        let receipt = self.client.get_transaction_receipt(tx_hash).await?;
        Ok(receipt.map(|r| ReceiptInfo {
            success: r.status.map(|s| s == 1.into()).unwrap_or(false),
            block_number: r.block_number.map(|b| b.as_u64()).unwrap_or_default(),
        }))
    }

    async fn block_timestamp(&self, block_number: u64) -> anyhow::Result<DateTime<Utc>> {
        let block_id = ethers_core::types::BlockId::Number(ethers_core::types::BlockNumber::Number(block_number.into()));
        let block = self
            .client
            .get_block(block_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("block {block_number} not found"))?;
        Utc.timestamp_opt(block.timestamp.as_u64() as i64, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid block timestamp"))
    }
}
