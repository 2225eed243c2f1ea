//! Deployment-specific Ethereum settings (RPC endpoint, signing key, target
//! contract), loaded the same way as `anchor_core::AnchorConfig` —
//! environment first, via `config`+`dotenvy` — but kept out of that shared
//! struct since these are per-deployment secrets, not pipeline tunables.

use ethers_core::types::Address;
use std::str::FromStr;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EthSettings {
    pub rpc_url: String,
    pub private_key: String,
    contract_address: String,
    pub chain_id: u64,
}

impl EthSettings {
    pub fn load() -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix("CAS_ETH").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn contract_address(&self) -> anyhow::Result<Address> {
        Ok(Address::from_str(&self.contract_address)?)
    }
}
