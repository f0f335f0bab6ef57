//! Node-wide configuration (spec.md §9 Open Questions: reward schedule and
//! retarget window are parametric, not hard-coded). Loaded from a TOML file
//! with environment overrides, following the teacher's `config` crate + TOML
//! pattern.

use anyhow::Result;
use corechain_consensus::ConsensusConfig;
use corechain_core::validate::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub bind_addr: String,
    /// Sync-in-progress margin (spec.md §6/§7): handlers needing a
    /// consistent tip return the advisory instead of chain-derived data
    /// while `known_length > length + sync_margin`.
    pub sync_margin: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP base URLs of configured peers (spec.md §4.7).
    pub peers: Vec<String>,
    pub poll_interval_ms: u64,
    /// Minimum per-peer jitter between polls (spec.md §4.7: "jitter ≥ 500 ms").
    pub peer_jitter_ms: u64,
    /// `K`: the fixed reorg depth cap. Deeper reorgs are refused.
    pub reorg_depth_cap: u64,
    /// Cap on the number of blocks fetched/served in a single range request.
    pub range_cap: u64,
    pub backoff_initial_secs: u64,
    pub backoff_cap_secs: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    pub enabled: bool,
    pub wallet_name: Option<String>,
    /// Nonce attempts between cooperative tip-change checks (spec.md §4.8).
    pub yield_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Bech32-ish address (see `corechain_crypto::address_to_string`) to
    /// credit the genesis reward to. A fresh node with an empty chain mines
    /// and applies a single genesis block to this address before it starts
    /// accepting peer/RPC traffic; `None` means wait to receive a genesis
    /// block from a peer instead.
    pub miner_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorechainConfig {
    pub node_id: Option<String>,
    pub storage: StorageConfig,
    pub rpc: RpcConfig,
    pub network: NetworkConfig,
    pub consensus: ConsensusConfig,
    pub validation: ValidationConfig,
    pub mempool: MempoolConfig,
    pub mining: MiningConfig,
    #[serde(default)]
    pub genesis: GenesisConfig,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self { miner_address: None }
    }
}

impl CorechainConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("CORECHAIN").separator("__"));
        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// A config sufficient to run a fresh single-node devnet, used by
    /// `corechain-cli init` and as the baseline for tests.
    pub fn example() -> Self {
        Self {
            node_id: None,
            storage: StorageConfig {
                data_dir: "data/corechain".into(),
            },
            rpc: RpcConfig {
                bind_addr: "0.0.0.0:8080".into(),
                sync_margin: 2,
            },
            network: NetworkConfig {
                peers: vec![],
                poll_interval_ms: 5_000,
                peer_jitter_ms: 500,
                reorg_depth_cap: 100,
                range_cap: 50,
                backoff_initial_secs: 10,
                backoff_cap_secs: 600,
                request_timeout_ms: 5_000,
            },
            consensus: ConsensusConfig::default(),
            validation: ValidationConfig::default(),
            mempool: MempoolConfig { capacity: 5_000 },
            mining: MiningConfig {
                enabled: false,
                wallet_name: None,
                yield_interval: 100_000,
            },
            genesis: GenesisConfig { miner_address: None },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_round_trips_through_toml() {
        let cfg = CorechainConfig::example();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let back: CorechainConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.network.reorg_depth_cap, cfg.network.reorg_depth_cap);
    }
}
