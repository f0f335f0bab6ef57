//! Wires the whole node together: storage, chain engine, peer sync, the
//! RPC surface, and (optionally) the local miner — the
//! `corechain-cli node start` entry point. Grounded on the teacher's
//! `run_node` orchestration shape (one `tokio::spawn` per subsystem,
//! joined at the end) but rebuilt around `EngineHandle` as the single
//! writer lane (spec.md §4.6, §5) instead of a shared store handle passed
//! to every subsystem.

pub mod engine;
pub mod mempool;
pub mod miner;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use corechain_config::CorechainConfig;
use corechain_core::{Block, BlockHeader, CryptoProvider, Transaction, TxKind};
use corechain_crypto::DefaultCryptoProvider;
use corechain_network::{PeerBook, PeerConfig, PeerSync};
use corechain_storage::StateDb;
use corechain_wallet::WalletStore;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub use engine::{EngineHandle, EngineMessage};
pub use miner::MinerConfig;

fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn wallets_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".corechain")
        .join("wallets")
}

/// Mines and applies the genesis block (height 0) when the local chain is
/// empty and `cfg.genesis.miner_address` names a recipient (spec.md §6:
/// persisted key `init`; §8 scenario 1: "Genesis block at height 0 gifts
/// address A 100 coins"). A no-op if the chain already has a tip, or if no
/// genesis recipient is configured (the node then waits for a peer to
/// deliver one instead).
fn bootstrap_genesis(state: &StateDb, crypto: &dyn CryptoProvider, cfg: &CorechainConfig) -> Result<()> {
    if state.length()?.is_some() {
        return Ok(());
    }
    let Some(addr_str) = &cfg.genesis.miner_address else {
        info!("no genesis miner configured; waiting to receive a genesis block from a peer");
        return Ok(());
    };
    let miner = corechain_crypto::address_from_string(addr_str)?;
    let target = cfg.consensus.starting_target;
    let reward = Transaction {
        kind: TxKind::Reward,
        count: 0,
        pubkeys: vec![],
        signatures: vec![],
        amount: cfg.consensus.reward_at(0),
        to: None,
        message: vec![],
    };
    let header = BlockHeader {
        length: 0,
        prev_hash: corechain_core::ZERO_HASH,
        target,
        time: corechain_core::now_ts(),
        nonce: 0,
        miner,
    };
    let mut block = Block { header, txs: vec![reward] };
    while !corechain_core::codec::meets_target(&block) {
        block.header.nonce = block.header.nonce.wrapping_add(1);
    }
    state.apply_block(&block, crypto)?;
    info!(miner = %addr_str, "applied genesis block");
    Ok(())
}

/// Starts the node and runs until the engine's stop signal fires (spec.md
/// §5: "the chain engine drains its queue, refuses new work, and exits",
/// with the RPC/KV façade joined last).
pub async fn run_node(config_path: PathBuf) -> Result<()> {
    let cfg = CorechainConfig::load(&config_path)?;
    init_logging();
    info!(config = ?config_path, "starting corechain node");
    run_node_with_config(cfg).await
}

pub async fn run_node_with_config(cfg: CorechainConfig) -> Result<()> {
    let data_dir = Path::new(&cfg.storage.data_dir);
    std::fs::create_dir_all(data_dir)?;
    let lock_path = data_dir.join("LOCK");
    let _lock = acquire_lock(&lock_path)?;

    let state = Arc::new(StateDb::open(data_dir, cfg.validation.clone(), cfg.consensus.clone())?);
    let crypto: Arc<dyn CryptoProvider> = Arc::new(DefaultCryptoProvider::new());
    bootstrap_genesis(&state, crypto.as_ref(), &cfg)?;

    let node_id = cfg.node_id.clone().unwrap_or_else(|| {
        let existing = state.node_id().ok().flatten();
        existing.unwrap_or_else(|| {
            let id = random_node_id();
            let _ = state.set_node_id(&id);
            id
        })
    });

    let peer_cfg = PeerConfig {
        peers: cfg.network.peers.clone(),
        poll_interval_ms: cfg.network.poll_interval_ms,
        peer_jitter_ms: cfg.network.peer_jitter_ms,
        reorg_depth_cap: cfg.network.reorg_depth_cap,
        range_cap: cfg.network.range_cap,
        backoff_initial_secs: cfg.network.backoff_initial_secs,
        backoff_cap_secs: cfg.network.backoff_cap_secs,
        request_timeout_ms: cfg.network.request_timeout_ms,
    };
    let peer_book = PeerBook::new(peer_cfg.clone());

    let engine = EngineHandle::spawn(
        state,
        crypto.clone(),
        cfg.validation.clone(),
        peer_book.clone(),
        cfg.mempool.capacity,
        node_id.clone(),
        cfg.network.range_cap,
        cfg.rpc.sync_margin,
    );

    let stop = engine.stop_signal();
    let peer_sync = PeerSync::new(peer_cfg, peer_book, Arc::new(engine.clone()), node_id.clone())?;
    let peer_task = tokio::spawn(peer_sync.run(stop.clone()));

    let wallets = Arc::new(WalletStore::new(wallets_dir())?);

    let miner_task = if cfg.mining.enabled {
        let wallet_name = cfg
            .mining
            .wallet_name
            .clone()
            .ok_or_else(|| anyhow!("mining.enabled is true but no mining.wallet_name configured"))?;
        let wallet = wallets.load(&wallet_name)?;
        engine.set_mining(true);
        let miner_cfg = MinerConfig {
            miner_address: wallet.address,
            yield_interval: cfg.mining.yield_interval,
            idle_poll_ms: 500,
        };
        Some(tokio::spawn(miner::run(
            engine.clone(),
            miner_cfg,
            cfg.validation.clone(),
            stop.clone(),
        )))
    } else {
        None
    };

    let bind_addr = cfg.rpc.bind_addr.clone();
    let rpc_engine: Arc<dyn corechain_rpc::EngineApi> = Arc::new(engine.clone());
    let rpc_task = tokio::spawn(async move {
        corechain_rpc::start_server(&bind_addr, rpc_engine, wallets, stop).await
    });

    rpc_task.await??;
    peer_task.await?;
    if let Some(t) = miner_task {
        t.await?;
    }
    warn!("corechain node stopped");
    Ok(())
}

/// A trivial PID-file-shaped single-writer lock (spec.md §6 CLI exit code
/// `2`: "engine already running (lock held)"). Removed when the node
/// shuts down.
struct NodeLock(PathBuf);

impl Drop for NodeLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn acquire_lock(path: &Path) -> Result<NodeLock> {
    use std::io::Write;
    match std::fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut f) => {
            let _ = write!(f, "{}", std::process::id());
            Ok(NodeLock(path.to_path_buf()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(anyhow!("engine already running (lock held at {path:?})"))
        }
        Err(e) => Err(e.into()),
    }
}

fn random_node_id() -> String {
    let mut bytes = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    hex::encode(bytes)
}
