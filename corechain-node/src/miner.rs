//! The miner (spec.md §4.8): assembles a candidate block from the mempool
//! and searches for a nonce, cooperatively, re-checking the tip between
//! bounded passes (spec.md §5: "a cooperative loop with a bounded
//! per-iteration budget and an explicit tip-change check").

use std::time::Duration;

use corechain_consensus::mine_pass;
use corechain_core::{Block, BlockHeader, Transaction, TxKind};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::engine::EngineHandle;

#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub miner_address: corechain_core::Address,
    /// Nonce attempts per pass before re-checking the tip (spec.md §4.8:
    /// "every N attempts it re-reads the tip").
    pub yield_interval: u64,
    /// How long to idle between passes while mining is disabled or no
    /// candidate can be built.
    pub idle_poll_ms: u64,
}

fn candidate_hash(block: &Block, nonce: u64) -> [u8; 32] {
    let mut b = block.clone();
    b.header.nonce = nonce;
    corechain_core::codec::block_hash(&b)
}

/// Assembles a candidate at `length+1` atop the current tip (spec.md §4.8).
fn assemble_candidate(engine: &EngineHandle, cfg: &MinerConfig, validation: &corechain_core::validate::ValidationConfig) -> Block {
    let height = engine.length();
    let target = engine.difficulty();
    let crypto = corechain_crypto::DefaultCryptoProvider::new();
    let state = engine.state.clone();
    let reward_amount = state.consensus.reward_at(height);
    let reward = Transaction {
        kind: TxKind::Reward,
        count: 0,
        pubkeys: vec![],
        signatures: vec![],
        amount: reward_amount,
        to: None,
        message: vec![],
    };
    let mut txs = vec![reward];
    let selected = {
        let pool_txs = engine.mempool_snapshot();
        // Re-derive admissibility against live state rather than trusting
        // the snapshot verbatim — the tip may have moved since it was taken.
        let mut mempool = crate::mempool::Mempool::new(pool_txs.len().max(1));
        for tx in pool_txs {
            let _ = mempool.try_insert(tx, state.as_ref(), validation, &crypto);
        }
        mempool.select_for_mining(state.as_ref(), validation, &crypto)
    };
    txs.extend(selected);

    Block {
        header: BlockHeader {
            length: height,
            prev_hash: state.tip_hash().unwrap_or(corechain_core::ZERO_HASH),
            target,
            time: corechain_core::now_ts(),
            nonce: 0,
            miner: cfg.miner_address,
        },
        txs,
    }
}

/// Runs until `stop` fires. While `engine.mining_enabled()` is false the
/// loop just idles — `start_miner`/`stop_miner` flip that flag.
pub async fn run(
    engine: EngineHandle,
    cfg: MinerConfig,
    validation: corechain_core::validate::ValidationConfig,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            return;
        }
        if !engine.mining_enabled() {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(cfg.idle_poll_ms)) => continue,
                _ = stop.changed() => return,
            }
        }

        let candidate = assemble_candidate(&engine, &cfg, &validation);
        let start_tip = engine.state.tip_hash().unwrap_or(corechain_core::ZERO_HASH);
        let mut nonce = 0u64;
        let mut found = None;
        while found.is_none() {
            if *stop.borrow() || !engine.mining_enabled() {
                break;
            }
            if engine.state.tip_hash().unwrap_or(corechain_core::ZERO_HASH) != start_tip {
                debug!("tip moved while mining, restarting candidate");
                break;
            }
            found = mine_pass(&candidate.header.target, nonce, cfg.yield_interval, |n| {
                candidate_hash(&candidate, n)
            });
            nonce = nonce.wrapping_add(cfg.yield_interval);
            if found.is_none() {
                // Cooperative yield point (spec.md §5).
                tokio::task::yield_now().await;
            }
        }

        if let Some(nonce) = found {
            let mut block = candidate;
            block.header.nonce = nonce;
            info!(height = block.header.length, nonce, "mined block");
            engine.submit_block(block, None);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
