//! The chain engine (spec.md §4.6) — the single writer to the KV store and
//! the arbiter of fork choice. Runs a serial loop consuming one queue with
//! three message kinds: tip-extension/reorg block submissions and mempool
//! admission. Everything else (peer sync, the miner, RPC handlers) only
//! ever talks to it through `EngineHandle`.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use corechain_core::validate::ValidationConfig;
use corechain_core::{Account, Address, Block, CryptoProvider, History, Target, Transaction, TxRecord};
use corechain_network::{ChainSink, PeerBook, PeerSource};
use corechain_storage::StateDb;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::mempool::Mempool;

/// Messages the engine's single writer lane consumes, in the order spec.md
/// §4.6 names them.
pub enum EngineMessage {
    SubmitBlock(Block, Option<PeerSource>),
    SubmitBlocks(Vec<Block>, Option<PeerSource>),
    SubmitTx(Transaction),
    SetMining(bool),
    Shutdown,
}

/// The engine's owned state: persisted chain + account state, the mempool,
/// and everything needed to re-validate a block from scratch. Lives only
/// inside the task spawned by `EngineHandle::spawn`.
pub struct Engine {
    state: Arc<StateDb>,
    crypto: Arc<dyn CryptoProvider>,
    validation: ValidationConfig,
    mempool: Mempool,
    peer_book: Arc<PeerBook>,
    reorg_depth_cap: u64,
    mempool_snapshot: Arc<RwLock<Vec<Transaction>>>,
}

impl Engine {
    fn publish_mempool(&self) {
        *self.mempool_snapshot.write().unwrap() = self.mempool.snapshot();
    }

    /// Tip extension / reorg (spec.md §4.6). `blocks` must be contiguous
    /// and non-empty; `blocks[0].length()` is `b_k` in the spec's notation.
    fn handle_blocks(&mut self, blocks: Vec<Block>, source: Option<PeerSource>) {
        if blocks.is_empty() {
            return;
        }
        let k = blocks[0].length();
        let current_length = match self.state.length() {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "fatal: cannot read chain length");
                return;
            }
        };
        let expected_next = current_length.map(|l| l + 1).unwrap_or(0);
        if k > expected_next {
            self.reject(source, "block range does not connect to the local tip");
            return;
        }
        let fork = k.saturating_sub(1);
        if let Some(length) = current_length {
            if length.saturating_sub(fork) > self.reorg_depth_cap {
                self.reject(source, "reorg deeper than the depth cap");
                return;
            }
        }

        // The diff length of the chain as it stood before touching anything —
        // this, not the post-unwind figure, is what the candidate must beat
        // (spec.md §4.6 step 3 compares against the chain we currently hold).
        let old_diff_length = match self.state.diff_length() {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "fatal: cannot read diff length");
                return;
            }
        };

        // Unwind down to the fork point, stashing removed blocks so we can
        // restore the local chain byte-for-byte on failure or on a losing
        // comparison (spec.md §4.6 step 1-2).
        let mut stash = Vec::new();
        while matches!(self.state.length(), Ok(Some(h)) if h >= k) {
            match self.state.unapply_block() {
                Ok(removed) => stash.push(removed),
                Err(e) => {
                    error!(error = %e, "fatal: unapply failed while preparing reorg");
                    return;
                }
            }
        }

        let mut applied = Vec::new();
        let mut apply_error = None;
        for block in &blocks {
            match self.state.apply_block(block, self.crypto.as_ref()) {
                Ok(()) => applied.push(block.clone()),
                Err(e) => {
                    apply_error = Some(e);
                    break;
                }
            }
        }

        if let Some(err) = apply_error {
            warn!(error = %err, "rejecting block range");
            for _ in &applied {
                if let Err(e) = self.state.unapply_block() {
                    error!(error = %e, "fatal: failed to unwind a partially-applied range");
                    return;
                }
            }
            self.restore_stash(stash);
            self.reject(source, "block failed re-validation");
            return;
        }

        let new_diff_length = match self.state.diff_length() {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "fatal: cannot read diff length after apply");
                return;
            }
        };

        // Fork choice (spec.md §4.6 step 3, §8 P4): strictly greater wins;
        // ties (and losses) keep the locally-held chain.
        if new_diff_length > old_diff_length {
            if let Some(peer) = &source {
                self.peer_book.record_success(&peer.0);
            }
            for block in &blocks {
                self.mempool.remove_applied(block);
            }
            self.mempool.prune_against(self.state.as_ref());
            self.readmit_from_stash(&stash, &blocks);
            self.publish_mempool();
            info!(
                height = self.state.length().ok().flatten(),
                diff_length = new_diff_length,
                reorged = !stash.is_empty(),
                "chain tip updated"
            );
        } else {
            for _ in &applied {
                if let Err(e) = self.state.unapply_block() {
                    error!(error = %e, "fatal: failed to unwind a losing candidate chain");
                    return;
                }
            }
            self.restore_stash(stash);
        }
    }

    /// Re-applies `stash` (the previously-held suffix) in original height
    /// order — used both to restore the local chain after a failed/losing
    /// candidate and, implicitly, is never needed on a winning reorg.
    fn restore_stash(&mut self, stash: Vec<Block>) {
        for block in stash.into_iter().rev() {
            if let Err(e) = self.state.apply_block(&block, self.crypto.as_ref()) {
                error!(error = %e, "fatal: failed to restore the prior chain after a rejected candidate");
                return;
            }
        }
    }

    /// After a winning reorg, re-admits mempool-eligible txs from the
    /// unapplied branch that are not also present in the newly applied
    /// blocks (spec.md §4.6 step 4).
    fn readmit_from_stash(&mut self, stash: &[Block], applied: &[Block]) {
        if stash.is_empty() {
            return;
        }
        let applied_txids: std::collections::HashSet<[u8; 32]> = applied
            .iter()
            .flat_map(|b| b.spends())
            .map(corechain_core::codec::txid)
            .collect();
        for block in stash {
            for tx in block.spends() {
                let txid = corechain_core::codec::txid(tx);
                if applied_txids.contains(&txid) {
                    continue;
                }
                let _ = self
                    .mempool
                    .try_insert(tx.clone(), self.state.as_ref(), &self.validation, self.crypto.as_ref());
            }
        }
    }

    fn reject(&self, source: Option<PeerSource>, reason: &str) {
        warn!(reason, "rejected candidate block(s)");
        if let Some(peer) = source {
            self.peer_book.record_failure(&peer.0);
        }
    }

    fn handle_tx(&mut self, tx: Transaction) {
        match self
            .mempool
            .try_insert(tx, self.state.as_ref(), &self.validation, self.crypto.as_ref())
        {
            Ok(()) => self.publish_mempool(),
            Err(e) => warn!(error = %e, "dropped inadmissible tx"),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineMessage>, stop: watch::Sender<bool>, mining: Arc<AtomicBool>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                EngineMessage::SubmitBlock(b, source) => self.handle_blocks(vec![b], source),
                EngineMessage::SubmitBlocks(bs, source) => self.handle_blocks(bs, source),
                EngineMessage::SubmitTx(tx) => self.handle_tx(tx),
                EngineMessage::SetMining(on) => mining.store(on, AtomicOrdering::SeqCst),
                EngineMessage::Shutdown => break,
            }
        }
        // Drain whatever is already queued before exiting (spec.md §5:
        // "drains its queue, refuses new work, and exits").
        while let Ok(msg) = rx.try_recv() {
            match msg {
                EngineMessage::SubmitBlock(b, source) => self.handle_blocks(vec![b], source),
                EngineMessage::SubmitBlocks(bs, source) => self.handle_blocks(bs, source),
                EngineMessage::SubmitTx(tx) => self.handle_tx(tx),
                EngineMessage::SetMining(_) | EngineMessage::Shutdown => {}
            }
        }
        let _ = stop.send(true);
        info!("chain engine stopped");
    }
}

/// The handle every other worker holds. Reads go straight to `state`
/// (`StateDb`/`sled` are internally `Arc`-backed and safe to share); writes
/// are serialised through `tx` into the single engine task.
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) state: Arc<StateDb>,
    tx: mpsc::UnboundedSender<EngineMessage>,
    mempool_snapshot: Arc<RwLock<Vec<Transaction>>>,
    mining: Arc<AtomicBool>,
    pub(crate) peer_book: Arc<PeerBook>,
    node_id: String,
    range_cap: u64,
    sync_margin: u64,
    stop: watch::Receiver<bool>,
}

impl EngineHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        state: Arc<StateDb>,
        crypto: Arc<dyn CryptoProvider>,
        validation: ValidationConfig,
        peer_book: Arc<PeerBook>,
        mempool_capacity: usize,
        node_id: String,
        range_cap: u64,
        sync_margin: u64,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let mempool_snapshot = Arc::new(RwLock::new(Vec::new()));
        let mining = Arc::new(AtomicBool::new(false));

        let engine = Engine {
            state: state.clone(),
            crypto,
            validation,
            mempool: Mempool::new(mempool_capacity),
            peer_book: peer_book.clone(),
            reorg_depth_cap: range_cap.max(100),
            mempool_snapshot: mempool_snapshot.clone(),
        };
        tokio::spawn(engine.run(rx, stop_tx, mining.clone()));

        Self {
            state,
            tx,
            mempool_snapshot,
            mining,
            peer_book,
            node_id,
            range_cap,
            sync_margin,
            stop: stop_rx,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.clone()
    }

    pub fn length(&self) -> u64 {
        self.state.length().ok().flatten().map(|h| h + 1).unwrap_or(0)
    }

    pub fn known_length(&self) -> u64 {
        self.state.known_length().unwrap_or(0)
    }

    /// Sync-in-progress gate (spec.md §4.6/§7: "Sync-in-progress ...
    /// operations that need a consistent tip return an advisory response").
    pub fn is_syncing(&self) -> bool {
        self.known_length() > self.length() + self.sync_margin
    }

    pub fn balance(&self, addr: &Address) -> u64 {
        self.state.get_account(addr).map(|a| a.amount).unwrap_or_default()
    }

    pub fn account(&self, addr: &Address) -> Account {
        self.state.get_account(addr).unwrap_or_default()
    }

    pub fn history(&self, addr: &Address) -> History {
        let account = self.account(addr);
        let mut out = History {
            mine: account.mined_blocks.clone(),
            ..Default::default()
        };
        for height in &account.tx_blocks {
            let Ok(Some(block)) = self.state.block_at_height(*height) else {
                continue;
            };
            for tx in block.spends() {
                let owner = corechain_core::tx_owner_address(tx);
                let txid = corechain_core::codec::txid(tx);
                if owner == *addr {
                    out.send.push(TxRecord {
                        block: *height,
                        txid,
                        counterparty: tx.to,
                        amount: tx.amount,
                    });
                }
                if tx.to == Some(*addr) {
                    out.recv.push(TxRecord {
                        block: *height,
                        txid,
                        counterparty: Some(owner),
                        amount: tx.amount,
                    });
                }
            }
        }
        out
    }

    pub fn difficulty(&self) -> Target {
        let height = self.length();
        self.state.target_at(height).unwrap_or_else(|_| corechain_consensus::max_target())
    }

    pub fn diff_length(&self) -> i128 {
        self.state.diff_length().unwrap_or(0)
    }

    pub fn mempool_snapshot(&self) -> Vec<Transaction> {
        self.mempool_snapshot.read().unwrap().clone()
    }

    pub fn peers(&self) -> Vec<String> {
        self.state.peer_list().unwrap_or_default()
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        self.state.block_at_height(height).ok().flatten()
    }

    pub fn submit_tx(&self, tx: Transaction) {
        let _ = self.tx.send(EngineMessage::SubmitTx(tx));
    }

    pub fn submit_block(&self, block: Block, source: Option<PeerSource>) {
        let _ = self.tx.send(EngineMessage::SubmitBlock(block, source));
    }

    pub fn submit_blocks(&self, blocks: Vec<Block>, source: Option<PeerSource>) {
        let _ = self.tx.send(EngineMessage::SubmitBlocks(blocks, source));
    }

    pub fn set_mining(&self, on: bool) {
        let _ = self.tx.send(EngineMessage::SetMining(on));
    }

    pub fn mining_enabled(&self) -> bool {
        self.mining.load(AtomicOrdering::SeqCst)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(EngineMessage::Shutdown);
    }
}

/// Lets `corechain-rpc` depend only on the trait, never on this crate
/// (avoids a `corechain-node` <-> `corechain-rpc` cycle, since this crate
/// depends on `corechain-rpc::start_server` to run the HTTP surface).
impl corechain_rpc::EngineApi for EngineHandle {
    fn node_id(&self) -> &str {
        EngineHandle::node_id(self)
    }
    fn length(&self) -> u64 {
        EngineHandle::length(self)
    }
    fn known_length(&self) -> u64 {
        EngineHandle::known_length(self)
    }
    fn is_syncing(&self) -> bool {
        EngineHandle::is_syncing(self)
    }
    fn balance(&self, addr: &Address) -> u64 {
        EngineHandle::balance(self, addr)
    }
    fn account(&self, addr: &Address) -> Account {
        EngineHandle::account(self, addr)
    }
    fn history(&self, addr: &Address) -> History {
        EngineHandle::history(self, addr)
    }
    fn difficulty(&self) -> Target {
        EngineHandle::difficulty(self)
    }
    fn diff_length(&self) -> i128 {
        EngineHandle::diff_length(self)
    }
    fn mempool_snapshot(&self) -> Vec<Transaction> {
        EngineHandle::mempool_snapshot(self)
    }
    fn peers(&self) -> Vec<String> {
        EngineHandle::peers(self)
    }
    fn block_at(&self, height: u64) -> Option<Block> {
        EngineHandle::block_at(self, height)
    }
    fn set_mining(&self, on: bool) {
        EngineHandle::set_mining(self, on)
    }
    fn mining_enabled(&self) -> bool {
        EngineHandle::mining_enabled(self)
    }
    fn shutdown(&self) {
        EngineHandle::shutdown(self)
    }
}

impl ChainSink for EngineHandle {
    fn local_tip(&self) -> corechain_core::wire::TipInfo {
        corechain_core::wire::TipInfo {
            length: self.length(),
            diff_length: self.diff_length(),
            tip_hash: self.state.tip_hash().unwrap_or(corechain_core::ZERO_HASH),
            node_id: self.node_id.clone(),
        }
    }

    fn submit_blocks(&self, blocks: Vec<Block>, source: PeerSource) {
        EngineHandle::submit_blocks(self, blocks, Some(source))
    }

    fn submit_tx(&self, tx: Transaction) {
        EngineHandle::submit_tx(self, tx)
    }

    fn blocks_range(&self, from: u64, to: u64) -> Vec<Block> {
        let to = to.min(from + self.range_cap);
        (from..=to)
            .filter_map(|h| self.state.block_at_height(h).ok().flatten())
            .collect()
    }

    fn report_known_length(&self, length: u64) {
        if length > self.known_length() {
            let _ = self.state.set_known_length(length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corechain_core::{BlockHeader, TxKind};
    use corechain_network::PeerConfig;

    struct AlwaysValidCrypto;
    impl CryptoProvider for AlwaysValidCrypto {
        fn sign(&self, _sk: &[u8], msg: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(msg.to_vec())
        }
        fn verify(&self, _pk: &[u8], _msg: &[u8], _sig: &[u8]) -> bool {
            true
        }
    }

    fn tmp_state() -> Arc<StateDb> {
        let dir = std::env::temp_dir().join(format!(
            "corechain-engine-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let mut consensus = corechain_consensus::ConsensusConfig::default();
        consensus.retarget_window = 10_000;
        consensus.base_reward = 100;
        consensus.halving_interval = u64::MAX;
        Arc::new(StateDb::open(&dir, ValidationConfig::default(), consensus).unwrap())
    }

    fn mine(mut block: Block) -> Block {
        for nonce in 0..2_000_000u64 {
            block.header.nonce = nonce;
            if corechain_core::codec::meets_target(&block) {
                return block;
            }
        }
        panic!("failed to mine within bound");
    }

    fn reward(amount: u64) -> Transaction {
        Transaction {
            kind: TxKind::Reward,
            count: 0,
            pubkeys: vec![],
            signatures: vec![],
            amount,
            to: None,
            message: vec![],
        }
    }

    fn genesis(miner: Address, target: Target) -> Block {
        mine(Block {
            header: BlockHeader {
                length: 0,
                prev_hash: corechain_core::ZERO_HASH,
                target,
                time: 1_000,
                nonce: 0,
                miner,
            },
            txs: vec![reward(100)],
        })
    }

    fn handle() -> (EngineHandle, Arc<dyn CryptoProvider>) {
        let state = tmp_state();
        let crypto: Arc<dyn CryptoProvider> = Arc::new(AlwaysValidCrypto);
        let peer_book = PeerBook::new(PeerConfig {
            peers: vec![],
            poll_interval_ms: 1000,
            peer_jitter_ms: 500,
            reorg_depth_cap: 100,
            range_cap: 50,
            backoff_initial_secs: 10,
            backoff_cap_secs: 600,
            request_timeout_ms: 1000,
        });
        let h = EngineHandle::spawn(
            state,
            crypto.clone(),
            ValidationConfig::default(),
            peer_book,
            100,
            "test-node".into(),
            50,
            5,
        );
        (h, crypto)
    }

    #[tokio::test]
    async fn genesis_block_extends_tip() {
        let (h, _crypto) = handle();
        let target = h.difficulty();
        let block = genesis([1u8; 32], target);
        h.submit_block(block, None);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.length(), 1);
        assert_eq!(h.balance(&[1u8; 32]), 100);
    }

    #[tokio::test]
    async fn tx_is_admitted_into_mempool() {
        let (h, _crypto) = handle();
        let target = h.difficulty();
        let miner = [3u8; 32];
        h.submit_block(genesis(miner, target), None);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let tx = Transaction {
            kind: TxKind::Spend,
            count: 0,
            pubkeys: vec![vec![9]],
            signatures: vec![vec![9]],
            amount: 5,
            to: Some([4u8; 32]),
            message: vec![],
        };
        // fund the sender first by submitting a second block paying it a reward.
        let sender_owner = corechain_core::tx_owner_address(&tx);
        let target2 = h.difficulty();
        let block2 = mine(Block {
            header: BlockHeader {
                length: 1,
                prev_hash: h.state.tip_hash().unwrap(),
                target: target2,
                time: 2_000,
                nonce: 0,
                miner: sender_owner,
            },
            txs: vec![reward(100)],
        });
        h.submit_block(block2, None);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        h.submit_tx(tx);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(h.mempool_snapshot().len(), 1);
    }
}
