//! The derived account-state database (spec.md §4.3). `StateDb` is the only
//! thing in the workspace that turns a `Block` into persisted `Account`
//! changes; the chain engine in `corechain-node` is its only caller, and
//! every call happens inside a single `simulate()`/`commit()` transaction
//! (spec.md §4.3 step 5).

use corechain_consensus::{diff_length_delta, target_at as retarget_target_at, ConsensusConfig};
use corechain_core::codec::{block_hash, meets_target};
use corechain_core::validate::{fold_spends, AccountView, BlockContext, ValidationConfig};
use corechain_core::{
    Account, Address, Block, BlockHash, CryptoProvider, Target, Transaction,
    ValidationError, ZERO_HASH,
};
use thiserror::Error;

use crate::kv::{Store, Transaction as KvTxn};

const KEY_LENGTH: &[u8] = b"meta:length";
const KEY_DIFF_LENGTH: &[u8] = b"meta:diff_length";
const KEY_KNOWN_LENGTH: &[u8] = b"meta:known_length";
const KEY_NODE_ID: &[u8] = b"meta:node_id";
const KEY_PEER_LIST: &[u8] = b"meta:peer_list";
const PREFIX_BLOCK: &[u8] = b"block:";
const PREFIX_TARGET: &[u8] = b"target:";
const PREFIX_TIME: &[u8] = b"time:";
const PREFIX_ACCOUNT: &[u8] = b"account:";

/// Errors out of `apply_block`/`unapply_block`. Distinguishes the "drop"
/// branch of spec.md §7 (a bad block, not our fault) from "fatal" (our own
/// persisted state no longer satisfies the invariants — spec.md §7: "State
/// inconsistency ... fatal").
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("block rejected: {0}")]
    Invalid(#[from] ValidationError),
    #[error("fatal state inconsistency: {0}")]
    Fatal(String),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

fn height_key(prefix: &[u8], height: u64) -> Vec<u8> {
    let mut k = prefix.to_vec();
    k.extend_from_slice(&height.to_be_bytes());
    k
}

fn account_key(addr: &Address) -> Vec<u8> {
    let mut k = PREFIX_ACCOUNT.to_vec();
    k.extend_from_slice(addr);
    k
}

pub struct StateDb {
    store: Store,
    pub validation: ValidationConfig,
    pub consensus: ConsensusConfig,
}

/// Reads accounts straight out of a KV transaction, implementing the
/// validator's `AccountView` seam directly against persisted state.
struct TxnView<'a, 'b> {
    txn: &'a KvTxn<'b>,
}

impl<'a, 'b> AccountView for TxnView<'a, 'b> {
    fn get(&self, addr: &Address) -> Account {
        self.txn
            .get(&account_key(addr))
            .ok()
            .flatten()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }
}

impl StateDb {
    pub fn open(
        path: &std::path::Path,
        validation: ValidationConfig,
        consensus: ConsensusConfig,
    ) -> anyhow::Result<Self> {
        let store = Store::open(path)?;
        Ok(Self {
            store,
            validation,
            consensus,
        })
    }

    /// Height of the local tip, or `None` if the chain is still empty (no
    /// genesis block has been applied yet).
    pub fn length(&self) -> anyhow::Result<Option<u64>> {
        Ok(self
            .store
            .get(KEY_LENGTH)?
            .map(|b| u64::from_be_bytes(b.try_into().expect("8 bytes"))))
    }

    pub fn diff_length(&self) -> anyhow::Result<i128> {
        Ok(self
            .store
            .get(KEY_DIFF_LENGTH)?
            .map(|b| String::from_utf8_lossy(&b).parse().unwrap_or(0))
            .unwrap_or(0))
    }

    pub fn known_length(&self) -> anyhow::Result<u64> {
        Ok(self
            .store
            .get(KEY_KNOWN_LENGTH)?
            .map(|b| u64::from_be_bytes(b.try_into().expect("8 bytes")))
            .unwrap_or(0))
    }

    pub fn set_known_length(&self, v: u64) -> anyhow::Result<()> {
        self.store.put(KEY_KNOWN_LENGTH, &v.to_be_bytes())
    }

    pub fn node_id(&self) -> anyhow::Result<Option<String>> {
        Ok(self
            .store
            .get(KEY_NODE_ID)?
            .map(|b| String::from_utf8_lossy(&b).to_string()))
    }

    pub fn set_node_id(&self, id: &str) -> anyhow::Result<()> {
        self.store.put(KEY_NODE_ID, id.as_bytes())
    }

    pub fn peer_list(&self) -> anyhow::Result<Vec<String>> {
        Ok(self
            .store
            .get(KEY_PEER_LIST)?
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default())
    }

    pub fn set_peer_list(&self, peers: &[String]) -> anyhow::Result<()> {
        self.store.put(KEY_PEER_LIST, &serde_json::to_vec(peers)?)
    }

    pub fn get_account(&self, addr: &Address) -> anyhow::Result<Account> {
        Ok(self
            .store
            .get(&account_key(addr))?
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default())
    }

    pub fn block_at_height(&self, height: u64) -> anyhow::Result<Option<Block>> {
        Ok(self
            .store
            .get(&height_key(PREFIX_BLOCK, height))?
            .and_then(|b| serde_json::from_slice(&b).ok()))
    }

    pub fn time_at(&self, height: u64) -> anyhow::Result<Option<u64>> {
        Ok(self
            .store
            .get(&height_key(PREFIX_TIME, height))?
            .map(|b| u64::from_be_bytes(b.try_into().expect("8 bytes"))))
    }

    pub fn target_at_height(&self, height: u64) -> anyhow::Result<Option<Target>> {
        Ok(self
            .store
            .get(&height_key(PREFIX_TARGET, height))?
            .map(|b| b.try_into().expect("32 bytes")))
    }

    /// The canonical tip hash, or `ZERO_HASH` before genesis.
    pub fn tip_hash(&self) -> anyhow::Result<BlockHash> {
        match self.length()? {
            None => Ok(ZERO_HASH),
            Some(h) => Ok(self
                .block_at_height(h)?
                .map(|b| block_hash(&b))
                .unwrap_or(ZERO_HASH)),
        }
    }

    /// `targetAt(h)` (spec.md §4.5). Requires `times`/`targets` to already
    /// hold every height below `h`, i.e. the caller's local chain is at
    /// least at height `h-1`.
    pub fn target_at(&self, height: u64) -> anyhow::Result<Target> {
        if height == 0 || height <= self.consensus.retarget_window {
            return Ok(self.consensus.starting_target);
        }
        let prev_height = height - 1;
        let window_start = prev_height - self.consensus.retarget_window;
        let mut times = vec![0u64; prev_height as usize + 1];
        let mut targets = vec![self.consensus.starting_target; prev_height as usize + 1];
        times[prev_height as usize] = self
            .time_at(prev_height)?
            .ok_or_else(|| anyhow::anyhow!("missing time for height {prev_height}"))?;
        times[window_start as usize] = self
            .time_at(window_start)?
            .ok_or_else(|| anyhow::anyhow!("missing time for height {window_start}"))?;
        targets[prev_height as usize] = self
            .target_at_height(prev_height)?
            .ok_or_else(|| anyhow::anyhow!("missing target for height {prev_height}"))?;
        Ok(retarget_target_at(
            height,
            &times,
            &targets,
            self.consensus.starting_target,
            &self.consensus,
        ))
    }

    fn recent_times(&self, height: u64) -> anyhow::Result<Vec<u64>> {
        let window = self.validation.median_window as u64;
        let start = height.saturating_sub(window);
        let mut out = Vec::new();
        for h in start..height {
            if let Some(t) = self.time_at(h)? {
                out.push(t);
            }
        }
        Ok(out)
    }

    /// `applyBlock(b)` (spec.md §4.3). Re-validates every transaction
    /// against the evolving state buffer, then persists the block and every
    /// touched account inside a single KV transaction.
    pub fn apply_block(
        &self,
        block: &Block,
        crypto: &dyn CryptoProvider,
    ) -> Result<(), ApplyError> {
        let current_length = self.length()?;
        let expected_height = current_length.map(|h| h + 1).unwrap_or(0);
        let expected_prev_hash = self.tip_hash()?;
        let expected_target = self
            .target_at(expected_height)
            .map_err(|e| ApplyError::Fatal(e.to_string()))?;
        let recent_times = self
            .recent_times(expected_height)
            .map_err(|e| ApplyError::Fatal(e.to_string()))?;

        let ctx = BlockContext {
            expected_height,
            expected_prev_hash,
            expected_target,
            expected_reward: self.consensus.reward_at(expected_height),
            recent_times: &recent_times,
            wall_clock: corechain_core::now_ts(),
        };

        let spends: Vec<Transaction> = block.spends().cloned().collect();
        let mut txn = self.store.simulate()?;
        {
            let view = TxnView { txn: &txn };
            corechain_core::validate::block_acceptable(
                block,
                &ctx,
                &view,
                &self.validation,
                crypto,
            )?;
            let touched = fold_spends(&spends, &view, &self.validation, crypto)?;
            for (addr, mut account) in touched {
                for tx in &spends {
                    if corechain_core::tx_owner_address(tx) == addr || tx.to == Some(addr) {
                        account.record_tx_block(block.length());
                    }
                }
                txn.put(&account_key(&addr), &serde_json::to_vec(&account)?);
            }
        }

        // Reward credit (spec.md §4.3 step 3) happens after the spend fold
        // so a reward payout never shadows a same-block spend touching the
        // miner's own account.
        let reward = block.reward_tx().ok_or(ValidationError::BadReward)?;
        // `TxnView` resolves through the buffer first, so this already
        // reflects any spend touching the miner's own account above.
        let mut miner_account = TxnView { txn: &txn }.get(&block.header.miner);
        miner_account.amount = miner_account
            .amount
            .checked_add(reward.amount)
            .ok_or_else(|| ApplyError::Fatal("miner reward overflow".into()))?;
        miner_account.record_mined_block(block.length());
        txn.put(
            &account_key(&block.header.miner),
            &serde_json::to_vec(&miner_account)?,
        );

        txn.put(
            &height_key(PREFIX_BLOCK, block.length()),
            &serde_json::to_vec(block)?,
        );
        txn.put(
            &height_key(PREFIX_TARGET, block.length()),
            &block.header.target,
        );
        txn.put(
            &height_key(PREFIX_TIME, block.length()),
            &block.header.time.to_be_bytes(),
        );
        txn.put(KEY_LENGTH, &block.length().to_be_bytes());

        let prior_diff = self.diff_length()?;
        let new_diff = prior_diff + diff_length_delta(&block.header.target);
        txn.put(KEY_DIFF_LENGTH, new_diff.to_string().as_bytes());

        txn.commit()?;
        Ok(())
    }

    /// The exact inverse of `apply_block` (spec.md §4.3: "unapplyBlock(b) is
    /// the exact inverse and must restore byte-identical state"). Unapplies
    /// the current tip and returns the removed block.
    pub fn unapply_block(&self) -> Result<Block, ApplyError> {
        let height = self
            .length()?
            .ok_or_else(|| ApplyError::Fatal("cannot unapply: chain is empty".into()))?;
        let block = self
            .block_at_height(height)?
            .ok_or_else(|| ApplyError::Fatal(format!("missing block at height {height}")))?;

        let mut txn = self.store.simulate()?;
        let reward = block.reward_tx().ok_or(ValidationError::BadReward)?;
        {
            let view = TxnView { txn: &txn };
            let mut miner_account = view.get(&block.header.miner);
            miner_account.amount = miner_account
                .amount
                .checked_sub(reward.amount)
                .ok_or_else(|| ApplyError::Fatal("reward underflow on unapply".into()))?;
            if miner_account.mined_blocks.last().copied() == Some(height) {
                miner_account.mined_blocks.pop();
            }
            txn.put(
                &account_key(&block.header.miner),
                &serde_json::to_vec(&miner_account)?,
            );
        }

        // Undo spends in reverse order, re-crediting senders and debiting
        // receivers symmetrically to `apply_block`'s fold.
        for tx in block.spends().collect::<Vec<_>>().into_iter().rev() {
            // `fold_spends` debits the sender and counts the tx for every
            // non-reward kind, not just `Spend` (DESIGN.md Open Question 6);
            // unapply must mirror that for all of them to round-trip.
            let owner = corechain_core::tx_owner_address(tx);
            let view = TxnView { txn: &txn };
            let mut sender = view.get(&owner);
            sender.amount = sender
                .amount
                .checked_add(tx.amount)
                .ok_or_else(|| ApplyError::Fatal("sender credit overflow on unapply".into()))?;
            sender.count = sender.count.saturating_sub(1);
            if sender.tx_blocks.last().copied() == Some(height) {
                sender.tx_blocks.pop();
            }
            txn.put(&account_key(&owner), &serde_json::to_vec(&sender)?);

            if let Some(to) = tx.to {
                let mut receiver = view.get(&to);
                receiver.amount = receiver
                    .amount
                    .checked_sub(tx.amount)
                    .ok_or_else(|| ApplyError::Fatal("receiver debit underflow on unapply".into()))?;
                if receiver.tx_blocks.last().copied() == Some(height) {
                    receiver.tx_blocks.pop();
                }
                txn.put(&account_key(&to), &serde_json::to_vec(&receiver)?);
            }
        }

        txn.delete(&height_key(PREFIX_BLOCK, height));
        txn.delete(&height_key(PREFIX_TARGET, height));
        txn.delete(&height_key(PREFIX_TIME, height));

        let prior_diff = self.diff_length()?;
        let new_diff = prior_diff - diff_length_delta(&block.header.target);
        txn.put(KEY_DIFF_LENGTH, new_diff.to_string().as_bytes());

        if height == 0 {
            txn.delete(KEY_LENGTH);
        } else {
            txn.put(KEY_LENGTH, &(height - 1).to_be_bytes());
        }

        txn.commit()?;
        Ok(block)
    }
}

/// Lets the mempool and the miner's speculative selection read live
/// persisted state directly through the validator's `AccountView` seam,
/// without going through a `simulate()` transaction.
impl AccountView for StateDb {
    fn get(&self, addr: &Address) -> Account {
        self.get_account(addr).unwrap_or_default()
    }
}
