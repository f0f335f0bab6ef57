//! Pure predicates over the data model (spec.md §4.4). No storage, no
//! network — everything here takes a snapshot view of account state and
//! returns a structured reason on failure, consumed by the chain engine,
//! the mempool, and the miner's own speculative checks alike.

use std::collections::HashMap;

use crate::codec::{self, meets_target};
use crate::crypto_provider::CryptoProvider;
use crate::error::ValidationError;
use crate::types::{Account, Address, Block, BlockHash, Target, Transaction, TxKind};

/// A read-only snapshot of account state, as seen by the validator.
/// Implemented by `corechain-storage::StateDb` in production and by a
/// plain `HashMap` in tests / the mempool.
pub trait AccountView {
    fn get(&self, addr: &Address) -> Account;
}

impl AccountView for HashMap<Address, Account> {
    fn get(&self, addr: &Address) -> Account {
        self.get(addr).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidationConfig {
    /// Cap on `Transaction::message` length in bytes.
    pub message_cap: usize,
    /// How far into the future (vs wall clock) a block's `time` may be.
    pub clock_skew_secs: u64,
    /// Window size for the median-time-past rule.
    pub median_window: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            message_cap: 256,
            clock_skew_secs: 60,
            median_window: 11,
        }
    }
}

/// Median of up to the last `median_window` block times. `times` should be
/// supplied oldest-first or newest-first — order doesn't matter for a
/// median, only membership.
pub fn median_time_past(times: &[u64]) -> u64 {
    if times.is_empty() {
        return 0;
    }
    let mut sorted = times.to_vec();
    sorted.sort_unstable();
    sorted[sorted.len() / 2]
}

fn verify_tx_signatures(tx: &Transaction, crypto: &dyn CryptoProvider) -> Result<(), ValidationError> {
    if tx.pubkeys.len() != tx.signatures.len() {
        return Err(ValidationError::SignatureCountMismatch);
    }
    let digest = codec::det_hash(&codec::encode_tx(tx, false));
    for (pk, sig) in tx.pubkeys.iter().zip(tx.signatures.iter()) {
        if !crypto.verify(pk, &digest, sig) {
            return Err(ValidationError::BadSignature);
        }
    }
    Ok(())
}

/// Structural checks independent of account state: well-formed recipient,
/// message length, non-negative-by-type amount (amounts are `u64`, so this
/// only rules out the missing-recipient case for `Spend`).
fn check_tx_shape(tx: &Transaction, cfg: &ValidationConfig) -> Result<(), ValidationError> {
    if tx.message.len() > cfg.message_cap {
        return Err(ValidationError::MessageTooLong);
    }
    if tx.kind.requires_recipient() && tx.to.is_none() {
        return Err(ValidationError::BadRecipient);
    }
    if !tx.kind.requires_recipient() && tx.to.is_some() {
        return Err(ValidationError::BadRecipient);
    }
    Ok(())
}

/// `admissible(t)` from spec.md §4.4: signatures verify, owner has balance
/// and the expected nonce. Returns the owner address on success so callers
/// don't have to re-derive it.
pub fn check_tx(
    tx: &Transaction,
    view: &dyn AccountView,
    cfg: &ValidationConfig,
    crypto: &dyn CryptoProvider,
) -> Result<Address, ValidationError> {
    check_tx_shape(tx, cfg)?;
    verify_tx_signatures(tx, crypto)?;
    let owner = codec::tx_owner_address(tx);
    let account = view.get(&owner);
    if account.count != tx.count {
        return Err(ValidationError::BadNonce {
            expected: account.count,
            got: tx.count,
        });
    }
    if account.amount < tx.amount {
        return Err(ValidationError::InsufficientBalance {
            have: account.amount,
            need: tx.amount,
        });
    }
    Ok(owner)
}

/// Folds a sequence of (non-reward) transactions against a base view,
/// threading balance/nonce effects from one to the next so that two spends
/// from the same sender within the same block validate in order — mirrors
/// the evolving-state re-validation `StateDb::apply_block` performs.
/// Returns the set of touched accounts in their post-fold state.
///
/// Every non-reward `TxKind` debits its sender the same way; `Mint`/`Auth`/
/// `Job` carry no `to` (see `TxKind::requires_recipient`), so a nonzero
/// `amount` on one of them is debited with nowhere to land — an effective
/// burn, not a transfer. Nothing in spec.md distinguishes their balance
/// effect from `Spend`'s, so this folds them identically rather than
/// special-casing kinds the validator otherwise treats as opaque.
pub fn fold_spends(
    txs: &[Transaction],
    base: &dyn AccountView,
    cfg: &ValidationConfig,
    crypto: &dyn CryptoProvider,
) -> Result<HashMap<Address, Account>, ValidationError> {
    struct Overlay<'a> {
        base: &'a dyn AccountView,
        touched: HashMap<Address, Account>,
    }
    impl<'a> AccountView for Overlay<'a> {
        fn get(&self, addr: &Address) -> Account {
            self.touched
                .get(addr)
                .cloned()
                .unwrap_or_else(|| self.base.get(addr))
        }
    }

    let mut overlay = Overlay {
        base,
        touched: HashMap::new(),
    };
    for tx in txs {
        let sender = check_tx(tx, &overlay, cfg, crypto)?;
        let mut sender_acct = overlay.get(&sender);
        sender_acct.amount -= tx.amount;
        sender_acct.count += 1;
        overlay.touched.insert(sender, sender_acct);

        if let Some(to) = tx.to {
            let mut recv_acct = overlay.get(&to);
            recv_acct.amount = recv_acct
                .amount
                .checked_add(tx.amount)
                .ok_or_else(|| ValidationError::Malformed("balance overflow".into()))?;
            overlay.touched.insert(to, recv_acct);
        }
    }
    Ok(overlay.touched)
}

/// Everything a block validity check needs that only the caller (chain
/// engine / storage) knows, because it depends on chain history and
/// configuration the validator itself is deliberately kept ignorant of.
pub struct BlockContext<'a> {
    pub expected_height: u64,
    pub expected_prev_hash: BlockHash,
    pub expected_target: Target,
    pub expected_reward: u64,
    pub recent_times: &'a [u64],
    pub wall_clock: u64,
}

/// `acceptable(b, h)` from spec.md §4.4.
pub fn block_acceptable(
    block: &Block,
    ctx: &BlockContext,
    view: &dyn AccountView,
    cfg: &ValidationConfig,
    crypto: &dyn CryptoProvider,
) -> Result<(), ValidationError> {
    if block.header.length != ctx.expected_height {
        return Err(ValidationError::BadHeight {
            expected: ctx.expected_height,
            got: block.header.length,
        });
    }
    if ctx.expected_height > 0 && block.header.prev_hash != ctx.expected_prev_hash {
        return Err(ValidationError::BadPrevHash);
    }
    if ctx.expected_height > 0 {
        let median = median_time_past(ctx.recent_times);
        if block.header.time <= median {
            return Err(ValidationError::BadTimeTooEarly {
                window: cfg.median_window,
            });
        }
    }
    if block.header.time > ctx.wall_clock + cfg.clock_skew_secs {
        return Err(ValidationError::BadTimeTooLate);
    }
    if block.header.target != ctx.expected_target {
        return Err(ValidationError::BadTarget);
    }

    let reward = block.reward_tx().ok_or(ValidationError::BadReward)?;
    if reward.kind != TxKind::Reward || !reward.pubkeys.is_empty() || !reward.signatures.is_empty() {
        return Err(ValidationError::BadReward);
    }
    if reward.amount != ctx.expected_reward {
        return Err(ValidationError::BadRewardAmount {
            expected: ctx.expected_reward,
            got: reward.amount,
        });
    }

    let spends: Vec<Transaction> = block.spends().cloned().collect();
    fold_spends(&spends, view, cfg, crypto)?;

    if !meets_target(block) {
        return Err(ValidationError::PowNotMet);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{det_hash, encode_tx, tx_owner_address};

    struct AlwaysValidCrypto;
    impl CryptoProvider for AlwaysValidCrypto {
        fn sign(&self, _sk: &[u8], msg: &[u8]) -> anyhow::Result<Vec<u8>> {
            Ok(msg.to_vec())
        }
        fn verify(&self, _pk: &[u8], _msg: &[u8], _sig: &[u8]) -> bool {
            true
        }
    }

    fn spend(count: u64, amount: u64, to: Address) -> Transaction {
        Transaction {
            kind: TxKind::Spend,
            count,
            pubkeys: vec![vec![1, 2, 3]],
            signatures: vec![vec![0]],
            amount,
            to: Some(to),
            message: vec![],
        }
    }

    #[test]
    fn rejects_wrong_nonce() {
        let tx = spend(5, 10, [2u8; 32]);
        let view: HashMap<Address, Account> = HashMap::new();
        let cfg = ValidationConfig::default();
        let crypto = AlwaysValidCrypto;
        let err = check_tx(&tx, &view, &cfg, &crypto).unwrap_err();
        assert!(matches!(err, ValidationError::BadNonce { .. }));
    }

    #[test]
    fn accepts_well_formed_spend() {
        let tx = spend(0, 10, [2u8; 32]);
        let owner = tx_owner_address(&tx);
        let mut view = HashMap::new();
        view.insert(
            owner,
            Account {
                amount: 100,
                count: 0,
                ..Default::default()
            },
        );
        let cfg = ValidationConfig::default();
        let crypto = AlwaysValidCrypto;
        assert_eq!(check_tx(&tx, &view, &cfg, &crypto).unwrap(), owner);
    }

    #[test]
    fn fold_spends_chains_same_sender_nonces() {
        let tx1 = spend(0, 10, [2u8; 32]);
        let owner = tx_owner_address(&tx1);
        let tx2 = spend(1, 5, [3u8; 32]);
        let mut view = HashMap::new();
        view.insert(
            owner,
            Account {
                amount: 100,
                count: 0,
                ..Default::default()
            },
        );
        let cfg = ValidationConfig::default();
        let crypto = AlwaysValidCrypto;
        let touched = fold_spends(&[tx1, tx2], &view, &cfg, &crypto).unwrap();
        assert_eq!(touched.get(&owner).unwrap().amount, 85);
        assert_eq!(touched.get(&owner).unwrap().count, 2);
    }

    #[test]
    fn txid_hash_matches_manual_encoding() {
        let tx = spend(0, 1, [9u8; 32]);
        let expected = det_hash(&encode_tx(&tx, false));
        assert_eq!(codec::txid(&tx), expected);
    }
}
