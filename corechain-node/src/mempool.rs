//! The mempool (spec.md §3, §4.6): an ordered map from txid to transaction,
//! bounded in size, with per-sender ordering by `count`. Owned exclusively
//! by the chain engine; every other worker only ever sees a copying
//! snapshot (spec.md §5: "exposed via copying snapshots").

use std::collections::{BTreeMap, HashMap};

use corechain_core::validate::{check_tx, AccountView, ValidationConfig};
use corechain_core::{Address, CryptoProvider, Transaction, TxHash, TxKind};

/// A thin overlay used to re-validate a transaction against the account
/// state it would see if every lower-count pooled tx from the same sender
/// had already applied — mirrors `corechain_core::validate::fold_spends`
/// but threads through a single sender instead of a whole block.
struct SenderOverlay<'a> {
    base: &'a dyn AccountView,
    owner: Address,
    account: corechain_core::Account,
}

impl<'a> AccountView for SenderOverlay<'a> {
    fn get(&self, addr: &Address) -> corechain_core::Account {
        if *addr == self.owner {
            self.account.clone()
        } else {
            self.base.get(addr)
        }
    }
}

#[derive(Default)]
pub struct Mempool {
    capacity: usize,
    /// sender -> (count -> tx), so both validation order and mining
    /// selection can walk a sender's pending nonces in ascending order.
    per_sender: HashMap<Address, BTreeMap<u64, Transaction>>,
    by_txid: HashMap<TxHash, (Address, u64)>,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            per_sender: HashMap::new(),
            by_txid: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_txid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_txid.is_empty()
    }

    fn overlay_account(&self, owner: &Address, before_count: u64, base: &dyn AccountView) -> corechain_core::Account {
        let mut acct = base.get(owner);
        if let Some(pending) = self.per_sender.get(owner) {
            for (count, tx) in pending.range(..before_count) {
                acct.amount = acct.amount.saturating_sub(tx.amount);
                acct.count = count + 1;
            }
        }
        acct
    }

    /// Admits `tx` if it is admissible against `base` plus whatever this
    /// sender already has pooled ahead of it in `count` order (spec.md
    /// §4.6: "Mempool admission"). Evicts the pool's lowest-value tx if
    /// this insert pushes it over capacity.
    pub fn try_insert(
        &mut self,
        tx: Transaction,
        base: &dyn AccountView,
        cfg: &ValidationConfig,
        crypto: &dyn CryptoProvider,
    ) -> Result<(), corechain_core::ValidationError> {
        let owner = corechain_core::tx_owner_address(&tx);
        let overlay = SenderOverlay {
            base,
            owner,
            account: self.overlay_account(&owner, tx.count, base),
        };
        check_tx(&tx, &overlay, cfg, crypto)?;

        let txid = corechain_core::codec::txid(&tx);
        let count = tx.count;
        self.per_sender.entry(owner).or_default().insert(count, tx);
        self.by_txid.insert(txid, (owner, count));
        self.enforce_capacity();
        Ok(())
    }

    fn enforce_capacity(&mut self) {
        while self.len() > self.capacity {
            let worst = self
                .per_sender
                .iter()
                .flat_map(|(addr, pending)| pending.iter().map(move |(c, tx)| (*addr, *c, tx.amount)))
                .min_by_key(|(_, _, amount)| *amount);
            let Some((addr, count, _)) = worst else { break };
            if let Some(pending) = self.per_sender.get_mut(&addr) {
                if let Some(tx) = pending.remove(&count) {
                    self.by_txid.remove(&corechain_core::codec::txid(&tx));
                }
                if pending.is_empty() {
                    self.per_sender.remove(&addr);
                }
            }
        }
    }

    /// Drops every pooled tx whose `count` is now stale against `base`
    /// (spec.md §8 P7: "no tx in the mempool has a count less than
    /// account(sender).count"). Called after every block apply/unapply.
    pub fn prune_against(&mut self, base: &dyn AccountView) {
        let mut empty_senders = Vec::new();
        for (addr, pending) in self.per_sender.iter_mut() {
            let current = base.get(addr).count;
            let stale: Vec<u64> = pending.range(..current).map(|(c, _)| *c).collect();
            for c in stale {
                if let Some(tx) = pending.remove(&c) {
                    self.by_txid.remove(&corechain_core::codec::txid(&tx));
                }
            }
            if pending.is_empty() {
                empty_senders.push(*addr);
            }
        }
        for addr in empty_senders {
            self.per_sender.remove(&addr);
        }
    }

    /// Removes every tx that a just-applied block included, by (sender,
    /// count) identity rather than txid, since a re-signed duplicate with
    /// the same nonce should also be evicted.
    pub fn remove_applied(&mut self, block: &corechain_core::Block) {
        for tx in block.spends() {
            if tx.kind != TxKind::Spend {
                continue;
            }
            let owner = corechain_core::tx_owner_address(tx);
            if let Some(pending) = self.per_sender.get_mut(&owner) {
                if let Some(removed) = pending.remove(&tx.count) {
                    self.by_txid.remove(&corechain_core::codec::txid(&removed));
                }
                if pending.is_empty() {
                    self.per_sender.remove(&owner);
                }
            }
        }
    }

    /// A flattened, sender-then-count-ordered snapshot (spec.md §5: "exposed
    /// via copying snapshots"; §6: `GET /txs`).
    pub fn snapshot(&self) -> Vec<Transaction> {
        let mut out = Vec::new();
        for pending in self.per_sender.values() {
            out.extend(pending.values().cloned());
        }
        out
    }

    /// Picks admissible transactions for a mining candidate, walking each
    /// sender's pending nonces in order and stopping at the first gap or
    /// rejection (spec.md §4.8: "Selection is by admissibility in count
    /// order per sender").
    pub fn select_for_mining(
        &self,
        base: &dyn AccountView,
        cfg: &ValidationConfig,
        crypto: &dyn CryptoProvider,
    ) -> Vec<Transaction> {
        let mut out = Vec::new();
        for pending in self.per_sender.values() {
            let mut acct: Option<corechain_core::Account> = None;
            for (count, tx) in pending.iter() {
                let owner = corechain_core::tx_owner_address(tx);
                let current = acct.clone().unwrap_or_else(|| base.get(&owner));
                if current.count != *count {
                    break;
                }
                let overlay = SenderOverlay {
                    base,
                    owner,
                    account: current.clone(),
                };
                if check_tx(tx, &overlay, cfg, crypto).is_err() {
                    break;
                }
                out.push(tx.clone());
                let mut next = current;
                next.amount = next.amount.saturating_sub(tx.amount);
                next.count += 1;
                acct = Some(next);
            }
        }
        out
    }
}
