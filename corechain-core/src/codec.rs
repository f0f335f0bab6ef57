//! Deterministic, total encoding of the data model, used only for hashing.
//!
//! Storage and the HTTP/peer wire format go through `serde_json` instead —
//! JSON's field order and number width aren't guaranteed across encoders, so
//! it must never feed `det_hash`.

use crate::types::{Account, Block, BlockHeader, Transaction, TxKind};

const DOMAIN: &[u8] = b"corechain.v1";

/// `detHash(bytes)`: a domain-separated BLAKE3 digest.
pub fn det_hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(DOMAIN);
    hasher.update(bytes);
    hasher.finalize().into()
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn put_fixed32(out: &mut Vec<u8>, bytes: &[u8; 32]) {
    out.extend_from_slice(bytes);
}

fn put_vec_of_bytes(out: &mut Vec<u8>, items: &[Vec<u8>]) {
    out.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        put_bytes(out, item);
    }
}

fn put_option_fixed32(out: &mut Vec<u8>, v: Option<&[u8; 32]>) {
    match v {
        Some(bytes) => {
            put_u8(out, 1);
            put_fixed32(out, bytes);
        }
        None => put_u8(out, 0),
    }
}

/// `canonEncode` for a pubkey set tagged with a multisig threshold, as used
/// by `makeAddress`. Keys are sorted so that key order never changes the
/// derived address.
pub fn encode_pubkey_set(pubkeys: &[Vec<u8>], threshold: u8) -> Vec<u8> {
    let mut sorted: Vec<&Vec<u8>> = pubkeys.iter().collect();
    sorted.sort();
    let mut out = Vec::new();
    put_u8(&mut out, threshold);
    out.extend_from_slice(&(sorted.len() as u32).to_be_bytes());
    for pk in sorted {
        put_bytes(&mut out, pk);
    }
    out
}

/// `makeAddress(pubkeys, threshold)`.
pub fn make_address(pubkeys: &[Vec<u8>], threshold: u8) -> [u8; 32] {
    det_hash(&encode_pubkey_set(pubkeys, threshold))
}

/// `canonEncode(tx)`. `include_signatures = false` is the txid encoding
/// (spec.md §3: "the deterministic hash of the transaction with the
/// signatures field removed").
pub fn encode_tx(tx: &Transaction, include_signatures: bool) -> Vec<u8> {
    let mut out = Vec::new();
    put_u8(&mut out, tx.kind.tag());
    put_u64(&mut out, tx.count);
    put_vec_of_bytes(&mut out, &tx.pubkeys);
    if include_signatures {
        put_vec_of_bytes(&mut out, &tx.signatures);
    } else {
        put_u8(&mut out, 0xFF); // explicit "signatures elided" marker
    }
    put_u64(&mut out, tx.amount);
    put_option_fixed32(&mut out, tx.to.as_ref());
    put_bytes(&mut out, &tx.message);
    out
}

/// The owner address a transaction is signed/spent from.
pub fn tx_owner_address(tx: &Transaction) -> [u8; 32] {
    make_address(&tx.pubkeys, tx.threshold())
}

/// `txid`: hash of the transaction with signatures removed.
pub fn txid(tx: &Transaction) -> [u8; 32] {
    det_hash(&encode_tx(tx, false))
}

fn encode_header(header: &BlockHeader) -> Vec<u8> {
    let mut out = Vec::new();
    put_u64(&mut out, header.length);
    put_fixed32(&mut out, &header.prev_hash);
    put_fixed32(&mut out, &header.target);
    put_u64(&mut out, header.time);
    put_u64(&mut out, header.nonce);
    put_fixed32(&mut out, &header.miner);
    out
}

/// `canonEncode(block)`, over every field including each tx's signatures.
pub fn encode_block(block: &Block) -> Vec<u8> {
    let mut out = encode_header(&block.header);
    out.extend_from_slice(&(block.txs.len() as u32).to_be_bytes());
    for tx in &block.txs {
        put_bytes(&mut out, &encode_tx(tx, true));
    }
    out
}

/// `blockhash`: hash over all block fields.
pub fn block_hash(block: &Block) -> [u8; 32] {
    det_hash(&encode_block(block))
}

/// Interpret a 32-byte hash/target as a big-endian unsigned integer for the
/// purpose of comparisons (`intHash(b) < b.target`). Comparing the raw byte
/// arrays lexicographically is equivalent to comparing the big-endian
/// integers they encode.
pub fn int_cmp(a: &[u8; 32], b: &[u8; 32]) -> std::cmp::Ordering {
    a.cmp(b)
}

/// A block is valid iff its hash, as a big-endian integer, is strictly less
/// than its target.
pub fn meets_target(block: &Block) -> bool {
    int_cmp(&block_hash(block), &block.header.target) == std::cmp::Ordering::Less
}

/// Canonical encoding of an `Account`, used by storage to detect
/// accidental divergence between forward-apply and backward-unapply state
/// (property P2). Not used for hashing/addressing.
pub fn encode_account(account: &Account) -> Vec<u8> {
    let mut out = Vec::new();
    put_u64(&mut out, account.amount);
    put_u64(&mut out, account.count);
    out.extend_from_slice(&(account.tx_blocks.len() as u32).to_be_bytes());
    for h in &account.tx_blocks {
        put_u64(&mut out, *h);
    }
    out.extend_from_slice(&(account.mined_blocks.len() as u32).to_be_bytes());
    for h in &account.mined_blocks {
        put_u64(&mut out, *h);
    }
    match &account.assigned_job {
        Some(job) => {
            put_u8(&mut out, 1);
            put_bytes(&mut out, job.as_bytes());
        }
        None => put_u8(&mut out, 0),
    }
    out
}
