//! Send/receive/mine history decoration (spec.md §6: `GET /history` returns
//! `{send, recv, mine}` of transactions decorated with `block`). Lives in
//! `corechain-core` rather than `corechain-node` so both the chain engine
//! and `corechain-rpc`'s `EngineApi` seam can share one definition without
//! `corechain-rpc` depending on `corechain-node`.

use serde::Serialize;

use crate::types::Address;

#[derive(Debug, Clone, Serialize)]
pub struct TxRecord {
    pub block: u64,
    pub txid: [u8; 32],
    pub counterparty: Option<Address>,
    pub amount: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct History {
    pub send: Vec<TxRecord>,
    pub recv: Vec<TxRecord>,
    pub mine: Vec<u64>,
}
