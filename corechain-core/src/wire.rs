//! Protocol messages exchanged between peers (spec.md §6: "Wire format
//! between peers"). Carried as a JSON `{kind, payload}` envelope — see
//! `corechain-network` for the HTTP transport that ships these.

use serde::{Deserialize, Serialize};

use crate::types::{Block, BlockHash, Transaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TipInfo {
    pub length: u64,
    /// Fixed-point, 1e12 scale (see `corechain-consensus`).
    pub diff_length: i128,
    pub tip_hash: BlockHash,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum PeerMessage {
    Greet { node_id: String },
    Tip(TipInfo),
    GetBlocks { from: u64, to: u64 },
    Blocks { blocks: Vec<Block> },
    Tx { tx: Transaction },
}
