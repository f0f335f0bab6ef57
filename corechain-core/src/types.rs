use serde::{Deserialize, Serialize};

/// Address is the hash of a pubkey set tagged with a multisig threshold.
pub type Address = [u8; 32];
pub type TxHash = [u8; 32];
pub type BlockHash = [u8; 32];
/// A big-endian 256-bit difficulty target / block hash, compared as an
/// unsigned integer.
pub type Target = [u8; 32];

pub const ZERO_HASH: BlockHash = [0u8; 32];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Spend,
    Mint,
    Auth,
    Job,
    Reward,
}

impl TxKind {
    pub fn tag(self) -> u8 {
        match self {
            TxKind::Spend => 0,
            TxKind::Mint => 1,
            TxKind::Auth => 2,
            TxKind::Job => 3,
            TxKind::Reward => 4,
        }
    }

    /// Only `Spend` moves value between two distinct accounts; every other
    /// kind is a structural/record-keeping transaction with no `to`.
    pub fn requires_recipient(self) -> bool {
        matches!(self, TxKind::Spend)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TxKind,
    /// Monotone per-sender nonce. Ignored (but still present) for `Reward`.
    pub count: u64,
    pub pubkeys: Vec<Vec<u8>>,
    /// Parallel to `pubkeys`. Empty for the implicit reward transaction.
    pub signatures: Vec<Vec<u8>>,
    pub amount: u64,
    pub to: Option<Address>,
    pub message: Vec<u8>,
}

impl Transaction {
    /// The multisig threshold is implicit: every listed pubkey must sign.
    pub fn threshold(&self) -> u8 {
        self.pubkeys.len().min(u8::MAX as usize) as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub length: u64,
    pub prev_hash: BlockHash,
    pub target: Target,
    pub time: u64,
    pub nonce: u64,
    pub miner: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// First entry is always the synthetic reward transaction.
    pub txs: Vec<Transaction>,
}

impl Block {
    pub fn length(&self) -> u64 {
        self.header.length
    }

    pub fn reward_tx(&self) -> Option<&Transaction> {
        self.txs.first()
    }

    pub fn spends(&self) -> impl Iterator<Item = &Transaction> {
        self.txs.iter().skip(1)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub amount: u64,
    pub count: u64,
    pub tx_blocks: Vec<u64>,
    pub mined_blocks: Vec<u64>,
    /// Opaque to the validator; carried for application-specific extensions
    /// (e.g. a job assignment) without widening the core validation surface.
    pub assigned_job: Option<String>,
}

impl Account {
    pub fn record_tx_block(&mut self, height: u64) {
        if self.tx_blocks.last().copied() != Some(height) {
            self.tx_blocks.push(height);
        }
    }

    pub fn record_mined_block(&mut self, height: u64) {
        self.mined_blocks.push(height);
    }
}
