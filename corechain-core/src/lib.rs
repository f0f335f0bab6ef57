pub mod codec;
pub mod crypto_provider;
pub mod error;
pub mod history;
pub mod types;
pub mod validate;
pub mod wire;

pub use codec::{block_hash, det_hash, make_address, meets_target, txid, tx_owner_address};
pub use crypto_provider::CryptoProvider;
pub use error::ValidationError;
pub use history::{History, TxRecord};
pub use types::{
    Account, Address, Block, BlockHash, BlockHeader, Target, Transaction, TxHash, TxKind,
    ZERO_HASH,
};
pub use validate::{AccountView, BlockContext, ValidationConfig};

/// Current unix timestamp in seconds.
pub fn now_ts() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
