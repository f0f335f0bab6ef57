//! Difficulty retargeting and proof-of-work (spec.md §4.5): the target
//! algorithm, the cumulative-work metric used by fork choice, and the
//! cooperative nonce search shared by the miner and by block validation's
//! "does this hash meet its target" check (the latter lives in
//! `corechain-core::codec::meets_target`, which this crate's `target_at`
//! feeds).

pub mod config;
pub mod difficulty;
pub mod mining;
pub mod retarget;
pub mod target;

pub use config::ConsensusConfig;
pub use difficulty::{diff_length_delta, diff_length_of, SCALE};
pub use mining::mine_pass;
pub use retarget::target_at;
pub use target::{max_target, target_to_u128, u128_to_target, MAX_TARGET_U128};
