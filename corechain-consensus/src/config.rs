use corechain_core::Target;
use serde::{Deserialize, Serialize};

use crate::target::u128_to_target;

/// Parametric consensus constants (spec.md §9 Open Questions: reward
/// schedule and retarget window are configuration, not hard-coded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// `W` in spec.md §4.5.
    pub retarget_window: u64,
    /// Target seconds between blocks.
    pub target_block_time_secs: u64,
    pub base_reward: u64,
    pub halving_interval: u64,
    /// `targetAt(h)` for any `h` inside the first retarget window
    /// (spec.md §4.5: "If h < W, use the starting target").
    #[serde(default = "default_starting_target")]
    pub starting_target: Target,
}

fn default_starting_target() -> Target {
    // Difficulty-256 by default: easy enough for a laptop miner to find
    // blocks quickly while still exercising the retarget algorithm.
    u128_to_target(u128::MAX / 256)
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            retarget_window: 2016,
            target_block_time_secs: 30,
            base_reward: 50_0000,
            halving_interval: 210_000,
            starting_target: default_starting_target(),
        }
    }
}

impl ConsensusConfig {
    /// `reward(h)`: halves every `halving_interval` blocks, floors at zero
    /// once the shift would overflow.
    pub fn reward_at(&self, height: u64) -> u64 {
        let halvings = height / self.halving_interval.max(1);
        if halvings >= 64 {
            0
        } else {
            self.base_reward >> halvings
        }
    }
}
