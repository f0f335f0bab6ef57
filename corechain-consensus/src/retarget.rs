use corechain_core::Target;

use crate::config::ConsensusConfig;
use crate::target::{target_to_u128, u128_to_target};

/// `targetAt(h)` — spec.md §4.5. `times` and `targets` must already hold
/// entries for every height `0..h` (i.e. the caller's local chain is at
/// least at height `h-1`). `starting_target` is used verbatim for any
/// height inside the first retarget window.
pub fn target_at(
    height: u64,
    times: &[u64],
    targets: &[Target],
    starting_target: Target,
    cfg: &ConsensusConfig,
) -> Target {
    // `h-1-W` only exists once `h > W`; at `h == W` the window-ago block
    // would be genesis's predecessor, which doesn't exist, so the starting
    // target still applies through the whole first window inclusive.
    if height == 0 || height <= cfg.retarget_window {
        return starting_target;
    }
    let w = cfg.retarget_window;
    let prev_height = height - 1;
    let window_start = prev_height - w;
    let span = times[prev_height as usize].saturating_sub(times[window_start as usize]);
    let prev_target = target_to_u128(&targets[prev_height as usize]);
    let expected_span = w * cfg.target_block_time_secs;

    // newTarget = clamp(prevTarget * span / (W * blockTime), prevTarget/4, prevTarget*4)
    let scaled = (prev_target as u128).saturating_mul(span.max(1) as u128)
        / (expected_span.max(1) as u128);
    let lower = prev_target / 4;
    let upper = prev_target.saturating_mul(4).min(u128::MAX);
    let clamped = scaled.clamp(lower, upper);
    u128_to_target(clamped)
}
