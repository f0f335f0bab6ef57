//! Nonce search (spec.md §4.5, §4.8). Deliberately synchronous and free of
//! any async runtime dependency: `mine_pass` burns a bounded number of
//! attempts and returns control to the caller, which is how `corechain-node`
//! turns this into a cooperative loop that yields to the stop flag and
//! re-checks the tip between passes (spec.md §5: "bounded per-iteration
//! budget and an explicit tip-change check").

use corechain_core::codec::int_cmp;
use corechain_core::Target;

/// Try `attempts` consecutive nonces starting at `start_nonce`, hashing each
/// candidate via `hash_for_nonce`. Returns the first nonce whose hash is
/// strictly below `target`, or `None` if the whole pass came up empty.
pub fn mine_pass(
    target: &Target,
    start_nonce: u64,
    attempts: u64,
    hash_for_nonce: impl Fn(u64) -> [u8; 32],
) -> Option<u64> {
    let mut nonce = start_nonce;
    for _ in 0..attempts {
        let hash = hash_for_nonce(nonce);
        if int_cmp(&hash, target) == std::cmp::Ordering::Less {
            return Some(nonce);
        }
        nonce = nonce.wrapping_add(1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::u128_to_target;

    #[test]
    fn finds_nonce_under_a_lax_target() {
        // A target of roughly MAX/2 clears the top bit of the first byte;
        // every other byte of the target is maxed out, so the comparison
        // comes down to that one byte. A hash whose first byte counts down
        // from 0xff as the nonce grows crosses below it quickly.
        let target = u128_to_target(u128::MAX / 2);
        let hash_for = |n: u64| -> [u8; 32] {
            let mut out = [0xffu8; 32];
            out[0] = 0xff - (n % 256) as u8;
            out
        };
        // n=0 hashes to 0xff..ff which is not below target; must search.
        let found = mine_pass(&target, 0, 10_000, hash_for);
        assert!(found.is_some());
    }

    #[test]
    fn exhausting_attempts_returns_none() {
        let target = u128_to_target(1); // nearly impossible
        let hash_for = |_: u64| [0xffu8; 32];
        assert_eq!(mine_pass(&target, 0, 16, hash_for), None);
    }
}
