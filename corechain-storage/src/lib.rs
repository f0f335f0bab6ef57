//! The ordered KV store façade and the derived account-state database
//! (spec.md §4.2, §4.3) — the only two things in the workspace allowed to
//! touch the on-disk chain state.

pub mod kv;
pub mod state;

pub use kv::{Store, Transaction};
pub use state::{ApplyError, StateDb};
