//! Scheduler module facade.
//!
//! Public scheduler API is implemented in `roundrobin.rs` and re-exported here
//! so `crate::scheduler::*` call sites stay clean. `context_switch` holds the
//! one genuinely architecture-specific primitive (the asm stack switch).

mod context_switch;
mod roundrobin;

// Re-exported as scheduler facade API for library consumers/tests.
// The binary target may not reference every symbol directly.
#[allow(unused_imports)]
pub use roundrobin::*;

// `fork_ret` is the one context-switch symbol process lifecycle operations
// need directly, to forge a child's initial stack frame.
pub(crate) use context_switch::fork_ret;
