#![no_std]
#![cfg_attr(feature = "nightly", feature(thread_local))]

//! rsmr: safe memory reclamation primitives for concurrent data structures.
//!
//! Two cooperating schemes let readers dereference a published pointer
//! and keep the pointee alive for a bounded critical section:
//! - Per-CPU hazard pointers with refcount promotion ([`hpref`]) —
//!   `feature = "percpu"` enables the restartable-sequence fast path
//! - Quiescent-state-based RCU with per-domain grace periods
//!   ([`domain`], [`qsbr`])
//!
//! # Usage
//!
//! ```ignore
//! let domain = rsmr::RcuDomain::new();
//! let reader = domain.reader();
//! reader.register();
//! // ... read-side critical sections, quiescent_state() in between ...
//! domain.synchronize(); // writer: wait out all pre-existing readers
//! ```

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod domain;
pub mod global;
mod grace;
pub mod hpref;
pub mod platform;
pub mod qsbr;
pub mod refcount;
pub mod slab;
pub mod stats;
pub mod sync;
pub mod tuning;
mod waitqueue;

// Re-export the primary types at crate root for convenience
pub use domain::RcuDomain;
pub use hpref::{HprefGuard, HprefNode};
pub use qsbr::Reader;
pub use refcount::Refcount;
