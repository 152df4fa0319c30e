//! `rseq` — Linux restartable sequences for Rust.
//!
//! Zero-dependency, `no_std` wrapper around the Linux rseq(2) syscall,
//! specialized for per-CPU hazard-slot banks: the one restartable
//! operation exposed is a NULL -> value compare-store against a slot of
//! the current CPU's bank, committed with a single pointer-sized store.
//! The kernel handles preemption and migration detection, so the fast
//! path carries no hardware atomics.
//!
//! # Features
//!
//! - `nightly` — enables `#[thread_local]` for the self-managed rseq area
//!   and weak-symbol glibc detection. Without this feature, only the raw
//!   ABI types, constants, and syscall wrappers are available.
//!
//! # Architecture support
//!
//! Currently x86_64 only.

#![no_std]
#![cfg_attr(feature = "nightly", feature(thread_local, linkage))]

pub mod abi;
pub mod slots;
pub mod syscall;
pub mod thread;

// Re-export key types at crate root.
pub use abi::{RSEQ_SIG, Rseq};
pub use slots::{SlotTrySet, slot_try_set};
pub use thread::{RseqLocal, current_cpu, current_rseq, rseq_available};
