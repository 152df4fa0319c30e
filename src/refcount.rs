//! Object reference counter with decrement-to-zero detection.
//!
//! The counter alone does not run the release callback — the embedding
//! object owns that (see [`crate::hpref::node_put`]). `release` only
//! reports the 1 -> 0 transition, with the acquire fence already issued,
//! so the caller may immediately tear the object down.

use core::sync::atomic::{AtomicUsize, Ordering, fence};

/// A plain acquire/release reference counter.
///
/// Acquires are relaxed: a thread may only acquire while the object's
/// existence is already guaranteed by another mechanism (a hazard slot
/// or a reference it holds), so no ordering is needed on the increment.
/// The final decrement releases, and the zero observer acquires, which
/// orders every prior use of the object before its destruction.
pub struct Refcount {
    count: AtomicUsize,
}

impl Refcount {
    /// New counter holding one reference.
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(1),
        }
    }

    /// Take an additional reference.
    #[inline]
    pub fn acquire(&self) {
        let prev = self.count.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev != 0, "refcount acquire on released object");
    }

    /// Drop one reference. Returns `true` on the decrement that reaches
    /// zero; the caller must then release the object exactly once.
    #[inline]
    #[must_use]
    pub fn release(&self) -> bool {
        let prev = self.count.fetch_sub(1, Ordering::Release);
        debug_assert!(prev != 0, "refcount release below zero");
        if prev == 1 {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Current count. Observational only.
    #[inline]
    pub fn load(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Refcount {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use std::sync::Arc;

    #[test]
    fn test_new_holds_one() {
        let rc = Refcount::new();
        assert_eq!(rc.load(), 1);
        assert!(rc.release());
    }

    #[test]
    fn test_acquire_release_pairs() {
        let rc = Refcount::new();
        rc.acquire();
        rc.acquire();
        assert_eq!(rc.load(), 3);
        assert!(!rc.release());
        assert!(!rc.release());
        assert!(rc.release());
    }

    #[test]
    fn test_zero_reported_exactly_once_concurrent() {
        let rc = Arc::new(Refcount::new());
        let num_threads = 8;
        let per_thread = 1_000;

        // Balance the initial reference with one extra release below.
        for _ in 0..num_threads * per_thread {
            rc.acquire();
        }

        let zero_hits = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let rc = Arc::clone(&rc);
                let hits = Arc::clone(&zero_hits);
                std::thread::spawn(move || {
                    for _ in 0..per_thread {
                        if rc.release() {
                            hits.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(zero_hits.load(Ordering::Relaxed), 0);
        assert_eq!(rc.load(), 1);
        assert!(rc.release());
    }
}
