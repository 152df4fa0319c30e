//! OS platform abstraction: CPU identity, asymmetric barriers, futex,
//! and virtual memory for the hazard slab.
//!
//! On Linux the broadcast barrier is `membarrier(2)` with the
//! PRIVATE_EXPEDITED command, registered once on first use. Where that
//! primitive is unavailable (old kernel, other OS), every paired fence
//! point degrades to a full `SeqCst` fence on both sides; correctness
//! requires the pairing, not the mechanism.

use core::sync::atomic::{AtomicI32, AtomicU8, AtomicUsize, Ordering, compiler_fence, fence};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        use linux as imp;
    } else {
        mod fallback;
        use fallback as imp;
    }
}

// ── CPU identity ────────────────────────────────────────────────────────────

/// Cached CPU count; 0 means not yet queried.
static NR_CPUS: AtomicUsize = AtomicUsize::new(0);

/// Number of CPUs the kernel may ever schedule this process on.
///
/// Queried once; every per-CPU structure in the crate is sized by this.
pub fn num_possible_cpus() -> usize {
    let n = NR_CPUS.load(Ordering::Relaxed);
    if n != 0 {
        return n;
    }
    let n = imp::nr_cpus().max(1);
    // Racing initializers compute the same value.
    NR_CPUS.store(n, Ordering::Relaxed);
    log::debug!("num_possible_cpus = {n}");
    n
}

/// Identifier of the CPU this thread is currently running on.
///
/// May be stale by the time the caller uses it; callers that need
/// migration detection go through the restartable slot store instead.
/// Always less than [`num_possible_cpus`].
#[inline]
pub fn current_cpu() -> usize {
    imp::current_cpu().min(num_possible_cpus() - 1)
}

// ── Asymmetric barrier ──────────────────────────────────────────────────────

const MEMBARRIER_UNKNOWN: u8 = 0;
const MEMBARRIER_READY: u8 = 1;
const MEMBARRIER_FALLBACK: u8 = 2;

static MEMBARRIER_STATE: AtomicU8 = AtomicU8::new(MEMBARRIER_UNKNOWN);

#[cold]
fn membarrier_init() -> u8 {
    let state = if imp::membarrier_register() {
        MEMBARRIER_READY
    } else {
        log::debug!("membarrier unavailable, using full fences on both sides");
        MEMBARRIER_FALLBACK
    };
    // Racing initializers agree: registration is idempotent.
    MEMBARRIER_STATE.store(state, Ordering::Relaxed);
    state
}

#[inline]
fn membarrier_state() -> u8 {
    let state = MEMBARRIER_STATE.load(Ordering::Relaxed);
    if state == MEMBARRIER_UNKNOWN {
        membarrier_init()
    } else {
        state
    }
}

/// Writer side of the asymmetric barrier: a full memory fence observed
/// by every CPU currently running a thread of this process.
pub fn broadcast_barrier() {
    if membarrier_state() == MEMBARRIER_READY {
        imp::membarrier_expedited();
    } else {
        fence(Ordering::SeqCst);
    }
}

/// Reader side of the asymmetric barrier. Compiler-only when the writer
/// is known to issue [`broadcast_barrier`] at the paired site; a full
/// fence otherwise.
#[inline]
pub fn reader_fence() {
    if membarrier_state() == MEMBARRIER_READY {
        compiler_fence(Ordering::SeqCst);
    } else {
        fence(Ordering::SeqCst);
    }
}

// ── Futex ───────────────────────────────────────────────────────────────────

/// Block until `*futex != expected` or a wake arrives. May return
/// spuriously; callers loop on their condition.
#[inline]
pub fn futex_wait(futex: &AtomicI32, expected: i32) {
    imp::futex_wait(futex, expected);
}

/// Wake up to `n` waiters blocked on `futex`.
#[inline]
pub fn futex_wake(futex: &AtomicI32, n: i32) {
    imp::futex_wake(futex, n);
}

// ── Virtual memory ──────────────────────────────────────────────────────────

/// Allocate `size` bytes of zero-initialized, page-aligned memory.
/// Returns null on failure.
///
/// # Safety
///
/// Caller must eventually call [`page_dealloc`] with the returned pointer
/// and the same `size`, or let the mapping live for the process lifetime.
#[inline]
pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    unsafe { imp::page_alloc(size) }
}

/// Free memory previously allocated by [`page_alloc`].
///
/// # Safety
///
/// `ptr` must have been returned by `page_alloc`, and `size` must match
/// the original allocation size.
#[inline]
pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    unsafe { imp::page_dealloc(ptr, size) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_identity_in_range() {
        let n = num_possible_cpus();
        assert!(n >= 1);
        for _ in 0..64 {
            assert!(current_cpu() < n);
        }
    }

    #[test]
    fn barrier_pairing_smoke() {
        // Both sides must be callable from any thread at any time.
        broadcast_barrier();
        reader_fence();
        broadcast_barrier();
    }

    #[test]
    fn futex_wake_without_waiters() {
        let f = AtomicI32::new(0);
        futex_wake(&f, 1);
    }

    #[test]
    fn futex_wait_on_changed_value_returns() {
        let f = AtomicI32::new(1);
        // Value mismatch: must return immediately instead of blocking.
        futex_wait(&f, 0);
    }

    #[test]
    fn page_alloc_zeroed() {
        unsafe {
            let size = 4096;
            let ptr = page_alloc(size);
            assert!(!ptr.is_null());
            for i in 0..size {
                assert_eq!(*ptr.add(i), 0);
            }
            page_dealloc(ptr, size);
        }
    }
}
