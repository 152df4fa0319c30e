//! Portable fallback for targets without membarrier/futex/sched_getcpu.
//!
//! The broadcast barrier becomes a plain full fence (its callers already
//! pair it with full reader fences in this mode), futex wait degrades to
//! a bounded spin (spurious returns are allowed by the contract), and all
//! threads share CPU bank 0.

use core::sync::atomic::{AtomicI32, Ordering, fence};

pub fn nr_cpus() -> usize {
    1
}

pub fn current_cpu() -> usize {
    0
}

pub fn membarrier_register() -> bool {
    false
}

pub fn membarrier_expedited() {
    fence(Ordering::SeqCst);
}

pub fn futex_wait(futex: &AtomicI32, expected: i32) {
    for _ in 0..64 {
        if futex.load(Ordering::Relaxed) != expected {
            return;
        }
        core::hint::spin_loop();
    }
    // Spurious return; the caller re-checks its condition.
}

pub fn futex_wake(_futex: &AtomicI32, _n: i32) {}

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    let layout = match core::alloc::Layout::from_size_align(size, 4096) {
        Ok(l) => l,
        Err(_) => return core::ptr::null_mut(),
    };
    unsafe { alloc::alloc::alloc_zeroed(layout) }
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    if let Ok(layout) = core::alloc::Layout::from_size_align(size, 4096) {
        unsafe { alloc::alloc::dealloc(ptr, layout) };
    }
}
