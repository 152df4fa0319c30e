//! Per-CPU hazard slot banks.
//!
//! One cache-line-sized bank of tagged slots per CPU, carved out of a
//! single zero-initialized region so the restartable store can locate a
//! bank with a shift. A slot holds 0 (empty) or a node pointer with the
//! period tag in its low bit. The NULL -> tagged transition is reserved
//! for the thread currently on the bank's CPU (restartable compare-store,
//! or a plain CAS on the off-CPU fallback path); clearing and observing
//! a slot is open to every thread.

use core::mem::size_of;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use alloc::boxed::Box;

use crate::platform;
use crate::sync::Mutex;
use crate::tuning::SLOTS_PER_BANK;

/// Index of the reserved emergency slot (always the last of the bank).
pub const EMERGENCY_SLOT: usize = SLOTS_PER_BANK - 1;

/// A CPU's hazard slots. Aligned so banks never share a cache line.
#[repr(C, align(64))]
pub struct SlotBank {
    pub slots: [AtomicUsize; SLOTS_PER_BANK],
}

const BANK_BYTES: usize = size_of::<SlotBank>();

/// Log2 of the byte stride between consecutive CPU banks.
pub const BANK_SHIFT: u32 = BANK_BYTES.trailing_zeros();

const _: () = assert!(BANK_BYTES.is_power_of_two());
const _: () = assert!(SLOTS_PER_BANK >= 2, "need at least one regular slot");

/// The process-wide hazard slot table: `nr_cpus` consecutive banks.
pub struct Slab {
    banks: NonNull<SlotBank>,
    nr_cpus: usize,
}

// Safety: all bank state is atomic; the header itself is immutable after
// publication.
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Slab {
    #[inline]
    pub fn nr_cpus(&self) -> usize {
        self.nr_cpus
    }

    /// Base pointer of the bank region, for the restartable store.
    #[inline]
    pub fn banks_ptr(&self) -> *mut u8 {
        self.banks.as_ptr() as *mut u8
    }

    #[inline]
    pub fn bank(&self, cpu: usize) -> &SlotBank {
        debug_assert!(cpu < self.nr_cpus);
        unsafe { &*self.banks.as_ptr().add(cpu) }
    }

    #[inline]
    pub fn slot(&self, cpu: usize, index: usize) -> &AtomicUsize {
        &self.bank(cpu).slots[index]
    }

    /// Iterate every bank of the slab.
    pub fn banks(&self) -> impl Iterator<Item = &SlotBank> {
        (0..self.nr_cpus).map(move |cpu| self.bank(cpu))
    }
}

// ── Global slab, published once ─────────────────────────────────────────────

static SLAB: AtomicPtr<Slab> = AtomicPtr::new(core::ptr::null_mut());
static SLAB_INIT: Mutex<()> = Mutex::new(());

/// The process-wide slab, allocated on first use and never torn down.
#[inline]
pub fn get() -> &'static Slab {
    let p = SLAB.load(Ordering::Acquire);
    if !p.is_null() {
        return unsafe { &*p };
    }
    init_slow()
}

#[cold]
fn init_slow() -> &'static Slab {
    let _guard = SLAB_INIT.lock();
    let p = SLAB.load(Ordering::Acquire);
    if !p.is_null() {
        return unsafe { &*p };
    }

    let nr_cpus = platform::num_possible_cpus();
    let bytes = nr_cpus << BANK_SHIFT;
    let mem = unsafe { platform::page_alloc(bytes) };
    assert!(!mem.is_null(), "hazard slab allocation failed");
    // page_alloc memory is zeroed: every slot starts out NULL.

    let slab = Box::new(Slab {
        banks: unsafe { NonNull::new_unchecked(mem as *mut SlotBank) },
        nr_cpus,
    });
    let raw = Box::into_raw(slab);
    SLAB.store(raw, Ordering::Release);
    log::debug!("hazard slab: {nr_cpus} banks x {BANK_BYTES} bytes");
    unsafe { &*raw }
}

// ── Restartable slot store ──────────────────────────────────────────────────

/// Outcome of one attempt to claim a slot on the current CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySet {
    /// The slot on `cpu`'s bank now holds the tagged value.
    Set { cpu: usize },
    /// The slot is occupied; try the next one.
    Busy,
    /// Preempted or migrated mid-attempt; retry the same slot.
    Retry,
}

#[cfg(feature = "percpu")]
#[thread_local]
static RSEQ: rseq::RseqLocal = rseq::RseqLocal::new();

/// Claim `slab`'s slot `index` on the current CPU with `tagged`,
/// provided the slot is NULL.
#[inline]
pub fn try_set_slot(slab: &Slab, index: usize, tagged: usize) -> TrySet {
    debug_assert!(index < SLOTS_PER_BANK);
    debug_assert!(tagged != 0);

    #[cfg(feature = "percpu")]
    if let Some(rseq_ptr) = RSEQ.rseq_ptr() {
        let off = (index * size_of::<usize>()) as u64;
        return match unsafe {
            rseq::slot_try_set(rseq_ptr, slab.banks_ptr(), BANK_SHIFT, off, tagged)
        } {
            rseq::SlotTrySet::Committed { cpu } => TrySet::Set { cpu: cpu as usize },
            rseq::SlotTrySet::Busy => TrySet::Busy,
            rseq::SlotTrySet::Aborted => TrySet::Retry,
        };
    }

    // Off-CPU fallback: the CPU id may be stale by the time the CAS
    // lands, which costs locality but not safety — the reader protocol
    // re-validates the publication after the slot store either way.
    let cpu = platform::current_cpu();
    match slab
        .slot(cpu, index)
        .compare_exchange(0, tagged, Ordering::Relaxed, Ordering::Relaxed)
    {
        Ok(_) => TrySet::Set { cpu },
        Err(_) => TrySet::Busy,
    }
}
