//! Reclamation statistics counters.
//!
//! All counters use `Relaxed` ordering — they are observational only and
//! not used as synchronization primitives. The protocols' own fences and
//! locks provide the ordering guarantees for correctness; these counters
//! are purely for monitoring.
//!
//! # Usage
//!
//! ```ignore
//! let snap = rsmr::stats::snapshot();
//! println!("grace periods: {}", snap.gp_count);
//! ```
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! individually atomic but not globally consistent with each other.
//!
//! Protocol code records events through [`stat_inc!`]; without the
//! `stats` feature the macro (and this module's counters) compile to
//! nothing.

#[cfg(feature = "stats")]
use core::sync::atomic::{AtomicU64, Ordering};

/// Bump a reclamation counter at a protocol event site.
///
/// Counters are only ever incremented by one — an event either happened
/// or it didn't. Compiles to nothing when the `stats` feature is
/// disabled.
#[macro_export]
macro_rules! stat_inc {
    ($counter:ident) => {
        #[cfg(feature = "stats")]
        {
            $crate::stats::STATS
                .$counter
                .fetch_add(1, ::core::sync::atomic::Ordering::Relaxed);
        }
    };
}

#[cfg(feature = "stats")]
pub(crate) struct Stats {
    // ---- HPREF read side ----
    /// Successful `hp_get` calls (hazard or promoted reference taken).
    pub hp_get: AtomicU64,
    /// Slot attempts that found the slot occupied and moved on.
    pub hp_slot_busy: AtomicU64,
    /// Restartable slot attempts aborted by preemption or migration.
    pub hp_slot_retry: AtomicU64,
    /// Readers that fell through every regular slot to the emergency slot.
    pub hp_emergency: AtomicU64,
    /// Hazard references promoted to counted references.
    pub hp_promote: AtomicU64,
    /// Publication re-loads that disagreed with the first load.
    pub hp_reload_race: AtomicU64,

    // ---- HPREF write side ----
    /// Single-node synchronize calls.
    pub hp_sync_node: AtomicU64,
    /// Full-slab (NULL) synchronize calls, i.e. period flips.
    pub hp_sync_all: AtomicU64,

    // ---- RCU ----
    /// Grace periods led to completion.
    pub gp_count: AtomicU64,
    /// Synchronize callers batched onto another caller's grace period.
    pub gp_batched: AtomicU64,
    /// Times a grace-period leader armed the futex and slept.
    pub gp_futex_sleep: AtomicU64,
    /// Reader registrations across all domains.
    pub reader_register: AtomicU64,
    /// Reader unregistrations across all domains.
    pub reader_unregister: AtomicU64,
}

#[cfg(feature = "stats")]
impl Stats {
    const fn new() -> Self {
        Self {
            hp_get: AtomicU64::new(0),
            hp_slot_busy: AtomicU64::new(0),
            hp_slot_retry: AtomicU64::new(0),
            hp_emergency: AtomicU64::new(0),
            hp_promote: AtomicU64::new(0),
            hp_reload_race: AtomicU64::new(0),
            hp_sync_node: AtomicU64::new(0),
            hp_sync_all: AtomicU64::new(0),
            gp_count: AtomicU64::new(0),
            gp_batched: AtomicU64::new(0),
            gp_futex_sleep: AtomicU64::new(0),
            reader_register: AtomicU64::new(0),
            reader_unregister: AtomicU64::new(0),
        }
    }
}

#[cfg(feature = "stats")]
pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all reclamation statistics.
///
/// Fields are plain `u64` values loaded from the global atomic counters.
/// Individual fields are each atomically read, but the snapshot as a whole
/// is not globally consistent — concurrent operations may race between
/// loads. For monitoring purposes this is always sufficient.
///
/// Obtain a snapshot with [`snapshot()`].
#[cfg(feature = "stats")]
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    /// Successful `hp_get` calls.
    pub hp_get: u64,
    /// Slot attempts that found the slot occupied.
    pub hp_slot_busy: u64,
    /// Restartable slot attempts aborted by preemption or migration.
    pub hp_slot_retry: u64,
    /// Readers that reached the emergency slot.
    pub hp_emergency: u64,
    /// Hazard references promoted to counted references.
    pub hp_promote: u64,
    /// Publication re-loads that disagreed with the first load.
    pub hp_reload_race: u64,
    /// Single-node synchronize calls.
    pub hp_sync_node: u64,
    /// Full-slab (NULL) synchronize calls.
    pub hp_sync_all: u64,
    /// Grace periods led to completion.
    pub gp_count: u64,
    /// Synchronize callers batched onto another caller's grace period.
    pub gp_batched: u64,
    /// Times a grace-period leader armed the futex and slept.
    pub gp_futex_sleep: u64,
    /// Reader registrations across all domains.
    pub reader_register: u64,
    /// Reader unregistrations across all domains.
    pub reader_unregister: u64,
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
#[cfg(feature = "stats")]
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        hp_get: s.hp_get.load(Ordering::Relaxed),
        hp_slot_busy: s.hp_slot_busy.load(Ordering::Relaxed),
        hp_slot_retry: s.hp_slot_retry.load(Ordering::Relaxed),
        hp_emergency: s.hp_emergency.load(Ordering::Relaxed),
        hp_promote: s.hp_promote.load(Ordering::Relaxed),
        hp_reload_race: s.hp_reload_race.load(Ordering::Relaxed),
        hp_sync_node: s.hp_sync_node.load(Ordering::Relaxed),
        hp_sync_all: s.hp_sync_all.load(Ordering::Relaxed),
        gp_count: s.gp_count.load(Ordering::Relaxed),
        gp_batched: s.gp_batched.load(Ordering::Relaxed),
        gp_futex_sleep: s.gp_futex_sleep.load(Ordering::Relaxed),
        reader_register: s.reader_register.load(Ordering::Relaxed),
        reader_unregister: s.reader_unregister.load(Ordering::Relaxed),
    }
}
