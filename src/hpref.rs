//! Hazard-pointer protected references with refcount promotion.
//!
//! A reader publishes the pointer it is about to dereference into a slot
//! of its CPU's bank, re-validates the publication, and from then on the
//! object cannot be released until the slot is cleared. Long critical
//! sections (or a full bank) promote the hazard reference to a counted
//! reference and free the slot immediately.
//!
//! Writers retire an object by unpublishing it, then calling
//! [`synchronize`] to wait out every hazard reference, then dropping
//! their own count. The NULL form of [`synchronize`] quiesces the whole
//! slab; its forward progress against a steady stream of readers is
//! guaranteed by the period tag in each slot's low bit.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::platform;
use crate::refcount::Refcount;
use crate::slab::{self, EMERGENCY_SLOT, Slab, TrySet};
use crate::stat_inc;
use crate::sync::Mutex;

/// Low bit of a slot value: the period tag.
const PERIOD_MASK: usize = 1;

/// Current period, flipped by each full-slab synchronize. Only bit 0 is
/// meaningful. Readers load it relaxed; the flip needs no stronger
/// ordering because both scans bracket it under [`SYNC_LOCK`].
static PERIOD: AtomicUsize = AtomicUsize::new(0);

/// Serializes full-slab (NULL) synchronizes.
static SYNC_LOCK: Mutex<()> = Mutex::new(());

// ── Nodes ───────────────────────────────────────────────────────────────────

/// Release callback, invoked exactly once when an object's count reaches
/// zero, on the thread that observed the final decrement.
pub type ReleaseFn = unsafe fn(*mut HprefNode);

/// Header embedded (first, `#[repr(C)]`) in every reclaimable object.
pub struct HprefNode {
    refcount: Refcount,
    release: ReleaseFn,
}

// The slot tag lives in bit 0 of the node address.
const _: () = assert!(align_of::<HprefNode>() >= 2);

impl HprefNode {
    /// A fresh node holding one reference (the publisher's).
    pub fn new(release: ReleaseFn) -> Self {
        Self {
            refcount: Refcount::new(),
            release,
        }
    }

    /// Current reference count. Observational only.
    pub fn refcount(&self) -> usize {
        self.refcount.load()
    }
}

/// Drop one reference to `node`, releasing the object on zero.
///
/// # Safety
///
/// The caller must own a reference (publisher's initial count, a
/// promoted guard, or an explicit acquire) that it has not yet dropped.
pub unsafe fn node_put(node: *mut HprefNode) {
    let n = unsafe { &*node };
    if n.refcount.release() {
        let release = n.release;
        unsafe { release(node) };
    }
}

// ── Publication ─────────────────────────────────────────────────────────────

/// Publish `node` (or NULL) at `loc`.
///
/// A non-NULL store releases, ordering every prior initialization of
/// `*node` before the publication. NULL needs no such ordering and is
/// stored relaxed.
pub fn set_pointer(loc: &AtomicPtr<HprefNode>, node: *mut HprefNode) {
    if node.is_null() {
        loc.store(node, Ordering::Relaxed);
    } else {
        loc.store(node, Ordering::Release);
    }
}

// ── Reader protocol ─────────────────────────────────────────────────────────

/// An existence-guaranteed reference produced by [`hp_get`].
///
/// In hazard mode the guarantee is the occupied slot; [`promote`]
/// trades it for a reference count (mandatory escape hatch for long
/// critical sections and automatic after emergency-slot use). Dropping
/// the guard releases whichever guarantee is held.
///
/// [`promote`]: HprefGuard::promote
pub struct HprefGuard {
    node: NonNull<HprefNode>,
    /// Occupied hazard slot; `None` once promoted.
    slot: Option<&'static AtomicUsize>,
}

// Safety: the node outlives the guard by protocol, the slot reference is
// 'static, and both slot clear and refcount drop may run on any thread.
unsafe impl Send for HprefGuard {}

impl HprefGuard {
    /// The protected node.
    #[inline]
    pub fn node(&self) -> NonNull<HprefNode> {
        self.node
    }

    /// Whether the guard holds a counted reference rather than a slot.
    #[inline]
    pub fn is_ref(&self) -> bool {
        self.slot.is_none()
    }

    /// Trade the hazard slot for a reference count.
    ///
    /// The count is acquired strictly before the slot is cleared, so a
    /// synchronizer that passes this slot already observes the non-zero
    /// count. No-op if already promoted.
    pub fn promote(&mut self) {
        if let Some(slot) = self.slot.take() {
            stat_inc!(hp_promote);
            unsafe { self.node.as_ref() }.refcount.acquire();
            slot.store(0, Ordering::Release);
        }
    }

    /// Explicit release; identical to dropping the guard.
    pub fn put(self) {}
}

impl Drop for HprefGuard {
    fn drop(&mut self) {
        match self.slot {
            Some(slot) => slot.store(0, Ordering::Release),
            None => unsafe { node_put(self.node.as_ptr()) },
        }
    }
}

/// Dereference the publication at `loc`, returning an
/// existence-guaranteed reference to the published node, or `None` when
/// the publication is NULL.
///
/// Bounded: at most one pass over the bank plus one emergency-slot wait
/// (itself bounded by another reader's slot hold time).
///
/// # Safety
///
/// `loc` must only ever hold NULL or pointers to live [`HprefNode`]s
/// published via [`set_pointer`], and retired nodes must go through
/// [`synchronize`] before their memory is reused.
pub unsafe fn hp_get(loc: &AtomicPtr<HprefNode>) -> Option<HprefGuard> {
    let mut node = NonNull::new(loc.load(Ordering::Relaxed))?;
    let slab = slab::get();
    loop {
        debug_assert_eq!(node.as_ptr() as usize & PERIOD_MASK, 0);
        let period = PERIOD.load(Ordering::Relaxed) & PERIOD_MASK;
        let tagged = node.as_ptr() as usize | period;
        let (slot, used_emergency) = acquire_slot(slab, tagged);

        // Slot store (Store B) before publication re-load (Load A);
        // pairs with the synchronizer's broadcast barrier.
        platform::reader_fence();

        // The slot store and the first load are not atomic together: the
        // publication may have moved and the old node been retired in
        // between. Identity comparison is sufficient — both values come
        // from the same location and retired nodes cannot be republished
        // before a synchronize passes our occupied slot.
        let node2 = loc.load(Ordering::Acquire);
        if node2 != node.as_ptr() {
            stat_inc!(hp_reload_race);
            slot.store(0, Ordering::Relaxed);
            node = NonNull::new(node2)?;
            continue;
        }

        stat_inc!(hp_get);
        let mut guard = HprefGuard {
            node,
            slot: Some(slot),
        };
        if used_emergency {
            // The emergency slot is a staging area shared by every
            // overflowing reader on this CPU; hold it only long enough
            // to take a count.
            guard.promote();
        }
        return Some(guard);
    }
}

/// Claim a slot of the current CPU's bank for `tagged`.
///
/// Regular slots are attempted once each (busy means move on, abort
/// means retry in place); the emergency slot is awaited.
fn acquire_slot(slab: &'static Slab, tagged: usize) -> (&'static AtomicUsize, bool) {
    for index in 0..EMERGENCY_SLOT {
        loop {
            match slab::try_set_slot(slab, index, tagged) {
                TrySet::Set { cpu } => return (slab.slot(cpu, index), false),
                TrySet::Busy => {
                    stat_inc!(hp_slot_busy);
                    break;
                }
                TrySet::Retry => {
                    stat_inc!(hp_slot_retry);
                }
            }
        }
    }

    stat_inc!(hp_emergency);
    loop {
        match slab::try_set_slot(slab, EMERGENCY_SLOT, tagged) {
            TrySet::Set { cpu } => return (slab.slot(cpu, EMERGENCY_SLOT), true),
            TrySet::Busy => core::hint::spin_loop(),
            TrySet::Retry => {}
        }
    }
}

// ── Synchronize ─────────────────────────────────────────────────────────────

/// Wait until no hazard reference obtained before the call protects
/// `node` (specific form), or until every pre-existing hazard reference
/// has been released (NULL form).
///
/// The caller's last unpublish (Store A) is ordered before the slot scan
/// (Load B) by a broadcast barrier, pairing with the reader fence in
/// [`hp_get`]. Blocks; may busy-wait for the duration of reader critical
/// sections.
pub fn synchronize(node: Option<NonNull<HprefNode>>) {
    let slab = slab::get();
    platform::broadcast_barrier();
    match node {
        Some(node) => {
            stat_inc!(hp_sync_node);
            scan_wait_node(slab, node);
        }
        None => {
            stat_inc!(hp_sync_all);
            synchronize_all(slab);
        }
    }
}

/// [`synchronize`] on `node`, then drop the caller's reference.
///
/// # Safety
///
/// As [`node_put`]; additionally `node` must already be unpublished from
/// every location readers reach it through.
pub unsafe fn synchronize_put(node: NonNull<HprefNode>) {
    synchronize(Some(node));
    unsafe { node_put(node.as_ptr()) };
}

fn scan_wait_node(slab: &Slab, node: NonNull<HprefNode>) {
    let raw = node.as_ptr() as usize;
    for bank in slab.banks() {
        for slot in &bank.slots {
            while (slot.load(Ordering::Acquire) & !PERIOD_MASK) == raw {
                core::hint::spin_loop();
            }
        }
    }
}

/// Two full scans bracketing a period flip, serialized by [`SYNC_LOCK`].
///
/// Scan A waits out slots still tagged with the stale period (set before
/// the previous flip); after the flip publishes the new period, scan B
/// waits out slots tagged with the period readers were using until a
/// moment ago. In each scan, readers tagging with the scan's current
/// period pass untouched, so a steady reacquire-release stream on one
/// slot cannot stall the scan; a slot passes once it goes NULL or its
/// tag differs, which implies the hazard reference it held at scan start
/// was released.
fn synchronize_all(slab: &Slab) {
    let _guard = SYNC_LOCK.lock();
    let period = PERIOD.load(Ordering::Relaxed) & PERIOD_MASK;
    scan_wait_period(slab, period ^ 1);
    PERIOD.store(period ^ 1, Ordering::Relaxed);
    scan_wait_period(slab, period);
}

fn scan_wait_period(slab: &Slab, period: usize) {
    for bank in slab.banks() {
        for slot in &bank.slots {
            loop {
                let v = slot.load(Ordering::Acquire);
                if v == 0 || (v & PERIOD_MASK) != period {
                    break;
                }
                core::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;
    use core::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[repr(C)]
    struct TestObj {
        node: HprefNode,
        value: u64,
        dropped: Arc<AtomicUsize>,
    }

    unsafe fn release_obj(node: *mut HprefNode) {
        let obj = unsafe { Box::from_raw(node as *mut TestObj) };
        obj.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn new_obj(value: u64, dropped: &Arc<AtomicUsize>) -> *mut HprefNode {
        Box::into_raw(Box::new(TestObj {
            node: HprefNode::new(release_obj),
            value,
            dropped: Arc::clone(dropped),
        })) as *mut HprefNode
    }

    #[test]
    fn test_get_null_publication() {
        let loc = AtomicPtr::new(core::ptr::null_mut());
        assert!(unsafe { hp_get(&loc) }.is_none());
    }

    #[test]
    fn test_publish_get_observe_put() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let obj = new_obj(42, &dropped);
        let loc = AtomicPtr::new(core::ptr::null_mut());
        set_pointer(&loc, obj);

        {
            let guard = unsafe { hp_get(&loc) }.expect("published");
            assert_eq!(guard.node().as_ptr(), obj);
            let value = unsafe { &*(guard.node().as_ptr() as *mut TestObj) }.value;
            assert_eq!(value, 42);
            assert!(!guard.is_ref());
        }

        set_pointer(&loc, core::ptr::null_mut());
        unsafe { synchronize_put(NonNull::new(obj).unwrap()) };
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert!(unsafe { hp_get(&loc) }.is_none());
    }

    #[test]
    fn test_promote_takes_count_and_frees_slot() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let obj = new_obj(7, &dropped);
        let loc = AtomicPtr::new(core::ptr::null_mut());
        set_pointer(&loc, obj);

        let mut guard = unsafe { hp_get(&loc) }.expect("published");
        guard.promote();
        assert!(guard.is_ref());
        assert_eq!(unsafe { &*obj }.refcount(), 2);
        guard.promote(); // idempotent
        assert_eq!(unsafe { &*obj }.refcount(), 2);

        // With the slot free, retiring only waits on the count.
        set_pointer(&loc, core::ptr::null_mut());
        synchronize(Some(NonNull::new(obj).unwrap()));
        assert_eq!(dropped.load(Ordering::Relaxed), 0);

        drop(guard);
        assert_eq!(unsafe { &*obj }.refcount(), 1);
        unsafe { node_put(obj) };
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_guard_survives_republication() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let first = new_obj(1, &dropped);
        let second = new_obj(2, &dropped);
        let loc = AtomicPtr::new(core::ptr::null_mut());
        set_pointer(&loc, first);

        let guard = unsafe { hp_get(&loc) }.expect("published");

        // Replace the publication; the guard still pins the old node.
        set_pointer(&loc, second);
        assert_eq!(guard.node().as_ptr(), first);
        let value = unsafe { &*(guard.node().as_ptr() as *mut TestObj) }.value;
        assert_eq!(value, 1);
        drop(guard);

        unsafe { synchronize_put(NonNull::new(first).unwrap()) };
        set_pointer(&loc, core::ptr::null_mut());
        unsafe { synchronize_put(NonNull::new(second).unwrap()) };
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }
}
