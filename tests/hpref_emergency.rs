//! Emergency-slot policy, made deterministic by pre-filling every
//! bank's regular slots so the next reader must stage through the
//! emergency slot. Lives in its own binary as a single test: it owns
//! the whole slab while it runs.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use rsmr::HprefNode;
use rsmr::hpref::{self, set_pointer, synchronize_put};
use rsmr::slab::{self, EMERGENCY_SLOT};

#[repr(C)]
struct Obj {
    node: HprefNode,
    value: u64,
    drops: Arc<AtomicU64>,
}

unsafe fn release_obj(node: *mut HprefNode) {
    let obj = unsafe { Box::from_raw(node as *mut Obj) };
    obj.drops.fetch_add(1, Ordering::Relaxed);
}

fn new_obj(value: u64, drops: &Arc<AtomicU64>) -> *mut HprefNode {
    Box::into_raw(Box::new(Obj {
        node: HprefNode::new(release_obj),
        value,
        drops: Arc::clone(drops),
    })) as *mut HprefNode
}

/// Every regular slot of every bank occupied: the reader must fall
/// through to the emergency slot and come back promoted, leaving the
/// staging slot free for the next overflow reader.
fn exhausted_banks_promote(drops: &Arc<AtomicU64>) {
    let obj = new_obj(9, drops);
    let loc = AtomicPtr::new(std::ptr::null_mut());
    set_pointer(&loc, obj);

    // A dummy occupant for the regular slots: a valid node address, so
    // synchronize scans compare against something real, but one no
    // reader ever dereferences.
    let dummy = new_obj(0, drops);

    let slab = slab::get();
    for cpu in 0..slab.nr_cpus() {
        for index in 0..EMERGENCY_SLOT {
            slab.slot(cpu, index).store(dummy as usize, Ordering::Release);
        }
    }

    {
        let guard = unsafe { hpref::hp_get(&loc) }.expect("published");
        assert!(guard.is_ref(), "emergency acquisition was not promoted");
        assert_eq!(unsafe { &*obj }.refcount(), 2);
        let value = unsafe { &*(guard.node().as_ptr() as *const Obj) }.value;
        assert_eq!(value, 9);

        // The staging slot is free again: a second overflow reader gets
        // through without waiting for the first's critical section.
        let guard2 = unsafe { hpref::hp_get(&loc) }.expect("published");
        assert!(guard2.is_ref());
        assert_eq!(unsafe { &*obj }.refcount(), 3);
    }
    assert_eq!(unsafe { &*obj }.refcount(), 1);

    // Restore the slab before exercising synchronize.
    for cpu in 0..slab.nr_cpus() {
        for index in 0..EMERGENCY_SLOT {
            slab.slot(cpu, index).store(0, Ordering::Release);
        }
    }

    set_pointer(&loc, std::ptr::null_mut());
    unsafe { synchronize_put(NonNull::new(obj).unwrap()) };
    unsafe { hpref::node_put(dummy) };
}

/// More concurrent holders than one bank has slots, each holding its
/// guard across a sleep. Overflowing readers promote rather than block
/// each other for a full critical section, so everyone completes.
fn overflow_readers_all_complete(drops: &Arc<AtomicU64>) {
    let obj = new_obj(5, drops);
    let loc = Arc::new(AtomicPtr::new(std::ptr::null_mut()));
    set_pointer(&loc, obj);

    let num_readers = 10;
    let handles: Vec<_> = (0..num_readers)
        .map(|_| {
            let loc = Arc::clone(&loc);
            std::thread::spawn(move || {
                let guard = unsafe { hpref::hp_get(&loc) }.expect("published");
                let value = unsafe { &*(guard.node().as_ptr() as *const Obj) }.value;
                assert_eq!(value, 5);
                std::thread::sleep(std::time::Duration::from_millis(1));
                drop(guard);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    set_pointer(&loc, std::ptr::null_mut());
    unsafe { synchronize_put(NonNull::new(obj).unwrap()) };
}

#[test]
fn emergency_slot_policy() {
    let drops = Arc::new(AtomicU64::new(0));
    exhausted_banks_promote(&drops);
    assert_eq!(drops.load(Ordering::Relaxed), 2);
    overflow_readers_all_complete(&drops);
    assert_eq!(drops.load(Ordering::Relaxed), 3);
}
