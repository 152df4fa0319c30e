//! RCU-QSBR stress and liveness scenarios.
//!
//! Domains are per-test, so these tests coexist in one process.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use rsmr::RcuDomain;

/// RCU-protected payload with a self-check: `b` is always `!a`.
struct Payload {
    a: u64,
    b: u64,
}

#[test]
fn grace_periods_protect_readers() {
    let domain = RcuDomain::new();
    let ptr = Arc::new(AtomicPtr::new(Box::into_raw(Box::new(Payload {
        a: 0,
        b: !0,
    }))));
    let stop = Arc::new(AtomicBool::new(false));
    let num_readers = 4;
    let rounds: u64 = 1_000;

    let readers: Vec<_> = (0..num_readers)
        .map(|_| {
            let domain = Arc::clone(&domain);
            let ptr = Arc::clone(&ptr);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let reader = domain.reader();
                reader.register();
                while !stop.load(Ordering::Relaxed) {
                    reader.read_lock();
                    let p = ptr.load(Ordering::Acquire);
                    let payload = unsafe { &*p };
                    // A reclaimed payload fails the self-check.
                    assert_eq!(payload.b, !payload.a);
                    reader.read_unlock();
                    reader.quiescent_state();
                }
                reader.unregister();
            })
        })
        .collect();

    for i in 1..=rounds {
        let fresh = Box::into_raw(Box::new(Payload { a: i, b: !i }));
        let old = ptr.swap(fresh, Ordering::AcqRel);
        domain.synchronize();
        // Every pre-existing critical section has ended; the old
        // payload cannot be referenced anymore.
        drop(unsafe { Box::from_raw(old) });
    }

    stop.store(true, Ordering::Relaxed);
    for r in readers {
        r.join().unwrap();
    }
    drop(unsafe { Box::from_raw(ptr.load(Ordering::Acquire)) });
    assert!(domain.grace_periods() >= rounds as usize);
}

#[test]
fn concurrent_synchronize_all_return() {
    let domain = RcuDomain::new();
    let num_writers = 16;
    let barrier = Arc::new(Barrier::new(num_writers));

    let writers: Vec<_> = (0..num_writers)
        .map(|_| {
            let domain = Arc::clone(&domain);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                domain.synchronize();
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    // Batching: everyone returned, but the number of grace periods
    // actually led is between one and the number of callers.
    let led = domain.grace_periods();
    assert!(led >= 1 && led <= num_writers, "led {led} grace periods");
}

#[test]
fn batched_writers_wait_for_the_reader() {
    let domain = RcuDomain::new();
    let reader = domain.reader();
    reader.register();

    let num_writers = 8;
    let done = Arc::new(AtomicUsize::new(0));
    let writers: Vec<_> = (0..num_writers)
        .map(|_| {
            let domain = Arc::clone(&domain);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                domain.synchronize();
                done.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();

    // The online reader has not passed a quiescent state: no writer may
    // return yet.
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(done.load(Ordering::Relaxed), 0, "grace period ignored the reader");

    // Feed quiescent states until every batch drains.
    while done.load(Ordering::Relaxed) < num_writers {
        reader.quiescent_state();
        std::thread::yield_now();
    }
    for w in writers {
        w.join().unwrap();
    }
    reader.unregister();
}

#[test]
fn register_during_grace_period() {
    let domain = RcuDomain::new();
    let blocker = domain.reader();
    blocker.register();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let domain = Arc::clone(&domain);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            domain.synchronize();
            done.store(true, Ordering::Release);
        })
    };

    // Give the grace period time to start waiting on `blocker`.
    std::thread::sleep(Duration::from_millis(20));
    assert!(!done.load(Ordering::Acquire));

    // Registration must get through the sporadically-released registry
    // lock, and the newcomer must not stall the grace period past its
    // first quiescent state.
    let late = {
        let domain = Arc::clone(&domain);
        std::thread::spawn(move || {
            let reader = domain.reader();
            reader.register();
            for _ in 0..100 {
                reader.quiescent_state();
                std::thread::yield_now();
            }
            reader.unregister();
        })
    };

    while !done.load(Ordering::Acquire) {
        blocker.quiescent_state();
        std::thread::yield_now();
    }
    writer.join().unwrap();
    late.join().unwrap();
    blocker.unregister();
}

#[test]
fn offline_reader_is_not_waited_on() {
    let domain = RcuDomain::new();
    let reader = domain.reader();
    reader.register();
    reader.offline();

    // No quiescent states from the reader, yet the grace period ends.
    domain.synchronize();
    assert_eq!(domain.grace_periods(), 1);

    reader.online();
    reader.unregister();
}

#[test]
fn futex_slow_path_wakes_writer() {
    let domain = RcuDomain::new();
    let reader = domain.reader();
    reader.register();

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let domain = Arc::clone(&domain);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            domain.synchronize();
            done.store(true, Ordering::Release);
        })
    };

    // Long enough for the leader to exhaust its spin attempts and park
    // on the domain futex; the quiescent state must wake it.
    std::thread::sleep(Duration::from_millis(50));
    while !done.load(Ordering::Acquire) {
        reader.quiescent_state();
        std::thread::yield_now();
    }
    writer.join().unwrap();
    reader.unregister();
}

#[test]
fn counter_strictly_advances() {
    let domain = RcuDomain::new();
    let mut last = domain.grace_periods();
    for _ in 0..10 {
        domain.synchronize();
        let now = domain.grace_periods();
        assert!(now > last);
        last = now;
    }
}

#[test]
fn reader_handle_moves_between_threads() {
    let domain = RcuDomain::new();
    let reader = domain.reader();
    reader.register();
    reader.offline();

    // The handle is Send: park it on another thread, run read-side work
    // there, and let the drop unregister it.
    let h = std::thread::spawn(move || {
        reader.online();
        reader.read_lock();
        reader.read_unlock();
        reader.quiescent_state();
    });
    h.join().unwrap();

    domain.synchronize();
    assert_eq!(domain.grace_periods(), 1);
}
