//! Read-side fast-path and writer-side microbenchmarks.
//!
//! The interesting numbers are the per-op cost of `hp_get`/`put` against
//! plain refcounting, the QSBR quiescent-state report, and the latency
//! of a grace period with and without batching pressure.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::AtomicPtr;

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use rsmr::hpref::{self, set_pointer, synchronize_put};
use rsmr::{HprefNode, RcuDomain};

#[repr(C)]
struct Obj {
    node: HprefNode,
    value: u64,
}

unsafe fn release_obj(node: *mut HprefNode) {
    drop(unsafe { Box::from_raw(node as *mut Obj) });
}

fn bench_hpref_read_side(c: &mut Criterion) {
    let obj = Box::into_raw(Box::new(Obj {
        node: HprefNode::new(release_obj),
        value: 42,
    })) as *mut HprefNode;
    let loc = AtomicPtr::new(std::ptr::null_mut());
    set_pointer(&loc, obj);

    c.bench_function("hpref/get_put", |b| {
        b.iter(|| {
            let guard = unsafe { hpref::hp_get(black_box(&loc)) }.unwrap();
            black_box(guard.node());
        })
    });

    c.bench_function("hpref/get_promote_put", |b| {
        b.iter(|| {
            let mut guard = unsafe { hpref::hp_get(black_box(&loc)) }.unwrap();
            guard.promote();
            black_box(guard.node());
        })
    });

    set_pointer(&loc, std::ptr::null_mut());
    unsafe { synchronize_put(NonNull::new(obj).unwrap()) };
}

fn bench_hpref_synchronize(c: &mut Criterion) {
    c.bench_function("hpref/synchronize_null_idle", |b| {
        b.iter(|| hpref::synchronize(black_box(None)))
    });
}

fn bench_qsbr(c: &mut Criterion) {
    let domain = RcuDomain::new();
    let reader = domain.reader();
    reader.register();

    c.bench_function("qsbr/read_lock_unlock", |b| {
        b.iter(|| {
            reader.read_lock();
            black_box(&reader);
            reader.read_unlock();
        })
    });

    c.bench_function("qsbr/quiescent_state", |b| {
        b.iter(|| reader.quiescent_state())
    });

    c.bench_function("qsbr/offline_online", |b| {
        b.iter(|| {
            reader.offline();
            reader.online();
        })
    });

    reader.unregister();

    c.bench_function("qsbr/synchronize_idle_domain", |b| {
        let domain = RcuDomain::new();
        b.iter(|| domain.synchronize())
    });

    c.bench_function("qsbr/synchronize_batched_16", |b| {
        let domain = RcuDomain::new();
        b.iter(|| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let domain = Arc::clone(&domain);
                    std::thread::spawn(move || domain.synchronize())
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        })
    });
}

criterion_group!(
    benches,
    bench_hpref_read_side,
    bench_hpref_synchronize,
    bench_qsbr
);
criterion_main!(benches);
