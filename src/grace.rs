//! Grace periods: the QSBR writer side.
//!
//! Callers are batched through the domain's wait queue: the caller that
//! finds the queue empty leads and executes the grace period under
//! `gp_lock`; everyone else parks on a stack node until the leader's
//! wake. The leader classifies readers in two waits bracketing the
//! counter flip, sleeping on the domain futex once spinning stops
//! paying off.

use core::sync::atomic::{Ordering, fence};

use crate::domain::{GP_CTR, Gp, RcuDomain, Registry};
use crate::platform;
use crate::qsbr::{Reader, ReaderTls};
use crate::stat_inc;
use crate::tuning::QS_ACTIVE_ATTEMPTS;
use crate::waitqueue::{self, Waiter};

/// Reader classification against the current grace-period counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    /// Offline: not participating.
    Inactive,
    /// Online and has observed the current counter.
    Current,
    /// Online with a stale counter: the grace period waits on it.
    Old,
}

fn reader_state(gp: &Gp, tls: &ReaderTls) -> ReaderState {
    let v = tls.ctr.load(Ordering::Relaxed);
    if v == 0 {
        ReaderState::Inactive
    } else if v == gp.ctr.load(Ordering::Relaxed) {
        ReaderState::Current
    } else {
        ReaderState::Old
    }
}

/// Reader-side wake of a sleeping grace-period leader. Called after
/// every quiescent-state or offline transition; the preceding full
/// fence orders the reader's counter store before the futex read.
pub(crate) fn wake_up_gp(gp: &Gp) {
    if gp.futex.load(Ordering::Relaxed) == -1
        && gp
            .futex
            .compare_exchange(-1, 0, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    {
        platform::futex_wake(&gp.futex, 1);
    }
}

/// Wait for a grace period on `domain`, batching with concurrent
/// callers. `reader`, when given and online, is taken offline for the
/// duration so the caller never waits on itself.
pub(crate) fn synchronize(domain: &RcuDomain, reader: Option<&Reader>) {
    let online_reader = reader.filter(|r| r.ongoing());
    if let Some(r) = online_reader {
        r.offline();
    }

    let waiter = Waiter::new();
    if !domain.waiters.push(&waiter) {
        // Someone else leads; our pre-enqueue stores are covered by the
        // barrier the leader issues after draining the queue.
        stat_inc!(gp_batched);
        waiter.wait();
    } else {
        let gp_guard = domain.gp_lock.lock();
        let batch = domain.waiters.take_all();

        do_grace_period(domain);

        drop(gp_guard);
        // The batch includes our own node; waking it is a no-op.
        unsafe { waitqueue::wake_all(batch) };
    }

    if let Some(r) = online_reader {
        r.online();
    }
}

/// The leader path. `gp_lock` is held.
fn do_grace_period(domain: &RcuDomain) {
    // Orders the batch's prior unpublish stores before reader TLS reads;
    // pairs with the readers' quiescent-state fences.
    platform::broadcast_barrier();

    // First wait: flush readers still carrying a counter from an older
    // grace period. Readers already at the current counter are set
    // aside — with a narrow counter they could otherwise alias a
    // wrapped value and be missed after the flip.
    wait_for_readers(domain, WaitPhase::Snapshot);

    // Parity flip. gp_lock serializes writers, so load+store is race-free.
    fence(Ordering::SeqCst);
    let ctr = domain.gp.ctr.load(Ordering::Relaxed);
    domain.gp.ctr.store(ctr.wrapping_add(GP_CTR), Ordering::Relaxed);
    fence(Ordering::SeqCst);

    // Second wait: everyone online at the flip must now report a
    // quiescent state or go offline.
    wait_for_readers(domain, WaitPhase::Final);

    {
        let mut reg = domain.registry.lock();
        debug_assert!(reg.cur_snap.is_empty());
        let qs = core::mem::take(&mut reg.qs);
        reg.readers.extend(qs);
    }

    platform::broadcast_barrier();
    stat_inc!(gp_count);
    log::trace!("grace period complete");
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WaitPhase {
    /// Input: the registry. Current readers move to `cur_snap`,
    /// inactive ones to `qs`; wait until no old reader remains.
    Snapshot,
    /// Input: `cur_snap` (now stale after the flip). Readers move to
    /// `qs` as they catch up or go offline.
    Final,
}

fn wait_for_readers(domain: &RcuDomain, phase: WaitPhase) {
    let mut wait_loops: u32 = 0;
    loop {
        wait_loops = wait_loops.saturating_add(1);
        let use_futex = wait_loops >= QS_ACTIVE_ATTEMPTS;
        {
            let mut reg = domain.registry.lock();
            if use_futex {
                domain.gp.futex.store(-1, Ordering::Relaxed);
                // Write the futex before reading reader state, so a
                // reader that transitions right now cannot miss it.
                platform::broadcast_barrier();
            }
            if classify(&mut reg, &domain.gp, phase) {
                if use_futex {
                    domain.gp.futex.store(0, Ordering::Relaxed);
                }
                return;
            }
        } // sporadic release: let registration make progress

        if use_futex {
            stat_inc!(gp_futex_sleep);
            wait_gp(&domain.gp);
        } else {
            core::hint::spin_loop();
        }
    }
}

/// Move every reader of the phase's input list that is no longer "old"
/// to its destination. Returns true when the input list drained.
fn classify(reg: &mut Registry, gp: &Gp, phase: WaitPhase) -> bool {
    match phase {
        WaitPhase::Snapshot => {
            let mut i = 0;
            while i < reg.readers.len() {
                let tls = reg.readers[i];
                match reader_state(gp, unsafe { tls.as_ref() }) {
                    ReaderState::Current => {
                        reg.readers.swap_remove(i);
                        reg.cur_snap.push(tls);
                    }
                    ReaderState::Inactive => {
                        reg.readers.swap_remove(i);
                        reg.qs.push(tls);
                    }
                    ReaderState::Old => i += 1,
                }
            }
            reg.readers.is_empty()
        }
        WaitPhase::Final => {
            let mut i = 0;
            while i < reg.cur_snap.len() {
                let tls = reg.cur_snap[i];
                match reader_state(gp, unsafe { tls.as_ref() }) {
                    ReaderState::Current | ReaderState::Inactive => {
                        reg.cur_snap.swap_remove(i);
                        reg.qs.push(tls);
                    }
                    ReaderState::Old => i += 1,
                }
            }
            reg.cur_snap.is_empty()
        }
    }
}

/// Sleep until a reader's wake. The writer never reads the futex
/// without a broadcast barrier first, so a wake cannot be missed.
fn wait_gp(gp: &Gp) {
    platform::broadcast_barrier();
    if gp.futex.load(Ordering::Relaxed) != -1 {
        return;
    }
    platform::futex_wait(&gp.futex, -1);
}
