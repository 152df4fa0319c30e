//! RCU domains: per-domain grace-period state and reader registry.
//!
//! A domain is an independent RCU namespace — grace periods of two
//! domains never serialize with each other. `gp_lock` serializes grace
//! periods within the domain; the registry mutex protects the reader
//! lists and is released sporadically inside the grace-period wait loop
//! so registration keeps making progress.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::grace;
use crate::qsbr::{Reader, ReaderTls};
use crate::sync::Mutex;
use crate::waitqueue::WaitQueue;

/// Bit 0 of the grace-period counter: keeps every online value non-zero.
pub(crate) const GP_ONLINE: usize = 1;

/// Counter increment per grace period; bit 1 doubles as the phase bit.
pub(crate) const GP_CTR: usize = 2;

/// Grace-period counter and the futex grace-period leaders sleep on.
pub(crate) struct Gp {
    pub ctr: AtomicUsize,
    pub futex: AtomicI32,
}

/// Reader lists, all under the registry mutex. Handles are heap
/// pointers with stable identities; a reader removes itself from
/// whichever list currently holds it when unregistering.
pub(crate) struct Registry {
    /// Registered readers not claimed by the grace period in progress.
    pub readers: Vec<NonNull<ReaderTls>>,
    /// Readers that observed the pre-flip counter; re-examined after
    /// the flip.
    pub cur_snap: Vec<NonNull<ReaderTls>>,
    /// Readers already quiescent for the grace period in progress.
    pub qs: Vec<NonNull<ReaderTls>>,
}

// Safety: the raw reader handles are only dereferenced under the
// registry mutex, and unregistration removes a handle before its
// backing allocation dies.
unsafe impl Send for Registry {}

/// An independently synchronizing RCU namespace.
pub struct RcuDomain {
    pub(crate) gp_lock: Mutex<()>,
    pub(crate) registry: Mutex<Registry>,
    pub(crate) gp: Gp,
    pub(crate) waiters: WaitQueue,
}

impl RcuDomain {
    pub fn new() -> Arc<Self> {
        log::trace!("rcu domain created");
        Arc::new(Self {
            gp_lock: Mutex::new(()),
            registry: Mutex::new(Registry {
                readers: Vec::new(),
                cur_snap: Vec::new(),
                qs: Vec::new(),
            }),
            gp: Gp {
                ctr: AtomicUsize::new(GP_ONLINE),
                futex: AtomicI32::new(0),
            },
            waiters: WaitQueue::new(),
        })
    }

    /// Create an unregistered reader handle bound to this domain.
    pub fn reader(self: &Arc<Self>) -> Reader {
        Reader::new(Arc::clone(self))
    }

    /// Wait for a full grace period. Callers arriving while one is in
    /// flight are batched onto the next. See [`Reader::synchronize`] for
    /// the form that takes the calling reader offline around the wait.
    pub fn synchronize(&self) {
        grace::synchronize(self, None);
    }

    /// Number of grace periods completed so far. Strictly increases
    /// with every [`synchronize`](Self::synchronize) completion.
    pub fn grace_periods(&self) -> usize {
        self.gp.ctr.load(Ordering::Relaxed).wrapping_sub(GP_ONLINE) / GP_CTR
    }

    pub(crate) fn link_reader(&self, tls: NonNull<ReaderTls>) {
        let mut reg = self.registry.lock();
        reg.readers.push(tls);
        // The registered bit mirrors list membership, so it flips under
        // the same lock.
        unsafe { tls.as_ref() }.registered.store(true, Ordering::Relaxed);
    }

    pub(crate) fn unlink_reader(&self, tls: NonNull<ReaderTls>) {
        let mut reg = self.registry.lock();
        let found = remove_handle(&mut reg.readers, tls)
            || remove_handle(&mut reg.cur_snap, tls)
            || remove_handle(&mut reg.qs, tls);
        debug_assert!(found, "unregistering a reader the domain never saw");
        unsafe { tls.as_ref() }.registered.store(false, Ordering::Relaxed);
    }
}

fn remove_handle(list: &mut Vec<NonNull<ReaderTls>>, tls: NonNull<ReaderTls>) -> bool {
    if let Some(i) = list.iter().position(|p| *p == tls) {
        list.swap_remove(i);
        true
    } else {
        false
    }
}

impl Drop for RcuDomain {
    fn drop(&mut self) {
        let reg = self.registry.lock();
        debug_assert!(
            reg.readers.is_empty() && reg.cur_snap.is_empty() && reg.qs.is_empty(),
            "domain destroyed with registered readers"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_domain_counters() {
        let d = RcuDomain::new();
        assert_eq!(d.grace_periods(), 0);
        assert_eq!(d.gp.ctr.load(Ordering::Relaxed), GP_ONLINE);
        assert_eq!(d.gp.futex.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_synchronize_without_readers() {
        let d = RcuDomain::new();
        d.synchronize();
        d.synchronize();
        assert_eq!(d.grace_periods(), 2);
    }

    #[test]
    fn test_domains_are_independent() {
        let a = RcuDomain::new();
        let b = RcuDomain::new();
        let reader = b.reader();
        reader.register();
        // A reader stuck in domain b does not affect domain a.
        a.synchronize();
        assert_eq!(a.grace_periods(), 1);
        assert_eq!(b.grace_periods(), 0);
    }
}
