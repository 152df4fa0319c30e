//! Quiescent-state-based RCU read side.
//!
//! A reader's whole state is one word: 0 while offline, otherwise the
//! grace-period counter value it last observed. Read-side critical
//! sections are free — `read_lock`/`read_unlock` only assert the thread
//! is online — and the reader's end of the contract is to report a
//! quiescent state often enough, or go offline while idle.
//!
//! The fence schedule is asymmetric with the writer: counter stores are
//! bracketed by full fences here, while writers read the counters
//! relaxed under their broadcast barriers.

use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering, compiler_fence, fence};

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::domain::RcuDomain;
use crate::grace;
use crate::stat_inc;

/// Per-reader record, linked into the domain registry while registered.
pub struct ReaderTls {
    /// 0 = offline; otherwise the last observed grace-period counter.
    pub(crate) ctr: AtomicUsize,
    /// Mirrors registry membership; flipped under the registry lock.
    pub(crate) registered: AtomicBool,
}

/// A reader's handle on a domain.
///
/// The handle may move between threads, but all read-side operations
/// must come from the thread currently owning it (it is deliberately
/// not `Sync`). Dropping the handle unregisters it if needed.
pub struct Reader {
    tls: NonNull<ReaderTls>,
    domain: Arc<RcuDomain>,
    /// Read-side operations are single-threaded by contract.
    _not_sync: PhantomData<core::cell::Cell<()>>,
}

// Safety: the record is heap-allocated and the domain is kept alive by
// the Arc, so the handle may migrate to another thread wholesale.
unsafe impl Send for Reader {}

impl Reader {
    pub(crate) fn new(domain: Arc<RcuDomain>) -> Self {
        let tls = Box::new(ReaderTls {
            ctr: AtomicUsize::new(0),
            registered: AtomicBool::new(false),
        });
        Self {
            tls: NonNull::from(Box::leak(tls)),
            domain,
            _not_sync: PhantomData,
        }
    }

    #[inline]
    fn tls(&self) -> &ReaderTls {
        unsafe { self.tls.as_ref() }
    }

    /// The domain this reader participates in.
    pub fn domain(&self) -> &Arc<RcuDomain> {
        &self.domain
    }

    /// Whether the reader is currently registered.
    pub fn is_registered(&self) -> bool {
        self.tls().registered.load(Ordering::Relaxed)
    }

    /// Link into the domain registry and go online.
    pub fn register(&self) {
        debug_assert!(!self.is_registered(), "reader registered twice");
        debug_assert_eq!(self.tls().ctr.load(Ordering::Relaxed), 0);
        self.domain.link_reader(self.tls);
        stat_inc!(reader_register);
        self.online();
    }

    /// Leave the registry, passing through an implicit quiescent state
    /// (offline) first if needed.
    pub fn unregister(&self) {
        debug_assert!(self.is_registered(), "reader not registered");
        if self.ongoing() {
            self.offline();
        }
        self.domain.unlink_reader(self.tls);
        stat_inc!(reader_unregister);
    }

    /// Begin participating: the reader may now enter read-side critical
    /// sections, and owes the domain quiescent states until offline.
    pub fn online(&self) {
        debug_assert!(self.is_registered(), "online without register");
        debug_assert_eq!(self.tls().ctr.load(Ordering::Relaxed), 0, "already online");
        // Order anything before going online before the first critical
        // section; the counter store itself is ordered by the fence.
        compiler_fence(Ordering::SeqCst);
        self.tls()
            .ctr
            .store(self.domain.gp.ctr.load(Ordering::Relaxed), Ordering::Relaxed);
        fence(Ordering::SeqCst);
    }

    /// Stop participating. An extended quiescent state: grace periods
    /// no longer wait for this reader until [`online`](Self::online).
    pub fn offline(&self) {
        debug_assert!(self.ongoing(), "offline while offline");
        fence(Ordering::SeqCst);
        self.tls().ctr.store(0, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        grace::wake_up_gp(&self.domain.gp);
    }

    /// Announce a quiescent state: no read-side references are held at
    /// this point in the thread's execution.
    pub fn quiescent_state(&self) {
        debug_assert!(self.ongoing(), "quiescent state while offline");
        let gp_ctr = self.domain.gp.ctr.load(Ordering::Relaxed);
        if self.tls().ctr.load(Ordering::Relaxed) == gp_ctr {
            return;
        }
        fence(Ordering::SeqCst);
        self.tls().ctr.store(gp_ctr, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        grace::wake_up_gp(&self.domain.gp);
    }

    /// Enter a read-side critical section. Free in QSBR — the online
    /// state already protects the thread; this only checks usage.
    #[inline]
    pub fn read_lock(&self) {
        debug_assert!(self.ongoing(), "read_lock while offline");
    }

    /// Leave a read-side critical section.
    #[inline]
    pub fn read_unlock(&self) {
        debug_assert!(self.ongoing(), "read_unlock while offline");
    }

    /// Whether the reader is online (between `online` and `offline`).
    #[inline]
    pub fn ongoing(&self) -> bool {
        self.tls().ctr.load(Ordering::Relaxed) != 0
    }

    /// Wait for a grace period on this reader's domain, going offline
    /// around the wait if currently online (a writer never waits on
    /// itself).
    pub fn synchronize(&self) {
        grace::synchronize(&self.domain, Some(self));
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if self.is_registered() {
            self.unregister();
        }
        unsafe { drop(Box::from_raw(self.tls.as_ptr())) };
    }
}
