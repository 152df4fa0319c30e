//! Stack-allocated wait nodes and the lock-free queue that batches
//! grace-period callers.
//!
//! Every synchronize caller pushes a node; the pusher that found the
//! queue empty leads the grace period for the whole batch. The others
//! spin briefly, then park on a futex keyed to their own node.
//!
//! Nodes live on the waiter's stack, so waking is a handshake: the
//! waker stores WAKEUP (futex-waking unless the waiter advertised
//! RUNNING), and only after setting TEARDOWN may the waiter return and
//! pop its frame. The waker never touches the node after TEARDOWN.

use core::ptr;
use core::sync::atomic::{AtomicI32, AtomicPtr, Ordering, fence};

use crate::platform;
use crate::tuning::WAIT_ATTEMPTS;

const WAITING: i32 = 0;
const WAKEUP: i32 = 1;
const RUNNING: i32 = 2;
const TEARDOWN: i32 = 4;

/// One parked synchronize caller.
pub struct Waiter {
    state: AtomicI32,
    next: AtomicPtr<Waiter>,
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            state: AtomicI32::new(WAITING),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Park until a leader completes a grace period on our behalf.
    /// Returns only after the waker's TEARDOWN, when the node may be
    /// dropped.
    pub fn wait(&self) {
        for _ in 0..WAIT_ATTEMPTS {
            if self.state.load(Ordering::Acquire) != WAITING {
                break;
            }
            core::hint::spin_loop();
        }
        while self.state.load(Ordering::Acquire) == WAITING {
            platform::futex_wait(&self.state, WAITING);
        }

        // Tell the waker we are running, then wait for leave to free
        // the stack frame.
        self.state.fetch_or(RUNNING, Ordering::AcqRel);
        while (self.state.load(Ordering::Acquire) & TEARDOWN) == 0 {
            core::hint::spin_loop();
        }
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Release one waiter. The node must not be touched afterwards.
///
/// # Safety
///
/// `waiter` must point to a live node obtained from [`WaitQueue::take_all`]
/// whose owner is inside [`Waiter::wait`] or about to enter it.
unsafe fn wake_one(waiter: &Waiter) {
    // Order the grace period's effects before the waiter resumes.
    fence(Ordering::SeqCst);
    waiter.state.store(WAKEUP, Ordering::Release);
    if (waiter.state.load(Ordering::Relaxed) & RUNNING) == 0 {
        platform::futex_wake(&waiter.state, 1);
    }
    waiter.state.fetch_or(TEARDOWN, Ordering::Release);
}

/// Release every waiter of a batch taken with [`WaitQueue::take_all`].
///
/// # Safety
///
/// As [`wake_one`], for every node on the list.
pub unsafe fn wake_all(mut head: *mut Waiter) {
    while !head.is_null() {
        // Read the link before TEARDOWN lets the node die.
        let next = unsafe { (*head).next.load(Ordering::Relaxed) };
        unsafe { wake_one(&*head) };
        head = next;
    }
}

/// Lock-free LIFO of pending synchronize callers.
pub struct WaitQueue {
    head: AtomicPtr<Waiter>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Enqueue `waiter`. Returns `true` when the queue was empty, making
    /// the caller the leader of the next batch.
    pub fn push(&self, waiter: &Waiter) -> bool {
        let node = waiter as *const Waiter as *mut Waiter;
        loop {
            let head = self.head.load(Ordering::Relaxed);
            waiter.next.store(head, Ordering::Relaxed);
            if self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return head.is_null();
            }
        }
    }

    /// Detach the whole batch. Future pushers start a new batch (and the
    /// first of them leads it).
    pub fn take_all(&self) -> *mut Waiter {
        self.head.swap(ptr::null_mut(), Ordering::Acquire)
    }
}
