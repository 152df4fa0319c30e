//! Process-wide main RCU domain and domain-less convenience forms.
//!
//! The main domain is created on first use and lives for the process
//! lifetime (there is no teardown path, matching the once-initialized
//! hazard slab).

use core::sync::atomic::{AtomicPtr, Ordering};

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::domain::RcuDomain;
use crate::qsbr::Reader;
use crate::sync::Mutex;

static MAIN: AtomicPtr<Arc<RcuDomain>> = AtomicPtr::new(core::ptr::null_mut());
static MAIN_INIT: Mutex<()> = Mutex::new(());

/// The process-wide main domain.
pub fn main_domain() -> &'static Arc<RcuDomain> {
    let p = MAIN.load(Ordering::Acquire);
    if !p.is_null() {
        return unsafe { &*p };
    }
    init_slow()
}

#[cold]
fn init_slow() -> &'static Arc<RcuDomain> {
    let _guard = MAIN_INIT.lock();
    let p = MAIN.load(Ordering::Acquire);
    if !p.is_null() {
        return unsafe { &*p };
    }
    let raw = Box::into_raw(Box::new(RcuDomain::new()));
    MAIN.store(raw, Ordering::Release);
    unsafe { &*raw }
}

/// A reader handle on the main domain (unregistered).
pub fn reader() -> Reader {
    main_domain().reader()
}

/// Wait for a grace period on the main domain.
pub fn synchronize() {
    main_domain().synchronize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_domain_is_singleton() {
        let a = main_domain() as *const _;
        let b = main_domain() as *const _;
        assert_eq!(a, b);
    }

    #[test]
    fn test_convenience_forms() {
        let r = reader();
        r.register();
        r.offline();
        synchronize();
        r.online();
        r.unregister();
    }
}
