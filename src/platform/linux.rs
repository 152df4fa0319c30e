//! Linux implementation: membarrier(2), futex(2), sched_getcpu, mmap.
//!
//! Syscalls without a dedicated libc wrapper go through `syscall(2)`;
//! the rest use the glibc entry points directly.

use core::ffi::{c_long, c_void};
use core::sync::atomic::AtomicI32;

const SYS_FUTEX: c_long = 202;
const SYS_MEMBARRIER: c_long = 324;

const FUTEX_WAIT: i32 = 0;
const FUTEX_WAKE: i32 = 1;
const FUTEX_PRIVATE_FLAG: i32 = 128;

const MEMBARRIER_CMD_PRIVATE_EXPEDITED: i32 = 1 << 3;
const MEMBARRIER_CMD_REGISTER_PRIVATE_EXPEDITED: i32 = 1 << 4;

const PROT_READ: i32 = 0x1;
const PROT_WRITE: i32 = 0x2;
const MAP_PRIVATE: i32 = 0x02;
const MAP_ANONYMOUS: i32 = 0x20;
const MAP_FAILED: *mut c_void = !0usize as *mut c_void;

/// `_SC_NPROCESSORS_CONF` on Linux.
const _SC_NPROCESSORS_CONF: i32 = 83;

unsafe extern "C" {
    fn syscall(num: c_long, ...) -> c_long;
    fn sched_getcpu() -> i32;
    fn sysconf(name: i32) -> isize;

    fn mmap(
        addr: *mut c_void,
        length: usize,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: i64,
    ) -> *mut c_void;

    fn munmap(addr: *mut c_void, length: usize) -> i32;
}

pub fn nr_cpus() -> usize {
    let n = unsafe { sysconf(_SC_NPROCESSORS_CONF) };
    if n < 1 { 1 } else { n as usize }
}

pub fn current_cpu() -> usize {
    #[cfg(feature = "percpu")]
    if let Some(cpu) = rseq::current_cpu() {
        return cpu as usize;
    }
    let cpu = unsafe { sched_getcpu() };
    if cpu < 0 { 0 } else { cpu as usize }
}

/// Register this process for expedited private membarriers.
/// Returns false when the kernel lacks the command (< 4.14).
pub fn membarrier_register() -> bool {
    let ret = unsafe { syscall(SYS_MEMBARRIER, MEMBARRIER_CMD_REGISTER_PRIVATE_EXPEDITED, 0) };
    ret == 0
}

/// Full memory fence on every CPU running a thread of this process.
/// Only valid after a successful [`membarrier_register`].
pub fn membarrier_expedited() {
    let ret = unsafe { syscall(SYS_MEMBARRIER, MEMBARRIER_CMD_PRIVATE_EXPEDITED, 0) };
    // Registration succeeded earlier, so the command cannot fail other
    // than by kernel bug; a silent skip here would break reader fences.
    assert_eq!(ret, 0, "membarrier(PRIVATE_EXPEDITED) failed");
}

pub fn futex_wait(futex: &AtomicI32, expected: i32) {
    // EAGAIN (value changed) and EINTR both mean "re-check and retry",
    // which the caller's loop already does.
    unsafe {
        syscall(
            SYS_FUTEX,
            futex.as_ptr(),
            FUTEX_WAIT | FUTEX_PRIVATE_FLAG,
            expected,
            core::ptr::null::<c_void>(),
        );
    }
}

pub fn futex_wake(futex: &AtomicI32, n: i32) {
    unsafe {
        syscall(SYS_FUTEX, futex.as_ptr(), FUTEX_WAKE | FUTEX_PRIVATE_FLAG, n);
    }
}

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    let raw = unsafe {
        mmap(
            core::ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == MAP_FAILED {
        return core::ptr::null_mut();
    }
    raw as *mut u8
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    unsafe {
        munmap(ptr as *mut c_void, size);
    }
}
