//! Linux rseq kernel ABI types and constants.
//!
//! Defines the per-thread area shared between userspace and the kernel for
//! restartable sequences (rseq). The layout must match the kernel's exactly.

// ── Syscall ──────────────────────────────────────────────────────────────────

/// rseq syscall number on x86_64.
pub const SYS_RSEQ: u64 = 334;

// ── Registration flags (passed to syscall `flags` parameter) ─────────────────

/// Unregister the current thread's rseq area.
pub const RSEQ_FLAG_UNREGISTER: i32 = 1 << 0;

// ── Signature ────────────────────────────────────────────────────────────────

/// x86_64 rseq abort signature. Must appear as the 4 bytes immediately
/// before every abort handler IP. Encodes as `ud1 %edi, %eax` which is
/// a guaranteed-illegal instruction, providing control-flow integrity.
pub const RSEQ_SIG: u32 = 0x53053053;

// ── CPU ID sentinel values ───────────────────────────────────────────────────

/// cpu_id value before the kernel first schedules the thread.
pub const RSEQ_CPU_ID_UNINITIALIZED: u32 = u32::MAX; // -1 as u32

/// cpu_id value if registration failed.
pub const RSEQ_CPU_ID_REGISTRATION_FAILED: u32 = u32::MAX - 1; // -2 as u32

// ── Struct offsets (for use in inline asm) ───────────────────────────────────

/// Byte offset of `cpu_id` within `struct rseq`.
pub const RSEQ_OFF_CPU_ID: u32 = 4;

/// Byte offset of `rseq_cs` pointer within `struct rseq`.
pub const RSEQ_OFF_RSEQ_CS: u32 = 8;

// ── struct rseq ──────────────────────────────────────────────────────────────

/// Per-thread rseq area shared with the kernel.
///
/// Must be 32-byte aligned. The kernel maintains `cpu_id`, `cpu_id_start`,
/// `node_id`, and `mm_cid` across context switches. Userspace reads
/// `cpu_id` and writes `rseq_cs` to activate a critical section.
#[repr(C, align(32))]
pub struct Rseq {
    /// CPU number at the start of the current critical section.
    /// Always reflects a valid CPU number even outside a critical section.
    pub cpu_id_start: u32,

    /// Current CPU number. Set to `RSEQ_CPU_ID_UNINITIALIZED` before
    /// the first schedule, or `RSEQ_CPU_ID_REGISTRATION_FAILED` if
    /// registration failed.
    pub cpu_id: u32,

    /// Pointer to the active critical-section descriptor, or 0 when no
    /// critical section is active. Userspace stores a pointer here before
    /// entering a critical section; the kernel clears it on abort.
    pub rseq_cs: u64,

    /// Flags controlling restart behavior.
    pub flags: u32,

    /// NUMA node ID (kernel >= 5.17).
    pub node_id: u32,

    /// Memory-map concurrency ID (kernel >= 5.17).
    pub mm_cid: u32,

    /// NUMA-aware memory-map concurrency ID.
    pub mm_numa_cid: u32,
}

/// Minimum size to pass to the rseq syscall for the original ABI (v0).
pub const RSEQ_MIN_SIZE: u32 = 32;

impl Rseq {
    /// Create a zeroed, uninitialized rseq area.
    pub const fn new() -> Self {
        Self {
            cpu_id_start: 0,
            cpu_id: RSEQ_CPU_ID_UNINITIALIZED,
            rseq_cs: 0,
            flags: 0,
            node_id: 0,
            mm_cid: 0,
            mm_numa_cid: 0,
        }
    }
}
