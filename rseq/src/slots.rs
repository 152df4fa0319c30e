//! Restartable hazard-slot compare-store (x86_64).
//!
//! A slot bank is a per-CPU array of pointer-sized cells laid out at
//! `banks + (cpu << bank_shift)`. The only mutation a thread may perform
//! on its own CPU's bank through this module is NULL -> value: the
//! critical section reads the live `cpu_id`, locates the slot, tests it
//! for zero and commits a single pointer-sized store.
//!
//! Preemption, signal delivery or CPU migration inside the critical
//! section aborts the attempt before the commit, so a store can never
//! land in a bank the thread has migrated away from. The caller just
//! retries; the CPU refresh is implicit in the next attempt.
//!
//! # Abort handler contract
//!
//! Every abort label must be preceded by the 4-byte `RSEQ_SIG` signature
//! (`0x53053053`). On x86_64 this encodes as `ud1 %edi, %eax`, a
//! guaranteed-illegal instruction that provides control-flow integrity.

use core::arch::asm;

use crate::abi::{RSEQ_OFF_CPU_ID, RSEQ_OFF_RSEQ_CS, Rseq};

/// Outcome of a restartable slot store attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTrySet {
    /// The store committed on the bank of the returned CPU.
    Committed { cpu: u32 },
    /// The slot already holds a non-zero value. Try another slot.
    Busy,
    /// The critical section was aborted (preemption, signal, or
    /// migration). Retry the same slot.
    Aborted,
}

/// Store `new` into the slot at byte offset `slot_off` of the current
/// CPU's bank, provided the slot currently holds zero.
///
/// `banks` is the base of a contiguous region holding one `2^bank_shift`
/// byte bank per CPU; `slot_off` must be 8-aligned and within the bank.
///
/// # Safety
///
/// - `rseq` must be a valid, registered rseq pointer for the current thread.
/// - `banks` must cover `num_possible_cpus << bank_shift` bytes of
///   writable memory for the slab's lifetime.
#[inline(never)]
pub unsafe fn slot_try_set(
    rseq: *mut Rseq,
    banks: *mut u8,
    bank_shift: u32,
    slot_off: u64,
    new: usize,
) -> SlotTrySet {
    let cpu: u64;
    let success: u64;

    unsafe {
        asm!(
            // rseq_cs descriptor in a relocatable data section.
            ".pushsection __rseq_cs, \"aw\"",
            ".balign 32",
            "77:",
            ".long 0",                     // version
            ".long 0",                     // flags
            ".quad 3f",                    // start_ip
            ".quad (4f - 3f)",             // post_commit_offset
            ".quad 6f",                    // abort_ip
            ".popsection",

            "lea {tmp}, [rip + 77b]",
            "mov qword ptr [{rseq} + {rseq_cs_off}], {tmp}",

            // ── start of critical section ────────────────────────
            "3:",

            // Read cpu_id, compute slot address = banks + (cpu << shift) + off
            "mov {cpu:e}, dword ptr [{rseq} + {cpu_id_off}]",
            "mov {addr}, {cpu}",
            "shl {addr}, cl",
            "add {addr}, {banks}",
            "add {addr}, {slot_off}",

            // Occupied check: slot != 0
            "mov {cur}, qword ptr [{addr}]",
            "test {cur}, {cur}",
            "jnz 7f",

            // COMMIT: single pointer-sized store
            "mov qword ptr [{addr}], {new}",
            "4:",

            // ── post-commit cleanup ──────────────────────────────
            "mov qword ptr [{rseq} + {rseq_cs_off}], 0",
            "mov {succ}, 1",
            "jmp 5f",

            // ── busy: slot holds another hazard pointer ──────────
            "7:",
            "mov qword ptr [{rseq} + {rseq_cs_off}], 0",
            "mov {succ}, 2",
            "jmp 5f",

            // ── abort handler ────────────────────────────────────
            ".long 0x53053053",
            "6:",
            "mov qword ptr [{rseq} + {rseq_cs_off}], 0",
            "xor {succ:e}, {succ:e}",

            "5:",

            rseq = in(reg) rseq,
            banks = in(reg) banks as u64,
            in("rcx") bank_shift as u64,
            slot_off = in(reg) slot_off,
            new = in(reg) new as u64,
            cpu = out(reg) cpu,
            addr = out(reg) _,
            cur = out(reg) _,
            succ = out(reg) success,
            tmp = out(reg) _,
            rseq_cs_off = const RSEQ_OFF_RSEQ_CS,
            cpu_id_off = const RSEQ_OFF_CPU_ID,
            options(nostack),
        );
    }

    match success {
        1 => SlotTrySet::Committed { cpu: cpu as u32 },
        2 => SlotTrySet::Busy,
        _ => SlotTrySet::Aborted,
    }
}
