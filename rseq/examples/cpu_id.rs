//! Example: rseq per-CPU ID reading and restartable slot stores.
//!
//! Run with:
//!   cargo run -p rseq --features nightly --example cpu_id

use rseq::{RseqLocal, SlotTrySet, slot_try_set};

thread_local! {
    static RSEQ: RseqLocal = RseqLocal::new();
}

/// Slots per CPU bank.
const SLOTS: usize = 8;

/// Per-CPU bank size: 8 slots x 8 bytes = 64 bytes (2^6).
const SHIFT: u32 = 6;

fn main() {
    println!("rseq example");
    println!("============\n");

    // ── 1. Read CPU IDs ──────────────────────────────────────────────

    let cpu = RSEQ.with(|r| r.cpu_id());
    match cpu {
        Some(cpu) => println!("[main] cpu_id = {cpu}"),
        None => {
            println!("[main] rseq unavailable (kernel too old or not Linux x86_64).");
            return;
        }
    }

    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                RSEQ.with(|r| match r.cpu_id() {
                    Some(cpu) => println!("[thread {i}] cpu_id = {cpu}"),
                    None => println!("[thread {i}] rseq unavailable"),
                });
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    // Show cpu_id can change between reads (OS may migrate us).
    print!("\ncpu_id x10:");
    RSEQ.with(|r| {
        for _ in 0..10 {
            match r.cpu_id() {
                Some(cpu) => print!(" {cpu}"),
                None => print!(" ?"),
            }
        }
    });
    println!();

    // ── 2. Restartable slot stores ───────────────────────────────────

    println!("\nslot_try_set demo (per-CPU hazard-slot banks):");

    let num_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    // Allocate backing memory (normally you'd use mmap); one 64-byte
    // bank of 8 slots per CPU, all slots initially zero.
    let mut region = vec![0u64; num_cpus * SLOTS];
    let banks = region.as_mut_ptr() as *mut u8;

    RSEQ.with(|r| {
        let rseq_ptr = r.rseq_ptr().expect("rseq available");

        // Claim slot 0 of whatever bank we are currently running on.
        let cpu = loop {
            match unsafe { slot_try_set(rseq_ptr, banks, SHIFT, 0, 0xdead_beef) } {
                SlotTrySet::Committed { cpu } => break cpu,
                SlotTrySet::Busy => unreachable!("slot 0 starts empty"),
                SlotTrySet::Aborted => continue, // migrated/preempted: retry
            }
        };
        println!("  claimed slot 0 on cpu {cpu}");

        // A second store to the same slot on the same CPU must report Busy
        // (unless we migrated to a different CPU in between).
        match unsafe { slot_try_set(rseq_ptr, banks, SHIFT, 0, 0xfeed_face) } {
            SlotTrySet::Committed { cpu: other } => {
                println!("  second store landed on cpu {other} (migrated)")
            }
            SlotTrySet::Busy => println!("  second store on cpu {cpu}: Busy (correct)"),
            SlotTrySet::Aborted => println!("  second store aborted (preempted)"),
        }
    });

    println!("\nDone.");
}
