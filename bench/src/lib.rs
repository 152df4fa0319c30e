//! Benchmark-only crate; see `benches/smr_bench.rs`.
