//! Tuning constants, generated by `build.rs` from an optional
//! `tuning.toml` (override the path with `RSMR_TUNING`).

include!(concat!(env!("OUT_DIR"), "/tuning_gen.rs"));
