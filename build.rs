use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    tuning: TuningSection,
}

#[derive(Deserialize, Default)]
struct TuningSection {
    slots_per_bank: Option<usize>,
    qs_active_attempts: Option<u32>,
    wait_attempts: Option<u32>,
}

struct ResolvedTuning {
    slots_per_bank: usize,
    qs_active_attempts: u32,
    wait_attempts: u32,
}

fn resolve(cfg: &TuningSection) -> ResolvedTuning {
    let slots_per_bank = cfg.slots_per_bank.unwrap_or(8);
    assert!(
        slots_per_bank.is_power_of_two(),
        "slots_per_bank ({}) must be a power of 2",
        slots_per_bank
    );
    assert!(
        (2..=64).contains(&slots_per_bank),
        "slots_per_bank ({}) must be in 2..=64",
        slots_per_bank
    );

    let qs_active_attempts = cfg.qs_active_attempts.unwrap_or(64);
    assert!(qs_active_attempts > 0, "qs_active_attempts must be > 0");

    let wait_attempts = cfg.wait_attempts.unwrap_or(256);
    assert!(wait_attempts > 0, "wait_attempts must be > 0");

    ResolvedTuning {
        slots_per_bank,
        qs_active_attempts,
        wait_attempts,
    }
}

fn generate(t: &ResolvedTuning, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         /// Hazard slots per CPU bank, including the emergency slot.\n\
         pub const SLOTS_PER_BANK: usize = {};\n\n\
         /// Spin passes over the reader registry before a grace period\n\
         /// arms the futex and sleeps.\n\
         pub const QS_ACTIVE_ATTEMPTS: u32 = {};\n\n\
         /// Spin iterations a batched grace-period waiter burns before\n\
         /// parking on its own wait node.\n\
         pub const WAIT_ATTEMPTS: u32 = {};\n",
        t.slots_per_bank, t.qs_active_attempts, t.wait_attempts
    );
    fs::write(out_path, code).expect("failed to write tuning_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=RSMR_TUNING");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("RSMR_TUNING").unwrap_or_else(|_| "tuning.toml".to_string());
    println!("cargo:rerun-if-changed={}", config_path);

    // The tuning file is optional; absent means defaults.
    let config: Config = match fs::read_to_string(&config_path) {
        Ok(content) => toml::from_str(&content).expect("failed to parse TOML tuning config"),
        Err(_) => Config::default(),
    };

    let resolved = resolve(&config.tuning);
    generate(&resolved, &Path::new(&out_dir).join("tuning_gen.rs"));
}
