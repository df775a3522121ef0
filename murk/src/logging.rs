//! Logging setup (spec §7): `log` + `env_logger`, gated by `-v`/`RUST_LOG`.
//! `--debug` additionally unmasks obfuscated names in log output, mirroring
//! spec.md §7's "avoid leaking obfuscated names unless -debug is on".

use std::sync::atomic::{AtomicBool, Ordering};

static UNMASK_NAMES: AtomicBool = AtomicBool::new(false);

/// Sets up `env_logger`. `verbose` is the `-v` repeat count; `RUST_LOG`
/// overrides it entirely when present, matching how the rest of the
/// ecosystem layers verbosity flags on top of `env_logger`.
pub fn init(verbose: u8, debug: bool) {
    UNMASK_NAMES.store(debug, Ordering::Relaxed);

    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

/// Masks an obfuscated identifier for log output unless `--debug` is set,
/// so routine build logs don't become a side channel for recovering the
/// obfuscated→original mapping.
pub fn mask_name(name: &str) -> String {
    if UNMASK_NAMES.load(Ordering::Relaxed) {
        name.to_string()
    } else {
        "<redacted>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_by_default() {
        UNMASK_NAMES.store(false, Ordering::Relaxed);
        assert_eq!(mask_name("q1w2e3r4"), "<redacted>");
    }

    #[test]
    fn unmasks_under_debug() {
        UNMASK_NAMES.store(true, Ordering::Relaxed);
        assert_eq!(mask_name("q1w2e3r4"), "q1w2e3r4");
        UNMASK_NAMES.store(false, Ordering::Relaxed);
    }
}
