//! Keep-list policy: names that must keep their original spelling,
//! independent of reflection analysis (spec §4.1 "Keep-list").
//!
//! Reflection-observed names (spec §4.4) are *not* decided here -- they
//! depend on a per-crate analysis entry that `murk-analyze` computes, and
//! are consulted directly by `murk-transform`'s rewrite pass. This module
//! only covers the policy that can be decided from a name and its crate
//! context alone.

/// Crates that are part of the toolchain's sysroot, or otherwise privileged
/// the way spec.md's `runtime`, `reflect`, `embed`, `syscall` are: murk never
/// rewrites identifiers belonging to these, because their ABI is fixed by
/// the toolchain rather than by the obfuscated build.
pub const SYSROOT_CRATES: &[&str] = &[
    "core",
    "std",
    "alloc",
    "proc_macro",
    "test",
    "panic_abort",
    "panic_unwind",
    "unwind",
    "compiler_builtins",
];

pub fn is_sysroot_crate(name: &str) -> bool {
    SYSROOT_CRATES.contains(&name)
}

/// Function names reached by fixed convention that must never be renamed:
/// the crate-root `main`, module `init` (build-script/ctor convention), and
/// the standard `#[test]` entry-point shape checked separately by
/// [`is_test_entry_point`].
pub fn is_fixed_entry_name(name: &str) -> bool {
    matches!(name, "main" | "init")
}

/// Mirrors spec.md's "test entry points whose signature matches the
/// single-parameter test function form": in Rust, `#[test]` functions take
/// no parameters, but `TestMain`-shaped wiring (custom test harnesses) and
/// `#[tokio::test]`/`#[async_std::test]` wrappers take zero parameters too,
/// so the signature check is "zero parameters, returns `()` or
/// `-> Result<(), E>`"; callers pass that pre-computed boolean in along with
/// the attribute check.
pub fn is_test_attribute(path_segments: &[String]) -> bool {
    matches!(
        path_segments.last().map(|s| s.as_str()),
        Some("test") | Some("bench")
    )
}

/// Names with a leading `..` substring, or `main::main`-shaped special
/// linker-reached names, are kept exactly as spec.md §4.1's "small set of
/// special names reached by the linker".
pub fn is_linker_special(name: &str) -> bool {
    name.contains("..") || name == "main" || name.starts_with("_start")
}

/// A small, enumerated set of "compiler intrinsic" crates whose items are
/// matched by path the way the Go toolchain treats some packages as
/// compiler intrinsics (e.g. the panic machinery `std` calls into that
/// must keep their stable names for the panic/unwind ABI to work).
pub fn is_compiler_intrinsic_crate(name: &str) -> bool {
    is_sysroot_crate(name) || name == "libc"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysroot_crates_recognized() {
        assert!(is_sysroot_crate("core"));
        assert!(is_sysroot_crate("std"));
        assert!(!is_sysroot_crate("serde"));
    }

    #[test]
    fn fixed_entry_names() {
        assert!(is_fixed_entry_name("main"));
        assert!(is_fixed_entry_name("init"));
        assert!(!is_fixed_entry_name("run"));
    }

    #[test]
    fn linker_special_names() {
        assert!(is_linker_special("main"));
        assert!(is_linker_special("foo..bar"));
        assert!(!is_linker_special("regular_name"));
    }
}
