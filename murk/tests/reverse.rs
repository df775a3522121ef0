//! Integration coverage for `murk reverse`, exercised against the real
//! compiled binary via `assert_cmd`. Unlike `build`/`test`/`run`, `reverse`
//! never shells out to `cargo`/`rustc`, so it is the one subcommand this
//! crate can cover end-to-end without a toolchain in the test environment.

use std::io::Write;

use assert_cmd::Command;
use murk_core::action_id::ActionId;
use murk_core::cache::{AnalysisCache, AnalysisEntry};
use murk_core::reverse_meta::{self, ReverseMeta};
use predicates::str::contains;

fn seed_cache(cache_root: &std::path::Path, main_crate: &str) -> ActionId {
    let action_id = ActionId([9u8; 32]);
    let cache = AnalysisCache::new(cache_root.to_path_buf()).unwrap();
    let mut entry = AnalysisEntry::seed();
    entry
        .renamed_idents
        .insert("a1b2c3d4".to_string(), "run_server".to_string());
    cache.store(&action_id, &entry).unwrap();

    reverse_meta::write(
        cache_root,
        &ReverseMeta {
            import_path: main_crate.to_string(),
            action_id,
            dependency_action_ids: Vec::new(),
        },
    )
    .unwrap();
    action_id
}

#[test]
fn reverses_known_identifiers_from_a_file() {
    let cache_dir = tempfile::tempdir().unwrap();
    seed_cache(cache_dir.path(), "demo::main");

    let mut input = tempfile::NamedTempFile::new().unwrap();
    writeln!(input, "thread panicked in a1b2c3d4 at <redacted>").unwrap();

    Command::cargo_bin("murk")
        .unwrap()
        .env("MURK_CACHE", cache_dir.path())
        .args(["reverse", "demo::main"])
        .arg(input.path())
        .assert()
        .success()
        .stdout(contains("run_server (a1b2c3d4)"));
}

#[test]
fn reads_from_stdin_when_no_files_given() {
    let cache_dir = tempfile::tempdir().unwrap();
    seed_cache(cache_dir.path(), "demo::main");

    Command::cargo_bin("murk")
        .unwrap()
        .env("MURK_CACHE", cache_dir.path())
        .args(["reverse", "demo::main"])
        .write_stdin("panic in a1b2c3d4\n")
        .assert()
        .success()
        .stdout(contains("run_server (a1b2c3d4)"));
}

#[test]
fn unknown_main_crate_is_a_usage_error() {
    let cache_dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("murk")
        .unwrap()
        .env("MURK_CACHE", cache_dir.path())
        .args(["reverse", "nonexistent::main"])
        .write_stdin("")
        .assert()
        .failure()
        .code(2);
}
