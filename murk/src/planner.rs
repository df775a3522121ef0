//! Tier 1 (spec §2, §4.2): resolves the crate graph, marks the obfuscation
//! set, computes per-crate action ids, serializes the plan, and re-invokes
//! `cargo` with the murk binary wired in as `RUSTC_WRAPPER` and `-C
//! linker=`.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use murk_core::action_id::{self, FlagFingerprint};
use murk_core::error::format_positions;
use murk_core::fingerprint::{self, FingerprintInputs};
use murk_core::plan::{self, MurkFlags, ObfuscationPattern, Plan};
use murk_core::reverse_meta::{self, ReverseMeta};

use crate::cli::BuildArgs;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub enum Mode {
    Build,
    Test,
    Run,
}

impl Mode {
    fn cargo_subcommand(self) -> &'static str {
        match self {
            Mode::Build => "build",
            Mode::Test => "test",
            Mode::Run => "run",
        }
    }
}

/// Runs the full planner and blocks until the re-invoked `cargo` exits,
/// returning its exit code.
pub fn run(mode: Mode, args: &BuildArgs) -> Result<i32> {
    let pattern_raw = args.pattern.clone().unwrap_or_default();
    let pattern = ObfuscationPattern::parse(&pattern_raw);

    let cargo_path = locate_cargo();
    let rustc_version = rustc_version_string(&cargo_path)?;

    let metadata = cargo_metadata::MetadataCommand::new()
        .cargo_path(&cargo_path)
        .exec()?;

    let root_packages: BTreeSet<_> = metadata.workspace_members.iter().cloned().collect();

    let (mut crates, errors) = plan::build_descriptors(&metadata, &pattern, &root_packages)?;
    if !errors.is_empty() {
        return Err(Error::Usage(format_positions(&errors)));
    }
    plan::validate_nonempty(&crates, &pattern)?;

    let murk_binary = current_exe()?;
    let wrapper_digest =
        fingerprint::wrapper_digest(&murk_binary).map_err(murk_core::Error::from)?;

    let user_seed = resolve_seed(args.seed.as_deref());
    let flags = MurkFlags {
        literals: args.literals,
        tiny: args.tiny,
        debug: args.debug,
        debug_dir: args.debugdir.clone(),
        seed: user_seed.clone(),
    };
    let flag_fingerprint = FlagFingerprint {
        literals: args.literals,
        tiny: args.tiny,
        seed: user_seed.clone(),
    };

    // Every non-sysroot crate gets an action id, not only the ones marked
    // `to_obfuscate`: the worker still needs a stable cache key for
    // crates it passes through unmodified (e.g. to look up their analysis
    // entry for downstream reflection propagation).
    for descriptor in crates.values_mut() {
        if descriptor.is_sysroot {
            continue;
        }
        let entry = descriptor
            .source_files
            .first()
            .cloned()
            .ok_or_else(|| Error::Core(murk_core::Error::Internal {
                site: "planner::run",
                message: format!("{} has no entry source file", descriptor.import_path),
            }))?;
        descriptor.source_files = discover_source_files(&entry);
        descriptor.asm_files = discover_asm_includes(&descriptor.source_files);

        let sources = read_sorted_sources(&descriptor.source_files)?;
        let externs: Vec<(String, String)> = descriptor.import_map.clone().into_iter().collect();
        let crate_fingerprint = fingerprint::compute(&FingerprintInputs {
            sources: &sources,
            externs: &externs,
            features: &[],
            rustc_version: &rustc_version,
        });
        descriptor.action_id = Some(action_id::derive_action_id(
            &crate_fingerprint,
            &wrapper_digest,
            pattern.as_str(),
            &flag_fingerprint,
        ));
    }

    let cache_root = resolve_cache_root()?;
    let scratch = tempfile::Builder::new()
        .prefix("murk-")
        .tempdir()
        .map_err(murk_core::Error::from)?;

    let mut plan = Plan {
        crates,
        pattern_raw: pattern_raw.clone(),
        rustc_version,
        cargo_path: cargo_path.clone(),
        cache_root: cache_root.clone(),
        shared_tmp: scratch.path().to_path_buf(),
        flags,
    };
    plan.compute_closures();
    plan.check_invariants()?;
    write_reverse_meta(&cache_root, &plan)?;

    let plan_path = scratch.path().join("plan.murkplan");
    write_plan(&plan_path, &plan)?;

    let linker_wrapper = write_linker_trampoline(scratch.path(), &murk_binary)?;
    let target_dir = scratch.path().join("target");

    let mut cmd = Command::new(&cargo_path);
    cmd.arg(mode.cargo_subcommand());
    cmd.args(&args.targets);
    cmd.env("RUSTC_WRAPPER", &murk_binary);
    cmd.env("MURK_WORKER", "1");
    cmd.env("MURK_PLAN", &plan_path);
    cmd.env("MURK_CACHE", &cache_root);
    cmd.env("CARGO_TARGET_DIR", &target_dir);
    cmd.env("RUSTFLAGS", append_rustflags(&linker_wrapper));
    if let Some(dir) = &args.debugdir {
        cmd.env("MURK_DEBUGDIR", dir);
    }

    log::info!(
        "murk: obfuscating {} of {} crates under pattern {:?}",
        plan.obfuscated_crates().count(),
        plan.crates.len(),
        pattern_raw
    );

    let status = cmd.status().map_err(|e| murk_core::Error::Io(e))?;
    Ok(status.code().unwrap_or(1))
}

fn locate_cargo() -> PathBuf {
    std::env::var_os("CARGO")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("cargo"))
}

fn rustc_version_string(cargo_path: &Path) -> Result<String> {
    let rustc = std::env::var_os("RUSTC").unwrap_or_else(|| "rustc".into());
    let output = Command::new(rustc)
        .arg("-vV")
        .output()
        .map_err(|e| murk_core::Error::Environment(format!("failed to run rustc -vV: {e}")))?;
    if !output.status.success() {
        return Err(Error::Core(murk_core::Error::Environment(
            "rustc -vV exited non-zero".to_string(),
        )));
    }
    let _ = cargo_path;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn current_exe() -> Result<PathBuf> {
    std::env::current_exe().map_err(|e| Error::Core(murk_core::Error::Io(e)))
}

/// Walks the parent directory of a target's entry source file collecting
/// every `.rs` file, as the Rust analog of spec.md's "set of compiled
/// source file paths" (§3). This over-approximates the true module tree
/// (it does not follow `#[path]`/`mod` declarations), which only means a
/// stray unrelated file in the same directory tree gets hashed into the
/// crate's fingerprint -- harmless, since the fingerprint only needs to
/// change when the crate's real inputs do, not to be minimal.
fn discover_source_files(entry: &Path) -> Vec<PathBuf> {
    let root = entry.parent().unwrap_or_else(|| Path::new("."));
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.extension().map(|ext| ext == "rs").unwrap_or(false))
        .collect();
    if !files.iter().any(|f| f == entry) {
        files.push(entry.to_path_buf());
    }
    files.sort();
    files
}

/// Heuristic `.s` file discovery (spec §3's assembly-file set): scans
/// source text for `include_str!("...")` arguments ending in `.s` inside a
/// `global_asm!` call. A true parse happens later in the compiler
/// transform; this pass only needs to be conservative enough to seed the
/// crate descriptor.
fn discover_asm_includes(sources: &[PathBuf]) -> Vec<PathBuf> {
    let re = regex::Regex::new(r#"global_asm!\s*\(\s*include_str!\s*\(\s*"([^"]+\.s)"\s*\)"#).unwrap();
    let mut found = Vec::new();
    for src in sources {
        let Ok(text) = fs::read_to_string(src) else {
            continue;
        };
        let base = src.parent().unwrap_or_else(|| Path::new("."));
        for cap in re.captures_iter(&text) {
            found.push(base.join(&cap[1]));
        }
    }
    found.sort();
    found.dedup();
    found
}

fn read_sorted_sources(paths: &[PathBuf]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read(path).map_err(murk_core::Error::from)?;
        out.push((path.to_string_lossy().into_owned(), content));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Writes the small durable side table `murk reverse` later consults
/// (spec §6): the plan file itself lives in a throwaway scratch directory
/// and is gone once this build finishes.
fn write_reverse_meta(cache_root: &Path, plan: &Plan) -> Result<()> {
    for descriptor in plan.obfuscated_crates() {
        let Some(action_id) = descriptor.action_id else {
            continue;
        };
        let dependency_action_ids = descriptor
            .dependency_closure
            .iter()
            .filter_map(|dep_pkg_id| {
                plan.crates
                    .values()
                    .find(|d| &d.key.package_id == dep_pkg_id && d.to_obfuscate)
            })
            .filter_map(|d| d.action_id)
            .collect();
        let meta = ReverseMeta {
            import_path: descriptor.import_path.clone(),
            action_id,
            dependency_action_ids,
        };
        reverse_meta::write(cache_root, &meta)?;
    }
    Ok(())
}

pub(crate) fn resolve_cache_root() -> Result<PathBuf> {
    if let Some(over) = std::env::var_os("MURK_CACHE") {
        return Ok(PathBuf::from(over));
    }
    let home = home::cargo_home().map_err(|e| murk_core::Error::Environment(e.to_string()))?;
    Ok(home.join("murk-cache"))
}

/// Interprets `--seed`. There is no `base64` crate in the dependency
/// stack, so a literal seed string is hashed as its raw UTF-8 bytes
/// instead of being base64-decoded -- an equally valid arbitrary-bytes
/// seed so long as it is used consistently, and it avoids pulling in a
/// crate for one flag. `random` draws fresh bytes from the OS RNG.
fn resolve_seed(seed: Option<&str>) -> Option<Vec<u8>> {
    match seed {
        None => None,
        Some("random") => {
            let mut buf = [0u8; 32];
            rand::Rng::fill(&mut rand::thread_rng(), &mut buf);
            Some(buf.to_vec())
        }
        Some(text) => Some(text.as_bytes().to_vec()),
    }
}

fn write_plan(path: &Path, plan: &Plan) -> Result<()> {
    let bytes = bincode::serde::encode_to_vec(plan, bincode::config::standard())
        .map_err(|e| murk_core::Error::Codec(e.to_string()))?;
    fs::write(path, bytes).map_err(murk_core::Error::from)?;
    Ok(())
}

/// Synthesizes the shell trampoline that lets one murk binary serve both
/// as `RUSTC_WRAPPER` and as the linker Cargo invokes via `-C linker=`.
/// Cargo does not tag linker invocations any differently from any other
/// subprocess it launches, so there is no argv-shape that reliably tells
/// the two apart; a thin wrapper script that always sets
/// `MURK_LINK_WRAPPER=1` before exec'ing the real murk binary lets the
/// worker branch on that sentinel instead.
fn write_linker_trampoline(scratch: &Path, murk_binary: &Path) -> Result<PathBuf> {
    let path = scratch.join("murk-link-wrapper.sh");
    // rustc exposes no "what linker would you have used" query, and once
    // `-C linker=` names this script rustc no longer knows either; `cc`
    // (overridable via `$CC`/`$MURK_REAL_LINKER`) is the same default
    // nearly every Rust target already assumes for its system linker.
    let real_linker = std::env::var("MURK_REAL_LINKER")
        .or_else(|_| std::env::var("CC"))
        .unwrap_or_else(|_| "cc".to_string());
    let script = format!(
        "#!/bin/sh\nMURK_LINK_WRAPPER=1 MURK_REAL_LINKER=\"{}\" exec \"{}\" \"$@\"\n",
        real_linker,
        murk_binary.display()
    );
    let mut f = fs::File::create(&path).map_err(murk_core::Error::from)?;
    f.write_all(script.as_bytes()).map_err(murk_core::Error::from)?;
    drop(f);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).map_err(murk_core::Error::from)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).map_err(murk_core::Error::from)?;
    }
    Ok(path)
}

fn append_rustflags(linker_wrapper: &Path) -> String {
    let existing = std::env::var("RUSTFLAGS").unwrap_or_default();
    let flag = format!("-C linker={}", linker_wrapper.display());
    if existing.is_empty() {
        flag
    } else {
        format!("{existing} {flag}")
    }
}
