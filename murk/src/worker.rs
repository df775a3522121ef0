//! Tier 2 (spec §2, §4.5, §4.8): short-lived worker processes re-entered by
//! Cargo through `RUSTC_WRAPPER` (one process per `rustc` invocation) and
//! through `-C linker=<murk-link-wrapper>` (one process per link step).
//!
//! Dispatch happens on environment sentinels set by the planner
//! (`MURK_WORKER`, `MURK_LINK_WRAPPER`), mirroring spec.md §9's "worker
//! re-entry" design note: "a sentinel environment variable is the chosen
//! mechanism... the contract is only that workers reliably know they are
//! workers."

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use murk_core::plan::{CrateDescriptor, CrateKey, Plan};
use murk_core::{AnalysisCache, AnalysisEntry};
use murk_transform::{CrateContext, SourceFile};

use crate::error::{Error, Result};

/// Entry point for both worker modes; called by `main` once a sentinel env
/// var is observed. Returns the exit code to propagate to Cargo.
pub fn dispatch() -> Result<i32> {
    let plan = load_plan()?;

    if std::env::var_os("MURK_LINK_WRAPPER").is_some() {
        run_link(&plan)
    } else {
        run_compile(&plan)
    }
}

fn load_plan() -> Result<Plan> {
    let path = std::env::var_os("MURK_PLAN").ok_or_else(|| {
        Error::Core(murk_core::Error::Environment(
            "MURK_WORKER set but MURK_PLAN is missing".to_string(),
        ))
    })?;
    let bytes = fs::read(&path).map_err(murk_core::Error::from)?;
    let (plan, _): (Plan, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| murk_core::Error::Codec(e.to_string()))?;
    Ok(plan)
}

/// The raw argv this worker was invoked with, minus argv[0] (the murk
/// binary path itself -- Cargo invokes `RUSTC_WRAPPER` as `<wrapper>
/// <real-tool> <tool-args...>`, so argv[1] is always the real tool).
fn worker_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

// ---------------------------------------------------------------------
// Compile-stage worker (spec §4.5)
// ---------------------------------------------------------------------

fn run_compile(plan: &Plan) -> Result<i32> {
    let args = worker_args();
    let Some((rustc_path, rustc_args)) = args.split_first() else {
        return Err(Error::Core(murk_core::Error::Internal {
            site: "worker::run_compile",
            message: "no rustc invocation argv to wrap".to_string(),
        }));
    };

    let Some(descriptor) = find_descriptor(plan, rustc_args) else {
        // Unrecognized invocation (e.g. a `build.rs` probe compile, or a
        // crate outside the plan entirely): pass through unmodified
        // rather than refuse the whole build over an edge case spec.md
        // §4.2 step 3 already decided is out of scope for obfuscation.
        return exec_passthrough(rustc_path, rustc_args);
    };

    if !descriptor.to_obfuscate {
        return exec_passthrough(rustc_path, rustc_args);
    }

    let Some(action_id) = descriptor.action_id else {
        return Err(Error::Core(murk_core::Error::Internal {
            site: "worker::run_compile",
            message: format!("{} marked to_obfuscate with no action id", descriptor.import_path),
        }));
    };

    let cache = AnalysisCache::new(plan.cache_root.clone())?;
    let imported = load_import_closure(&cache, plan, descriptor)?;

    let sources = read_sources(&descriptor.source_files)?;
    let user_seed = plan.flags.seed.clone().unwrap_or_default();
    let is_main_crate = matches!(
        descriptor.key.kind,
        murk_core::plan::TargetKind::Bin | murk_core::plan::TargetKind::Test
    );

    let dependency_import_paths = dependency_obfuscated_paths(plan, descriptor);

    let ctx = CrateContext {
        action_id: &action_id,
        user_seed: &user_seed,
        import_path: &descriptor.import_path,
        literals: plan.flags.literals,
        tiny: plan.flags.tiny,
        is_main_crate,
        dependency_import_paths: &dependency_import_paths,
    };

    let output = murk_transform::transform_crate(&sources, imported, &ctx)?;

    let mut analysis = output.analysis;
    analysis.renamed_idents.extend(output.renamed_idents);
    cache.store(&action_id, &analysis)?;
    write_exported_renames(plan, descriptor, &output.exported_renames)?;

    let scratch_dir = crate_scratch_dir(plan, descriptor);
    fs::create_dir_all(&scratch_dir).map_err(murk_core::Error::from)?;
    let rewritten_paths = write_rewritten_sources(&scratch_dir, &output.files)?;

    for (original_rel, included) in &output.included_asm_sites {
        rewrite_included_asm(plan, descriptor, &scratch_dir, original_rel, included)?;
    }

    let patched_args = rewrite_rustc_args(rustc_args, descriptor, &rewritten_paths, &scratch_dir);
    exec_passthrough(rustc_path, &patched_args)
}

/// Matches the crate this `rustc` invocation targets against the plan, by
/// `--crate-name` (always present) plus the input source file Cargo
/// passes as a trailing positional argument. `--crate-name` alone can be
/// ambiguous (a workspace may declare same-named targets in different
/// packages), so the source path is the tie-breaker.
fn find_descriptor<'a>(plan: &'a Plan, rustc_args: &[String]) -> Option<&'a CrateDescriptor> {
    let crate_name = flag_value(rustc_args, "--crate-name")?;
    let input = rustc_args
        .iter()
        .rev()
        .find(|a| !a.starts_with('-') && a.ends_with(".rs"))
        .map(PathBuf::from);

    let mut candidates = plan
        .crates
        .values()
        .filter(|d| d.crate_name == crate_name || d.crate_name.replace('-', "_") == crate_name);

    let first = candidates.next()?;
    if let Some(input) = &input {
        if let Some(exact) = plan.crates.values().find(|d| {
            (d.crate_name == crate_name || d.crate_name.replace('-', "_") == crate_name)
                && d.source_files.first() == Some(input)
        }) {
            return Some(exact);
        }
    }
    Some(first)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().enumerate().find_map(|(i, a)| {
        if a == flag {
            args.get(i + 1).map(String::as_str)
        } else if let Some(rest) = a.strip_prefix(&format!("{flag}=")) {
            Some(rest)
        } else {
            None
        }
    })
}

/// Loads and unions every direct dependency's analysis entry, per spec
/// §4.3's load protocol: "for each direct import, recursively obtain its
/// entry... start with the seed entry... union in every import's entry."
/// Recursion bottoms out because Cargo only ever builds a crate after its
/// dependencies (spec §5 "Ordering"), so each import's own entry already
/// exists in the cache by the time this crate's worker runs.
fn load_import_closure(
    cache: &AnalysisCache,
    plan: &Plan,
    descriptor: &CrateDescriptor,
) -> Result<AnalysisEntry> {
    let mut entry = AnalysisEntry::seed();
    for dep_pkg_id in descriptor.import_map.values() {
        for dep in plan
            .crates
            .values()
            .filter(|d| &d.key.package_id == dep_pkg_id)
        {
            let Some(dep_action_id) = dep.action_id else {
                continue;
            };
            if let Some(dep_entry) = cache.load(&dep_action_id)? {
                entry.union_from(&dep_entry);
            }
        }
    }
    Ok(entry)
}

fn read_sources(paths: &[PathBuf]) -> Result<Vec<SourceFile>> {
    paths
        .iter()
        .map(|p| {
            let text = fs::read_to_string(p).map_err(murk_core::Error::from)?;
            Ok(SourceFile {
                path: p.to_string_lossy().into_owned(),
                text,
            })
        })
        .collect()
}

fn crate_scratch_dir(plan: &Plan, descriptor: &CrateDescriptor) -> PathBuf {
    let obf = obfuscated_crate_dir_name(descriptor);
    plan.shared_tmp.join(obf)
}

/// `<obfuscated-import-path>` scratch directory name (spec §6 on-disk
/// format: `<shared>/<obfuscated-import-path>/<name>`), with `::`
/// replaced since it is not a valid path segment character on all
/// platforms.
fn obfuscated_crate_dir_name(descriptor: &CrateDescriptor) -> String {
    let Some(action_id) = descriptor.action_id else {
        return descriptor.crate_name.clone();
    };
    murk_core::naming::obfuscate_file_name(action_id.as_bytes(), &[], &descriptor.import_path)
}

fn write_rewritten_sources(
    scratch_dir: &Path,
    files: &[(String, String)],
) -> Result<HashMap<String, PathBuf>> {
    let mut out = HashMap::new();
    for (original_path, text) in files {
        let base = Path::new(original_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file.rs".to_string());
        let dest = scratch_dir.join(base);
        fs::write(&dest, text).map_err(murk_core::Error::from)?;
        out.insert(original_path.clone(), dest);
    }
    Ok(out)
}

fn rewrite_included_asm(
    plan: &Plan,
    descriptor: &CrateDescriptor,
    scratch_dir: &Path,
    source_rel: &str,
    included_path: &str,
) -> Result<()> {
    let base = Path::new(source_rel).parent().unwrap_or_else(|| Path::new("."));
    let full = base.join(included_path);
    let Ok(text) = fs::read_to_string(&full) else {
        // Not on disk relative to the source file: treat as system/
        // provided per spec §4.7 rule 3 and leave untouched.
        return Ok(());
    };

    let action_id = descriptor.action_id.expect("to_obfuscate crate has action id");
    let user_seed = plan.flags.seed.clone().unwrap_or_default();
    let deps = dependency_obfuscated_paths(plan, descriptor);
    let maps = murk_transform::asm::AsmSymbolMaps {
        package_paths: &deps,
        local_symbols: &HashMap::new(),
    };

    let includes = murk_transform::asm::find_includes(&text);
    let mut include_rename = HashMap::new();
    for inc in &includes {
        let base_name = Path::new(inc)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| inc.clone());
        include_rename.insert(
            inc.clone(),
            murk_transform::asm::obfuscated_asm_file_name(&base_name, action_id.as_bytes(), &user_seed),
        );
    }

    let rewritten = murk_transform::asm::rewrite_source(&text, &maps, &include_rename);
    let base_name = Path::new(included_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| included_path.to_string());
    let out_name = murk_transform::asm::obfuscated_asm_file_name(&base_name, action_id.as_bytes(), &user_seed);
    fs::write(scratch_dir.join(out_name), rewritten).map_err(murk_core::Error::from)?;
    Ok(())
}

/// This crate's direct dependencies that are themselves obfuscated,
/// import path -> obfuscated import path (slash-encoded for use inside
/// qualified assembly symbol tokens, per spec §4.7's grammar).
fn dependency_obfuscated_paths(plan: &Plan, descriptor: &CrateDescriptor) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for dep_pkg_id in descriptor.import_map.values() {
        for dep in plan.crates.values().filter(|d| &d.key.package_id == dep_pkg_id) {
            if !dep.to_obfuscate {
                continue;
            }
            out.insert(
                murk_transform::asm::encode_import_path(&dep.import_path),
                obfuscated_crate_dir_name(dep),
            );
        }
    }
    out
}

/// Persists one crate's `exported_renames` (spec §4.8 "-X duplication
/// rule" realization) under the shared scratch dir, so the link-stage
/// worker -- a separate process with no memory of this compile -- can
/// read every obfuscated crate's aliases back when it assembles the
/// final link command.
fn write_exported_renames(
    plan: &Plan,
    descriptor: &CrateDescriptor,
    renames: &HashMap<String, String>,
) -> Result<()> {
    if renames.is_empty() {
        return Ok(());
    }
    let path = renames_side_file(plan, descriptor);
    let bytes = bincode::serde::encode_to_vec(renames, bincode::config::standard())
        .map_err(|e| murk_core::Error::Codec(e.to_string()))?;
    fs::write(path, bytes).map_err(murk_core::Error::from)?;
    Ok(())
}

fn renames_side_file(plan: &Plan, descriptor: &CrateDescriptor) -> PathBuf {
    plan.shared_tmp
        .join(format!("{}.renames", obfuscated_crate_dir_name(descriptor)))
}

/// Replaces the original source-file positional argument(s) with their
/// rewritten scratch-directory counterparts, and forces `--out-dir`-style
/// `-C extra-filename`/`--emit` paths to remain untouched (the scratch
/// source is a drop-in replacement at the same crate-name/crate-type, so
/// Cargo's own output paths need no adjustment).
fn rewrite_rustc_args(
    original: &[String],
    descriptor: &CrateDescriptor,
    rewritten_paths: &HashMap<String, PathBuf>,
    scratch_dir: &Path,
) -> Vec<String> {
    let entry_original = descriptor
        .source_files
        .first()
        .map(|p| p.to_string_lossy().into_owned());

    original
        .iter()
        .map(|arg| {
            if Some(arg) == entry_original.as_ref() {
                if let Some(rewritten) = rewritten_paths.get(arg) {
                    return rewritten.to_string_lossy().into_owned();
                }
            }
            arg.clone()
        })
        .chain(std::iter::once(format!(
            "-L{}",
            scratch_dir.display()
        )))
        .collect()
}

// ---------------------------------------------------------------------
// Link-stage worker (spec §4.8)
// ---------------------------------------------------------------------

fn run_link(plan: &Plan) -> Result<i32> {
    let args = worker_args();
    let real_linker = std::env::var("MURK_REAL_LINKER").unwrap_or_else(|_| "cc".to_string());

    let exported_renames = collect_all_exported_renames(plan)?;
    let aliases = murk_transform::linker::build_aliases(&exported_renames);
    let gnu_compatible = !real_linker.contains("ld64") && !real_linker.contains("lld-link");

    let rewrite = murk_transform::linker::LinkerRewrite {
        aliases,
        gnu_compatible,
        version_placeholder_script: None,
    };
    let argv = rewrite.rewrite_argv(&real_linker, &args);

    log::info!(
        "murk: linking with {} symbol alias(es) for obfuscated exports",
        exported_renames.len()
    );

    let status = Command::new(&argv[0])
        .args(&argv[1..])
        .status()
        .map_err(murk_core::Error::from)?;
    Ok(status.code().unwrap_or(1))
}

fn collect_all_exported_renames(plan: &Plan) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for descriptor in plan.obfuscated_crates() {
        let path = renames_side_file(plan, descriptor);
        let Ok(bytes) = fs::read(&path) else { continue };
        let (renames, _): (HashMap<String, String>, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| murk_core::Error::Codec(e.to_string()))?;
        out.extend(renames);
    }
    Ok(out)
}

fn exec_passthrough(program: &str, args: &[String]) -> Result<i32> {
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(murk_core::Error::from)?;
    Ok(status.code().unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use murk_core::plan::TargetKind;
    use std::collections::BTreeMap;

    fn descriptor(key: CrateKey, crate_name: &str, source: &str) -> CrateDescriptor {
        CrateDescriptor {
            key,
            import_path: format!("demo::{crate_name}"),
            crate_name: crate_name.to_string(),
            source_files: vec![PathBuf::from(source)],
            asm_files: Vec::new(),
            import_map: Default::default(),
            dependency_closure: Default::default(),
            object_path: None,
            action_id: None,
            to_obfuscate: true,
            is_sysroot: false,
            load_error: None,
        }
    }

    #[test]
    fn finds_descriptor_by_crate_name_and_source() {
        let mut crates = BTreeMap::new();
        let key = CrateKey {
            package_id: "demo 0.1.0".to_string(),
            target_name: "demo".to_string(),
            kind: TargetKind::Bin,
        };
        crates.insert(key.clone(), descriptor(key, "demo", "src/main.rs"));

        let plan = Plan {
            crates,
            pattern_raw: String::new(),
            rustc_version: "1.0.0".to_string(),
            cargo_path: PathBuf::from("cargo"),
            cache_root: PathBuf::from("/tmp/cache"),
            shared_tmp: PathBuf::from("/tmp/shared"),
            flags: Default::default(),
        };

        let args = vec![
            "--crate-name".to_string(),
            "demo".to_string(),
            "src/main.rs".to_string(),
        ];
        let found = find_descriptor(&plan, &args);
        assert!(found.is_some());
        assert_eq!(found.unwrap().crate_name, "demo");
    }

    #[test]
    fn flag_value_handles_both_spacing_forms() {
        let args = vec!["--crate-name".to_string(), "foo".to_string()];
        assert_eq!(flag_value(&args, "--crate-name"), Some("foo"));
        let args2 = vec!["--crate-name=bar".to_string()];
        assert_eq!(flag_value(&args2, "--crate-name"), Some("bar"));
    }
}
