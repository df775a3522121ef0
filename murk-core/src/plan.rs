//! The build plan (spec §3 "Plan", §4.2 "Plan store and action-id
//! derivation"): enumerates the crate graph via `cargo_metadata`, marks the
//! obfuscation subset, and serializes an immutable snapshot workers map
//! read-only.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use cargo_metadata::{Metadata, Package, PackageId, Target};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::action_id::ActionId;
use crate::error::{Error, PositionedMessage, Result};
use crate::policy;

/// Mirrors Cargo's own target-kind vocabulary, narrowed to what murk needs
/// to distinguish: a package may emit more than one crate (lib + bins +
/// tests), each addressed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Lib,
    Bin,
    Test,
    Bench,
    Example,
    ProcMacro,
    BuildScript,
}

impl TargetKind {
    pub fn from_cargo_kinds(kinds: &[String]) -> Self {
        if kinds.iter().any(|k| k == "proc-macro") {
            TargetKind::ProcMacro
        } else if kinds.iter().any(|k| k == "custom-build") {
            TargetKind::BuildScript
        } else if kinds.iter().any(|k| k == "bin") {
            TargetKind::Bin
        } else if kinds.iter().any(|k| k == "test") {
            TargetKind::Test
        } else if kinds.iter().any(|k| k == "bench") {
            TargetKind::Bench
        } else if kinds.iter().any(|k| k == "example") {
            TargetKind::Example
        } else {
            TargetKind::Lib
        }
    }
}

/// Uniquely addresses one crate within a workspace: a package may have
/// several targets, each its own compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CrateKey {
    pub package_id: String,
    pub target_name: String,
    pub kind: TargetKind,
}

/// Immutable per-crate record (spec §3 "Package descriptor"), created once
/// by the planner and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrateDescriptor {
    pub key: CrateKey,
    /// Canonical import path equivalent: `<package-name>::<target-name>`.
    pub import_path: String,
    pub crate_name: String,
    pub source_files: Vec<PathBuf>,
    /// Heuristically discovered `.s`/`global_asm!` include targets (the
    /// Rust analog of spec.md's "set of assembly file paths").
    pub asm_files: Vec<PathBuf>,
    /// Local alias -> canonical package id, the Rust analog of spec.md's
    /// import-map (built from `--extern name=path` at invocation time, not
    /// known fully until the worker sees its own argv -- the planner fills
    /// in what `cargo_metadata` dependency edges already tell us).
    pub import_map: BTreeMap<String, String>,
    /// Populated lazily: the transitive closure of dependency package ids.
    /// Empty until `Plan::compute_closure` has run for this key.
    pub dependency_closure: BTreeSet<String>,
    pub object_path: Option<PathBuf>,
    pub action_id: Option<ActionId>,
    pub to_obfuscate: bool,
    pub is_sysroot: bool,
    pub load_error: Option<String>,
}

/// The obfuscation-set pattern (spec's `GOGARBLE`/`GOPRIVATE` analog,
/// `MURK_PATTERN` here): a comma-separated list of glob-ish prefixes,
/// matched the same way Go's module-pattern matching works -- `*` matches
/// one path segment's worth of text, and a bare prefix matches anything
/// starting with it followed by `/` or end-of-string.
#[derive(Debug, Clone)]
pub struct ObfuscationPattern {
    raw: String,
    compiled: Vec<Regex>,
}

impl ObfuscationPattern {
    pub fn parse(raw: &str) -> Self {
        let compiled = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|pat| {
                let escaped = regex::escape(pat).replace(r"\*", ".*");
                Regex::new(&format!("^{escaped}(::.*)?$")).ok()
            })
            .collect();
        ObfuscationPattern {
            raw: raw.to_string(),
            compiled,
        }
    }

    pub fn matches(&self, import_path: &str) -> bool {
        self.compiled.iter().any(|r| r.is_match(import_path))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

/// Build-wide flags that are common to every crate, threaded through from
/// the CLI (spec §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MurkFlags {
    pub literals: bool,
    pub tiny: bool,
    pub debug: bool,
    pub debug_dir: Option<PathBuf>,
    pub seed: Option<Vec<u8>>,
}

/// The full, immutable plan mapped read-only by every worker (spec §3
/// "Plan").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub crates: BTreeMap<CrateKey, CrateDescriptor>,
    pub pattern_raw: String,
    pub rustc_version: String,
    pub cargo_path: PathBuf,
    pub cache_root: PathBuf,
    pub shared_tmp: PathBuf,
    pub flags: MurkFlags,
}

impl Plan {
    /// Reconstructs the compiled obfuscation-set pattern from its raw form.
    /// Regexes are not serialized; the plan carries only the source string
    /// and every reader re-parses it, which is cheap and keeps the on-disk
    /// format free of compiled-regex internals.
    pub fn pattern(&self) -> ObfuscationPattern {
        ObfuscationPattern::parse(&self.pattern_raw)
    }

    /// Looks up a crate descriptor by key.
    pub fn crate_for(&self, key: &CrateKey) -> Option<&CrateDescriptor> {
        self.crates.get(key)
    }

    /// All crates marked to-obfuscate, in deterministic (BTreeMap) order.
    pub fn obfuscated_crates(&self) -> impl Iterator<Item = &CrateDescriptor> {
        self.crates.values().filter(|c| c.to_obfuscate)
    }

    /// Invariant 2: every obfuscated crate has a non-empty action id.
    pub fn check_invariants(&self) -> Result<()> {
        for c in self.obfuscated_crates() {
            if c.action_id.is_none() {
                return Err(Error::Internal {
                    site: "Plan::check_invariants",
                    message: format!("obfuscated crate {} has no action id", c.import_path),
                });
            }
        }
        Ok(())
    }

    /// Computes the transitive dependency closure for every crate in place,
    /// mirroring spec.md's "populated lazily" field -- here "lazily" means
    /// once, at plan-construction time, rather than per-access, since the
    /// whole graph is already resident.
    pub fn compute_closures(&mut self) {
        let edges: BTreeMap<CrateKey, Vec<String>> = self
            .crates
            .iter()
            .map(|(k, d)| (k.clone(), d.import_map.values().cloned().collect()))
            .collect();

        let by_package: BTreeMap<String, Vec<CrateKey>> = self.crates.keys().fold(
            BTreeMap::new(),
            |mut acc: BTreeMap<String, Vec<CrateKey>>, k| {
                acc.entry(k.package_id.clone()).or_default().push(k.clone());
                acc
            },
        );

        let keys: Vec<CrateKey> = self.crates.keys().cloned().collect();
        for key in keys {
            let mut closure = BTreeSet::new();
            let mut stack: Vec<String> = edges.get(&key).cloned().unwrap_or_default();
            while let Some(dep_pkg) = stack.pop() {
                if !closure.insert(dep_pkg.clone()) {
                    continue;
                }
                if let Some(dep_keys) = by_package.get(&dep_pkg) {
                    for dk in dep_keys {
                        if let Some(more) = edges.get(dk) {
                            stack.extend(more.iter().cloned());
                        }
                    }
                }
            }
            if let Some(d) = self.crates.get_mut(&key) {
                d.dependency_closure = closure;
            }
        }
    }
}

/// Determines whether a package's manifest-declared path is rooted under
/// the toolchain sysroot: `cargo_metadata` reports workspace members and
/// path/git/registry dependencies uniformly, so murk treats anything
/// without a `source` (path dependencies, including the workspace itself)
/// as non-sysroot, and relies on [`policy::is_sysroot_crate`] by name for
/// the handful of crates the toolchain injects implicitly.
fn is_sysroot(pkg: &Package) -> bool {
    policy::is_sysroot_crate(&pkg.name)
}

/// Builds one [`CrateDescriptor`] per (package, target) pair reported by
/// `cargo_metadata`, implementing spec §4.2 steps 1-3.
pub fn build_descriptors(
    metadata: &Metadata,
    pattern: &ObfuscationPattern,
    root_packages: &BTreeSet<PackageId>,
) -> Result<(BTreeMap<CrateKey, CrateDescriptor>, Vec<PositionedMessage>)> {
    let mut out = BTreeMap::new();
    let mut errors = Vec::new();

    let resolve = metadata.resolve.as_ref().ok_or_else(|| {
        Error::CrateGraph(crate::error::format_positions(&[PositionedMessage {
            position: None,
            message: "cargo metadata produced no resolve graph".into(),
        }]))
    })?;

    let node_by_id: BTreeMap<&PackageId, &cargo_metadata::Node> =
        resolve.nodes.iter().map(|n| (&n.id, n)).collect();

    for pkg in &metadata.packages {
        for target in &pkg.targets {
            let kind = TargetKind::from_cargo_kinds(&target.kind);
            let key = CrateKey {
                package_id: pkg.id.repr.clone(),
                target_name: target.name.clone(),
                kind,
            };
            let import_path = format!("{}::{}", pkg.name, target.name);
            let import_map = node_by_id
                .get(&pkg.id)
                .map(|n| {
                    n.deps
                        .iter()
                        .map(|d| (d.name.clone(), d.pkg.repr.clone()))
                        .collect()
                })
                .unwrap_or_default();

            let sysroot = is_sysroot(pkg);
            let has_sources = target_has_sources(target);
            let is_proc_macro = kind == TargetKind::ProcMacro;
            let is_root = root_packages.contains(&pkg.id);

            let matches_pattern = pattern.matches(&import_path) || pattern.matches(&pkg.name);
            let to_obfuscate = !sysroot
                && !is_proc_macro
                && pkg.name != "runtime_cgo_equivalent"
                && has_sources
                && (matches_pattern
                    || (is_root && matches!(kind, TargetKind::Test | TargetKind::Bin)));

            out.insert(
                key.clone(),
                CrateDescriptor {
                    key,
                    import_path,
                    crate_name: target.name.clone(),
                    source_files: vec![target.src_path.clone().into_std_path_buf()],
                    asm_files: Vec::new(),
                    import_map,
                    dependency_closure: BTreeSet::new(),
                    object_path: None,
                    action_id: None,
                    to_obfuscate,
                    is_sysroot: sysroot,
                    load_error: None,
                },
            );
        }
    }

    Ok((out, errors.drain(..).collect()))
}

fn target_has_sources(target: &Target) -> bool {
    target.src_path.as_str().ends_with(".rs")
}

/// Step 4: refuse to proceed if nothing is marked and the pattern doesn't
/// include the root package(s).
pub fn validate_nonempty(
    crates: &BTreeMap<CrateKey, CrateDescriptor>,
    pattern: &ObfuscationPattern,
) -> Result<()> {
    let any_marked = crates.values().any(|c| c.to_obfuscate);
    if !any_marked && !pattern.is_empty() {
        return Err(Error::UsageError(format!(
            "obfuscation pattern {:?} matched no crates in this workspace",
            pattern.as_str()
        )));
    }
    if !any_marked && pattern.is_empty() {
        return Err(Error::UsageError(
            "no obfuscation pattern given (set MURK_PATTERN or --obfuscate) and no crate matched"
                .to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matches_prefix() {
        let p = ObfuscationPattern::parse("myapp::*");
        assert!(p.matches("myapp::main"));
        assert!(!p.matches("serde::lib"));
    }

    #[test]
    fn pattern_matches_exact_and_list() {
        let p = ObfuscationPattern::parse("myapp::lib, other::lib");
        assert!(p.matches("myapp::lib"));
        assert!(p.matches("other::lib"));
        assert!(!p.matches("third::lib"));
    }

    #[test]
    fn empty_pattern_matches_nothing() {
        let p = ObfuscationPattern::parse("");
        assert!(p.is_empty());
        assert!(!p.matches("anything"));
    }
}
