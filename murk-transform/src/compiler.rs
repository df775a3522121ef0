//! The compiler transform (spec §4.5): the per-crate pipeline that ties
//! together analysis-cache consumption, field-salt indexing, literal
//! obfuscation, identifier rewriting, assembly rewriting and comment
//! neutralization, producing the rewritten source this crate's `rustc`
//! invocation should actually compile.
//!
//! This module is pure: it takes source text in and returns source text
//! (plus bookkeeping) out. Reading the crate's real source files, writing
//! the rewritten ones into the scratch directory, and deciding which file
//! is "the" main-crate entry point are the worker's job (spec §5:
//! workers own their scratch output files; this crate has no filesystem
//! access of its own).

use std::collections::{HashMap, HashSet};

use murk_core::{ActionId, AnalysisEntry};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::rewrite::{RenameMap, Renamer};
use crate::salt_index::StructSaltIndex;
use crate::{asm, comments, ffi_exports, literals, rng, runtime_patch};

/// Inputs that vary per crate but not per file within it.
pub struct CrateContext<'a> {
    pub action_id: &'a ActionId,
    pub user_seed: &'a [u8],
    pub import_path: &'a str,
    pub literals: bool,
    pub tiny: bool,
    /// Whether this crate is the one producing the final binary (spec
    /// §4.9: runtime patches are injected only into the main crate).
    pub is_main_crate: bool,
    /// This crate's obfuscated dependencies, import path -> obfuscated
    /// import path (already slash-encoded via
    /// [`asm::encode_import_path`]), for qualified assembly symbols.
    pub dependency_import_paths: &'a HashMap<String, String>,
}

/// One source file belonging to the crate, before transformation.
pub struct SourceFile {
    /// Path relative to the crate root, used only for error messages and
    /// to give the per-file RNG a distinct stream.
    pub path: String,
    pub text: String,
}

/// What the pipeline produced for one crate.
pub struct CrateOutput {
    /// Rewritten source, in the same order as the input files.
    pub files: Vec<(String, String)>,
    /// This crate's updated analysis entry (already unioned with the
    /// import entry passed in), to be stored in the cache keyed by this
    /// crate's action id.
    pub analysis: AnalysisEntry,
    /// Plaintext symbol name -> obfuscated spelling, for every symbol some
    /// consumer outside this crate's rewritten source might still look up
    /// by its original name: `pub static` items a build-time linker flag
    /// (`option_env!`/build-script injected `-X`-equivalent) might target
    /// (spec §4.8 "-X duplication rule"), and `#[no_mangle]`/
    /// `#[export_name]` items (spec §4.5 step 7). The linker transform
    /// aliases every pair here so both spellings resolve.
    pub exported_renames: HashMap<String, String>,
    /// Obfuscated identifier -> original identifier, covering every item
    /// and field this crate's rename map touched. The worker folds this
    /// into the crate's analysis cache entry so `murk reverse` can look
    /// names back up without ever persisting the mapping anywhere the
    /// compiled binary itself could read it.
    pub renamed_idents: HashMap<String, String>,
    /// Inline `global_asm!` sites discovered in each file, already
    /// rewritten in place in `files`; reported separately only so the
    /// worker can log what changed.
    pub inline_asm_rewrites: usize,
    /// `global_asm!(include_str!("path"))` sites the worker must resolve
    /// against the filesystem, rewrite via [`asm::rewrite_source`], and
    /// re-path; `(file path, included .s path)`.
    pub included_asm_sites: Vec<(String, String)>,
}

/// Runs the full per-crate pipeline.
pub fn transform_crate(
    sources: &[SourceFile],
    imported_analysis: AnalysisEntry,
    ctx: &CrateContext,
) -> Result<CrateOutput> {
    let mut files = Vec::with_capacity(sources.len());
    for src in sources {
        let parsed = syn::parse_file(&src.text).map_err(|e| Error::Parse {
            file: src.path.clone(),
            message: e.to_string(),
        })?;
        files.push(parsed);
    }

    let analysis = murk_analyze::analyze_crate(&files, imported_analysis, ctx.action_id, ctx.user_seed);
    let reflect_observed: HashSet<String> = analysis.reflect_object_names.keys().cloned().collect();

    let mut salts = StructSaltIndex::build(&files[0]);
    for file in &files[1..] {
        salts.extend(StructSaltIndex::build(file));
    }

    let rename_map = build_crate_rename_map(&files, ctx.action_id, ctx.user_seed, &reflect_observed, &salts);
    let mut exported_renames = collect_exported_renames(&files, &rename_map);
    let renamed_idents = collect_renamed_idents(&rename_map);

    // The rewrite/print pass is embarrassingly parallel across files: each
    // file only reads the shared, already-complete `rename_map` and
    // `salts` index and owns its own parsed AST (spec §5: "no cross-file
    // state mutation during that phase").
    let per_file: Vec<(String, String, usize, Vec<(String, String)>, HashMap<String, String>)> = sources
        .par_iter()
        .zip(files.into_par_iter())
        .map(|(src, mut file)| {
            let mut inline_asm_rewrites = 0;
            let mut included_asm_sites = Vec::new();

            if ctx.literals {
                let mut literal_rng = rng::seeded_rng(
                    ctx.action_id,
                    user_seed_opt(ctx.user_seed),
                    &format!("{}::{}", ctx.import_path, src.path),
                );
                literals::LiteralObfuscator::new(&mut literal_rng).apply(&mut file);
            }

            for site in asm::find_global_asm_sites(&file) {
                match site {
                    asm::GlobalAsmSite::Inline { .. } => inline_asm_rewrites += 1,
                    asm::GlobalAsmSite::Included { path } => included_asm_sites.push((src.path.clone(), path)),
                }
            }
            rewrite_inline_global_asm(&mut file, &rename_map, ctx);

            // Must run before `Renamer`: it keys off each item's original
            // (not yet rewritten) identifier to look it up in `rename_map`.
            let ffi_exports =
                ffi_exports::rewrite_ffi_exports(&mut file, &rename_map, ctx.action_id, ctx.user_seed)?;

            Renamer::new(&rename_map).apply(&mut file);

            if ctx.is_main_crate {
                runtime_patch::strip_debug_calls(&mut file);
                runtime_patch::inject_into_main(&mut file, ctx.tiny);
            }

            comments::CommentNeutralizer::apply(&mut file);

            let printed = prettyplease::unparse(&file);
            Ok((src.path.clone(), printed, inline_asm_rewrites, included_asm_sites, ffi_exports))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut out_files = Vec::with_capacity(per_file.len());
    let mut inline_asm_rewrites = 0;
    let mut included_asm_sites = Vec::new();
    for (path, printed, count, sites, ffi_exports) in per_file {
        out_files.push((path, printed));
        inline_asm_rewrites += count;
        included_asm_sites.extend(sites);
        exported_renames.extend(ffi_exports);
    }

    Ok(CrateOutput {
        files: out_files,
        analysis,
        exported_renames,
        renamed_idents,
        inline_asm_rewrites,
        included_asm_sites,
    })
}

fn user_seed_opt(seed: &[u8]) -> Option<&[u8]> {
    if seed.is_empty() {
        None
    } else {
        Some(seed)
    }
}

/// Builds one rename map spanning every file in the crate: renaming a
/// top-level item must agree across files in the same module tree, and
/// since the obfuscated spelling is a pure function of `(salt, name)` any
/// file that independently derives the same candidate agrees with every
/// other by construction, so a plain per-file union is safe.
fn build_crate_rename_map(
    files: &[syn::File],
    action_id: &ActionId,
    user_seed: &[u8],
    reflect_observed: &HashSet<String>,
    salts: &StructSaltIndex,
) -> RenameMap {
    let mut items = HashMap::new();
    let mut fields = HashMap::new();
    for file in files {
        let per_file = RenameMap::build(file, action_id, user_seed, reflect_observed, salts);
        items.extend(per_file.items);
        fields.extend(per_file.fields);
    }
    RenameMap {
        items,
        fields,
        reflect_observed: reflect_observed.clone(),
    }
}

/// Inverts the rename map for `murk reverse`: obfuscated spelling ->
/// original, across both top-level items and fields. A field name maps to
/// at most one obfuscated spelling by construction (`RenameMap::build`
/// only keeps fields whose candidate set has a single member), so this
/// inversion is unambiguous.
fn collect_renamed_idents(rename_map: &RenameMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (original, obfuscated) in &rename_map.items {
        out.insert(obfuscated.clone(), original.clone());
    }
    for (original, obfuscated) in &rename_map.fields {
        out.entry(obfuscated.clone()).or_insert_with(|| original.clone());
    }
    out
}

fn collect_exported_renames(files: &[syn::File], rename_map: &RenameMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for file in files {
        for item in &file.items {
            if let syn::Item::Static(s) = item {
                if !matches!(s.vis, syn::Visibility::Public(_)) {
                    continue;
                }
                let name = s.ident.to_string();
                if let Some(obf) = rename_map.items.get(&name) {
                    out.insert(name, obf.clone());
                }
            }
        }
    }
    out
}

/// Rewrites bare `global_asm!("...")` string literals in place using the
/// identifier rename map; `include_str!`-based sites are left for the
/// worker, which alone can read and re-emit the referenced `.s` file.
fn rewrite_inline_global_asm(file: &mut syn::File, rename_map: &RenameMap, ctx: &CrateContext) {
    let maps = asm::AsmSymbolMaps {
        package_paths: ctx.dependency_import_paths,
        local_symbols: &rename_map.items,
    };
    for item in &mut file.items {
        let syn::Item::Macro(item_macro) = item else { continue };
        if !item_macro.mac.path.is_ident("global_asm") {
            continue;
        }
        let Ok(expr) = syn::parse2::<syn::Expr>(item_macro.mac.tokens.clone()) else {
            continue;
        };
        if let syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(s), ..
        }) = expr
        {
            let rewritten = asm::rewrite_source(&s.value(), &maps, &HashMap::new());
            item_macro.mac.tokens = quote::quote!(#rewritten);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(action_id: &'a ActionId, deps: &'a HashMap<String, String>) -> CrateContext<'a> {
        CrateContext {
            action_id,
            user_seed: b"",
            import_path: "demo",
            literals: true,
            tiny: false,
            is_main_crate: true,
            dependency_import_paths: deps,
        }
    }

    #[test]
    fn pipeline_renames_and_prints_without_error() {
        let action_id = ActionId([7u8; 32]);
        let deps = HashMap::new();
        let sources = vec![SourceFile {
            path: "main.rs".to_string(),
            text: r#"
                fn helper() -> i32 { 42 }
                fn main() {
                    let v = helper();
                    println!("{}", v);
                }
            "#
            .to_string(),
        }];
        let out = transform_crate(&sources, AnalysisEntry::seed(), &ctx(&action_id, &deps)).unwrap();
        assert_eq!(out.files.len(), 1);
        assert!(out.files[0].1.contains("fn main"));
        assert!(!out.files[0].1.contains("fn helper"));
        assert!(out.files[0].1.contains("__murk_install_panic_hook"));
    }

    #[test]
    fn reflection_observed_struct_keeps_its_name() {
        let action_id = ActionId([7u8; 32]);
        let deps = HashMap::new();
        let sources = vec![SourceFile {
            path: "lib.rs".to_string(),
            text: r#"
                #[derive(serde::Serialize)]
                pub struct Config {
                    pub name: String,
                }
                fn main() {}
            "#
            .to_string(),
        }];
        let mut c = ctx(&action_id, &deps);
        c.literals = false;
        let out = transform_crate(&sources, AnalysisEntry::seed(), &c).unwrap();
        assert!(out.files[0].1.contains("struct Config"));
        assert!(out.files[0].1.contains("name"));
    }

    #[test]
    fn literal_obfuscation_leaves_static_initializers_const_eval_and_rewrites_values() {
        let action_id = ActionId([7u8; 32]);
        let deps = HashMap::new();
        let sources = vec![SourceFile {
            path: "main.rs".to_string(),
            text: r#"
                static BANNER: &str = "hello";

                fn main() {
                    let count: u8 = 42;
                    let local = "hello";
                    println!("{} {} {}", BANNER, count, local);
                }
            "#
            .to_string(),
        }];
        let out = transform_crate(&sources, AnalysisEntry::seed(), &ctx(&action_id, &deps)).unwrap();
        let printed = &out.files[0].1;
        // `static` initializers must stay byte-for-byte constant (E0015
        // otherwise): the obfuscator must not touch this literal, even
        // though its item name is still fair game for identifier renaming.
        // The only surviving occurrence of the literal text is the static's.
        assert_eq!(printed.matches("\"hello\"").count(), 1, "{printed}");
        assert!(printed.contains("static"), "{printed}");
        // A plain, non-const value-position literal is fair game and
        // must actually be rewritten, with its type preserved via a cast.
        assert!(printed.contains("as u8"), "{printed}");
        assert!(!printed.contains("let local = \"hello\""), "{printed}");
    }
}
