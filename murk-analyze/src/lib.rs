//! `murk-analyze`: the reflection-use analyzer (spec §4.4). Discovers
//! which types, fields and function parameters must keep their original
//! names because something observes their identity at runtime (or, for
//! Rust's dominant case, at derive-macro-expansion time).

pub mod cfg;
pub mod propagate;
pub mod record;
pub mod salt;
pub mod seed;

use murk_core::{ActionId, AnalysisEntry};

pub use cfg::{lower_impl_fn, lower_item_fn, CallSite, CastSite, FunctionFacts, Operand, StoreSite};
pub use propagate::{run_fixed_point, CrateStructTable};
pub use record::{record_enum, record_struct, ObservedEnum, ObservedStruct};

/// Runs the complete analyzer over one crate's parsed source files and
/// already-unioned import entry (spec §4.3's cache load protocol: "union
/// in every import's entry; run the reflection analyzer on the current
/// package and union its output").
///
/// * `files` -- every `syn::File` belonging to this crate.
/// * `imported` -- the deep-unioned entry from every direct import.
pub fn analyze_crate(
    files: &[syn::File],
    imported: AnalysisEntry,
    action_id: &ActionId,
    user_seed: &[u8],
) -> AnalysisEntry {
    let mut entry = AnalysisEntry::seed();
    entry.union_from(&imported);

    for file in files {
        seed::seed_from_derives(&mut entry, file, action_id, user_seed);
    }

    let structs = collect_struct_table(files);
    let functions = collect_functions(files);

    run_fixed_point(&functions, &structs, entry, action_id, user_seed)
}

/// Scope discipline (spec §4.4): a type is only recorded if its declaring
/// package equals the analyzed crate, which holds here structurally --
/// `collect_struct_table` only ever sees items declared in `files`, which
/// are this crate's own source files.
fn collect_struct_table(files: &[syn::File]) -> CrateStructTable {
    let mut structs = Vec::new();
    for file in files {
        for item in &file.items {
            if let syn::Item::Struct(s) = item {
                let fields = match &s.fields {
                    syn::Fields::Named(named) => named
                        .named
                        .iter()
                        .map(|f| {
                            let ty = &f.ty;
                            let ty = quote::quote!(#ty).to_string();
                            (
                                f.ident.as_ref().map(|i| i.to_string()).unwrap_or_default(),
                                ty,
                                matches!(f.vis, syn::Visibility::Public(_)),
                            )
                        })
                        .collect(),
                    syn::Fields::Unnamed(unnamed) => unnamed
                        .unnamed
                        .iter()
                        .enumerate()
                        .map(|(i, f)| {
                            let ty = &f.ty;
                            let ty = quote::quote!(#ty).to_string();
                            (i.to_string(), ty, matches!(f.vis, syn::Visibility::Public(_)))
                        })
                        .collect(),
                    syn::Fields::Unit => Vec::new(),
                };
                structs.push(ObservedStruct {
                    type_name: s.ident.to_string(),
                    is_pub: matches!(s.vis, syn::Visibility::Public(_)),
                    fields,
                });
            }
        }
    }
    CrateStructTable { structs }
}

fn collect_functions(files: &[syn::File]) -> Vec<FunctionFacts> {
    let mut out = Vec::new();
    for file in files {
        collect_functions_in_items(&file.items, "crate", &mut out);
    }
    out
}

fn collect_functions_in_items(items: &[syn::Item], scope: &str, out: &mut Vec<FunctionFacts>) {
    for item in items {
        match item {
            syn::Item::Fn(f) => {
                out.push(lower_item_fn(f, format!("{scope}::{}", f.sig.ident)));
            }
            syn::Item::Impl(imp) => {
                let ty = &imp.self_ty;
                let self_ty = quote::quote!(#ty).to_string();
                for impl_item in &imp.items {
                    if let syn::ImplItem::Fn(m) = impl_item {
                        out.push(lower_impl_fn(
                            m,
                            format!("{scope}::{self_ty}::{}", m.sig.ident),
                        ));
                    }
                }
            }
            syn::Item::Mod(m) => {
                if let Some((_, items)) = &m.content {
                    collect_functions_in_items(items, &format!("{scope}::{}", m.ident), out);
                }
            }
            _ => {}
        }
    }
}
