//! FFI export-name rewriting (spec §4.5 step 7): the Rust realization of
//! spec.md's `//go:linkname` handling, where a local symbol is pinned to
//! a specific exported name that isn't necessarily the identifier the
//! rest of the rewrite pass ever sees.
//!
//! `#[no_mangle]` ties a symbol's linker-visible name to its Rust
//! identifier, so once that identifier is renamed by the ordinary
//! rewrite pass the exported symbol already follows along; this module
//! only needs to record the before/after pair for the linker alias
//! table. `#[export_name = "..."]` pins the symbol to an arbitrary
//! string instead, which lives inside an attribute literal rather than
//! an identifier token, so nothing else in the pipeline ever touches it
//! -- this module rewrites that literal in place. Either way, a rewrite
//! that would shadow a runtime-patched symbol (spec §4.9) is refused.

use std::collections::HashMap;

use murk_core::naming::{self, Visibility};
use murk_core::ActionId;
use syn::{Attribute, Item};

use crate::error::{Error, Result};
use crate::rewrite::RenameMap;
use crate::runtime_patch::RUNTIME_PATCHED_SYMBOLS;

fn has_no_mangle(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|a| a.path().is_ident("no_mangle"))
}

fn export_name_value(attrs: &[Attribute]) -> Option<(usize, String)> {
    attrs.iter().enumerate().find_map(|(i, a)| {
        if !a.path().is_ident("export_name") {
            return None;
        }
        let syn::Meta::NameValue(nv) = &a.meta else {
            return None;
        };
        let syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(s),
            ..
        }) = &nv.value
        else {
            return None;
        };
        Some((i, s.value()))
    })
}

fn set_export_name_value(attrs: &mut [Attribute], idx: usize, new_value: &str) {
    if let syn::Meta::NameValue(nv) = &mut attrs[idx].meta {
        nv.value = syn::Expr::Lit(syn::ExprLit {
            attrs: Vec::new(),
            lit: syn::Lit::Str(syn::LitStr::new(new_value, proc_macro2::Span::call_site())),
        });
    }
}

fn refuse_if_runtime_patched(name: &str) -> Result<()> {
    if RUNTIME_PATCHED_SYMBOLS.contains(&name) {
        return Err(Error::Core(murk_core::Error::Policy(format!(
            "refusing to rewrite exported symbol {name:?}: it shadows a runtime-patched symbol"
        ))));
    }
    Ok(())
}

/// Walks top-level `fn`/`static` items for `#[no_mangle]` and
/// `#[export_name = "..."]`, rewriting the latter's literal in place and
/// returning `original -> obfuscated` pairs for both, so the linker
/// transform can alias them the same way it already does for exported
/// `pub static` items (`compiler::collect_exported_renames`).
///
/// Must run before the ordinary [`crate::rewrite::Renamer`] pass: it
/// reads each item's *original* identifier to look it up in
/// `rename_map`, which is keyed by original name.
pub fn rewrite_ffi_exports(
    file: &mut syn::File,
    rename_map: &RenameMap,
    action_id: &ActionId,
    user_seed: &[u8],
) -> Result<HashMap<String, String>> {
    let mut exports = HashMap::new();

    for item in &mut file.items {
        let (name, attrs): (String, &mut Vec<Attribute>) = match item {
            Item::Fn(f) => (f.sig.ident.to_string(), &mut f.attrs),
            Item::Static(s) => (s.ident.to_string(), &mut s.attrs),
            _ => continue,
        };

        if has_no_mangle(&attrs[..]) {
            refuse_if_runtime_patched(&name)?;
            if let Some(obf) = rename_map.items.get(&name) {
                if obf != &name {
                    exports.insert(name.clone(), obf.clone());
                }
            }
        }

        if let Some((idx, raw_name)) = export_name_value(&attrs[..]) {
            refuse_if_runtime_patched(&raw_name)?;
            let obf = naming::obfuscate_ident(action_id.as_bytes(), user_seed, &raw_name, Visibility::Unexported);
            set_export_name_value(attrs, idx, &obf);
            exports.insert(raw_name, obf);
        }
    }

    Ok(exports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::RenameMap as RM;
    use std::collections::HashSet;

    fn action_id() -> ActionId {
        ActionId([3u8; 32])
    }

    #[test]
    fn no_mangle_fn_reuses_rename_map_entry() {
        let mut file: syn::File = syn::parse_str(
            r#"
            #[no_mangle]
            pub fn frobnicate() {}
            "#,
        )
        .unwrap();
        let reflect_observed = HashSet::new();
        let salts = crate::salt_index::StructSaltIndex::build(&file);
        let rename_map = RM::build(&file, &action_id(), b"", &reflect_observed, &salts);
        let obf = rename_map.items.get("frobnicate").cloned().unwrap();

        let exports = rewrite_ffi_exports(&mut file, &rename_map, &action_id(), b"").unwrap();
        assert_eq!(exports.get("frobnicate"), Some(&obf));
    }

    #[test]
    fn export_name_literal_is_rewritten_and_recorded() {
        let mut file: syn::File = syn::parse_str(
            r#"
            #[export_name = "my_callback"]
            pub fn handler() {}
            "#,
        )
        .unwrap();
        let reflect_observed = HashSet::new();
        let salts = crate::salt_index::StructSaltIndex::build(&file);
        let rename_map = RM::build(&file, &action_id(), b"", &reflect_observed, &salts);

        let exports = rewrite_ffi_exports(&mut file, &rename_map, &action_id(), b"").unwrap();
        let obf = exports.get("my_callback").cloned().unwrap();
        assert_ne!(obf, "my_callback");

        let printed = prettyplease::unparse(&file);
        assert!(printed.contains(&obf));
        assert!(!printed.contains("my_callback"));
    }

    #[test]
    fn no_mangle_targeting_runtime_patched_symbol_is_refused() {
        let mut file: syn::File = syn::parse_str(
            r#"
            #[no_mangle]
            pub fn __murk_install_panic_hook() {}
            "#,
        )
        .unwrap();
        let reflect_observed = HashSet::new();
        let salts = crate::salt_index::StructSaltIndex::build(&file);
        let rename_map = RM::build(&file, &action_id(), b"", &reflect_observed, &salts);

        let err = rewrite_ffi_exports(&mut file, &rename_map, &action_id(), b"").unwrap_err();
        assert!(matches!(err, Error::Core(murk_core::Error::Policy(_))));
    }

    #[test]
    fn export_name_targeting_runtime_patched_symbol_is_refused() {
        let mut file: syn::File = syn::parse_str(
            r#"
            #[export_name = "__murk_install_panic_hook"]
            pub fn anything() {}
            "#,
        )
        .unwrap();
        let reflect_observed = HashSet::new();
        let salts = crate::salt_index::StructSaltIndex::build(&file);
        let rename_map = RM::build(&file, &action_id(), b"", &reflect_observed, &salts);

        let err = rewrite_ffi_exports(&mut file, &rename_map, &action_id(), b"").unwrap_err();
        assert!(matches!(err, Error::Core(murk_core::Error::Policy(_))));
    }
}
