//! Derive-based seeding (SPEC_FULL.md §4.4): in Rust, the dominant
//! reflection-equivalent hazard is not runtime propagation but compile-time
//! field/variant-name observation by derive macros -- `serde::Serialize`/
//! `Deserialize` read field names (or `#[serde(rename)]` targets) to build
//! the wire format, and `clap::ValueEnum`/`Parser` parse variant/field
//! names from user-facing text. Both are seeded directly, with no need for
//! the call-site propagation `reflect_apis` exists for.

use murk_core::{ActionId, AnalysisEntry};
use syn::{Fields, Item, Visibility};

use crate::record::{record_enum, record_struct, ObservedEnum, ObservedStruct};

const OBSERVING_DERIVES: &[&str] = &[
    "Serialize",
    "Deserialize",
    "ValueEnum",
    "Parser",
    "Subcommand",
    "Debug",
];

fn is_pub(vis: &Visibility) -> bool {
    matches!(vis, Visibility::Public(_))
}

fn has_observing_derive(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| {
        if !attr.path().is_ident("derive") {
            return false;
        }
        let mut found = false;
        let _ = attr.parse_nested_meta(|meta| {
            if let Some(ident) = meta.path.segments.last() {
                if OBSERVING_DERIVES.contains(&ident.ident.to_string().as_str()) {
                    found = true;
                }
            }
            Ok(())
        });
        found
    })
}

fn type_to_string(ty: &syn::Type) -> String {
    quote::quote!(#ty).to_string()
}

fn struct_fields(fields: &Fields) -> Vec<(String, String, bool)> {
    match fields {
        Fields::Named(named) => named
            .named
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let name = f
                    .ident
                    .as_ref()
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| i.to_string());
                (name, type_to_string(&f.ty), is_pub(&f.vis))
            })
            .collect(),
        Fields::Unnamed(unnamed) => unnamed
            .unnamed
            .iter()
            .enumerate()
            .map(|(i, f)| (i.to_string(), type_to_string(&f.ty), is_pub(&f.vis)))
            .collect(),
        Fields::Unit => Vec::new(),
    }
}

/// Walks every top-level item in `file` and seeds `entry` for every struct
/// or enum carrying a reflection-observing derive.
pub fn seed_from_derives(
    entry: &mut AnalysisEntry,
    file: &syn::File,
    action_id: &ActionId,
    user_seed: &[u8],
) {
    for item in &file.items {
        match item {
            Item::Struct(s) if has_observing_derive(&s.attrs) => {
                let observed = ObservedStruct {
                    type_name: s.ident.to_string(),
                    is_pub: is_pub(&s.vis),
                    fields: struct_fields(&s.fields),
                };
                record_struct(entry, &observed, action_id, user_seed);
            }
            Item::Enum(e) if has_observing_derive(&e.attrs) => {
                let observed = ObservedEnum {
                    type_name: e.ident.to_string(),
                    is_pub: is_pub(&e.vis),
                    variants: e
                        .variants
                        .iter()
                        .map(|v| (v.ident.to_string(), is_pub(&e.vis)))
                        .collect(),
                };
                record_enum(entry, &observed, action_id, user_seed);

                // Struct-like / tuple-like variants also carry field names
                // serde observes directly (e.g. `enum E { V { x: i32 } }`).
                for v in &e.variants {
                    if matches!(v.fields, Fields::Unit) {
                        continue;
                    }
                    let observed = ObservedStruct {
                        type_name: format!("{}::{}", e.ident, v.ident),
                        is_pub: is_pub(&e.vis),
                        fields: struct_fields(&v.fields),
                    };
                    record_struct(entry, &observed, action_id, user_seed);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_struct_is_seeded() {
        let file: syn::File = syn::parse_str(
            r#"
            #[derive(serde::Serialize, serde::Deserialize)]
            pub struct Foo {
                pub bar: i32,
                baz: String,
            }
            "#,
        )
        .unwrap();
        let mut entry = AnalysisEntry::default();
        seed_from_derives(&mut entry, &file, &ActionId([1u8; 32]), b"");
        let names: Vec<&String> = entry.reflect_object_names.values().collect();
        assert!(names.iter().any(|n| n.as_str() == "Foo"));
        assert!(names.iter().any(|n| n.as_str() == "bar"));
        assert!(names.iter().any(|n| n.as_str() == "baz"));
    }

    #[test]
    fn plain_struct_not_seeded() {
        let file: syn::File = syn::parse_str("pub struct Foo { pub bar: i32 }").unwrap();
        let mut entry = AnalysisEntry::default();
        seed_from_derives(&mut entry, &file, &ActionId([1u8; 32]), b"");
        assert!(entry.reflect_object_names.is_empty());
    }

    #[test]
    fn value_enum_variants_seeded() {
        let file: syn::File = syn::parse_str(
            r#"
            #[derive(clap::ValueEnum, Clone)]
            pub enum Mode { Fast, Slow }
            "#,
        )
        .unwrap();
        let mut entry = AnalysisEntry::default();
        seed_from_derives(&mut entry, &file, &ActionId([1u8; 32]), b"");
        let names: Vec<&String> = entry.reflect_object_names.values().collect();
        assert!(names.iter().any(|n| n.as_str() == "Fast"));
        assert!(names.iter().any(|n| n.as_str() == "Slow"));
    }
}
