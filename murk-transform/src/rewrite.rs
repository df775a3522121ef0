//! The identifier-rewrite pass (spec §4.5 step 8): walks every identifier
//! in a crate's parsed source and renames it via the salted naming policy,
//! unless a keep-list rule applies.
//!
//! murk does not run rustc's own type checker (it has no access to one
//! outside of invoking rustc itself, which would defeat the point of
//! rewriting source *before* rustc sees it), so name resolution here is
//! syntactic rather than semantic: a top-level item is renamed at its
//! definition and at every textually-matching identifier use within the
//! same crate's file set. This is a documented approximation of spec.md's
//! fully type-checked rewrite (see `DESIGN.md`, "identifier resolution").

use std::collections::{HashMap, HashSet};

use murk_core::naming::{self, Visibility};
use murk_core::policy;
use murk_core::ActionId;
use syn::visit_mut::{self, VisitMut};
use syn::{Ident, Item};

use crate::salt_index::StructSaltIndex;

/// Whether a top-level item may be renamed at all (spec §4.1 keep-list,
/// §4.5 step 8's per-identifier skip checks collapsed to the per-item
/// level since murk resolves names syntactically).
fn item_is_renamable(name: &str, is_pub_trait_impl: bool, has_test_attr: bool) -> bool {
    if policy::is_fixed_entry_name(name) {
        return false;
    }
    if policy::is_linker_special(name) {
        return false;
    }
    if is_pub_trait_impl {
        return false;
    }
    if has_test_attr {
        return false;
    }
    if name == "TestMain" {
        return false;
    }
    true
}

fn has_cfg_test_attr(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|a| {
        a.path().is_ident("test")
            || a.path()
                .segments
                .last()
                .map(|s| s.ident == "test")
                .unwrap_or(false)
    })
}

/// The rename map computed once per crate: every original identifier this
/// crate is allowed to obfuscate, mapped to its obfuscated spelling.
pub struct RenameMap {
    /// Top-level item names (functions, types, consts, modules) -> obfuscated.
    pub items: HashMap<String, String>,
    /// Struct/enum field or variant names -> obfuscated, only populated for
    /// names that are unambiguous across every struct/enum in the crate
    /// (see module docs: murk renames fields syntactically, and refuses to
    /// rename a field name that means different things -- i.e. belongs to
    /// structurally different structs -- in different places).
    pub fields: HashMap<String, String>,
    /// Original names this crate must *not* rename because something
    /// observes them via reflection-equivalent machinery (spec §4.4);
    /// takes priority over the maps above.
    pub reflect_observed: HashSet<String>,
}

impl RenameMap {
    /// Builds the rename map for one crate.
    ///
    /// * `reflect_observed_originals` -- original (not obfuscated) names
    ///   recorded in this crate's analysis entry's `reflect_object_names`.
    pub fn build(
        file: &syn::File,
        action_id: &ActionId,
        user_seed: &[u8],
        reflect_observed_originals: &HashSet<String>,
        salts: &StructSaltIndex,
    ) -> Self {
        let mut items = HashMap::new();
        let mut field_candidates: HashMap<String, HashSet<String>> = HashMap::new();

        for item in &file.items {
            collect_item(item, action_id, user_seed, reflect_observed_originals, &mut items);
            collect_fields(item, salts, reflect_observed_originals, &mut field_candidates);
        }

        // Only keep field renames whose obfuscated spelling is the same
        // regardless of which struct a given usage belongs to -- i.e. the
        // candidate set for that field name has exactly one member.
        let fields = field_candidates
            .into_iter()
            .filter_map(|(name, obf_set)| {
                if obf_set.len() == 1 {
                    Some((name, obf_set.into_iter().next().unwrap()))
                } else {
                    None
                }
            })
            .collect();

        RenameMap {
            items,
            fields,
            reflect_observed: reflect_observed_originals.clone(),
        }
    }
}

fn collect_item(
    item: &Item,
    action_id: &ActionId,
    user_seed: &[u8],
    observed: &HashSet<String>,
    out: &mut HashMap<String, String>,
) {
    let (name, is_pub, attrs, is_trait_impl_pub_method): (Option<&Ident>, bool, &[syn::Attribute], bool) =
        match item {
            Item::Fn(f) => (
                Some(&f.sig.ident),
                matches!(f.vis, syn::Visibility::Public(_)),
                &f.attrs,
                false,
            ),
            Item::Struct(s) => (
                Some(&s.ident),
                matches!(s.vis, syn::Visibility::Public(_)),
                &s.attrs,
                false,
            ),
            Item::Enum(e) => (
                Some(&e.ident),
                matches!(e.vis, syn::Visibility::Public(_)),
                &e.attrs,
                false,
            ),
            Item::Trait(t) => (
                Some(&t.ident),
                matches!(t.vis, syn::Visibility::Public(_)),
                &t.attrs,
                false,
            ),
            Item::Type(t) => (
                Some(&t.ident),
                matches!(t.vis, syn::Visibility::Public(_)),
                &t.attrs,
                false,
            ),
            Item::Const(c) => (
                Some(&c.ident),
                matches!(c.vis, syn::Visibility::Public(_)),
                &c.attrs,
                false,
            ),
            Item::Static(s) => (
                Some(&s.ident),
                matches!(s.vis, syn::Visibility::Public(_)),
                &s.attrs,
                false,
            ),
            Item::Mod(m) => (
                Some(&m.ident),
                matches!(m.vis, syn::Visibility::Public(_)),
                &m.attrs,
                false,
            ),
            Item::Impl(imp) => {
                // Exported trait-impl methods may satisfy a trait invisible
                // from this crate (spec §4.1: "exported methods"); skip all
                // of them. Inherent impl methods follow the normal rule.
                for impl_item in &imp.items {
                    if let syn::ImplItem::Fn(m) = impl_item {
                        let is_pub = matches!(m.vis, syn::Visibility::Public(_));
                        let is_trait_method = imp.trait_.is_some() && is_pub;
                        let name = m.sig.ident.to_string();
                        if observed.contains(&name) {
                            continue;
                        }
                        if !item_is_renamable(&name, is_trait_method, has_cfg_test_attr(&m.attrs)) {
                            continue;
                        }
                        let obf = naming::obfuscate_ident(
                            action_id.as_bytes(),
                            user_seed,
                            &name,
                            naming::visibility_of_pub(is_pub),
                        );
                        out.entry(name).or_insert(obf);
                    }
                }
                return;
            }
            _ => (None, false, &[][..], false),
        };

        let Some(ident) = name else { return };
        let name_s = ident.to_string();
        if observed.contains(&name_s) {
            return;
        }
        if !item_is_renamable(&name_s, is_trait_impl_pub_method, has_cfg_test_attr(attrs)) {
            return;
        }
        let obf = naming::obfuscate_ident(
            action_id.as_bytes(),
            user_seed,
            &name_s,
            naming::visibility_of_pub(is_pub),
        );
        out.entry(name_s).or_insert(obf);
}

fn collect_fields(
    item: &Item,
    salts: &StructSaltIndex,
    observed: &HashSet<String>,
    out: &mut HashMap<String, HashSet<String>>,
) {
    let Item::Struct(s) = item else { return };
    let Some(canonical) = salts.canonical_for(&s.ident.to_string()) else {
        return;
    };
    if let syn::Fields::Named(named) = &s.fields {
        for f in &named.named {
            let Some(ident) = &f.ident else { continue };
            let name = ident.to_string();
            if observed.contains(&name) || name.ends_with("SET") {
                // spec §8 boundary case: ASN.1-style `...SET` suffix fields
                // (carried over verbatim as a named keep-list example).
                continue;
            }
            let is_pub = matches!(f.vis, syn::Visibility::Public(_));
            let obf = naming::obfuscate_ident(
                canonical.as_bytes(),
                &[],
                &name,
                naming::visibility_of_pub(is_pub),
            );
            out.entry(name).or_default().insert(obf);
        }
    }
}

/// Applies a [`RenameMap`] to a parsed file in place, via `syn::visit_mut`.
pub struct Renamer<'a> {
    map: &'a RenameMap,
}

impl<'a> Renamer<'a> {
    pub fn new(map: &'a RenameMap) -> Self {
        Renamer { map }
    }

    pub fn apply(&mut self, file: &mut syn::File) {
        self.visit_file_mut(file);
    }

    fn rename_ident(&self, ident: &mut Ident) {
        let s = ident.to_string();
        if self.map.reflect_observed.contains(&s) {
            return;
        }
        if let Some(obf) = self.map.items.get(&s) {
            *ident = Ident::new(obf, ident.span());
        } else if let Some(obf) = self.map.fields.get(&s) {
            *ident = Ident::new(obf, ident.span());
        }
    }
}

impl<'a> VisitMut for Renamer<'a> {
    fn visit_ident_mut(&mut self, ident: &mut Ident) {
        self.rename_ident(ident);
        visit_mut::visit_ident_mut(self, ident);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salt_index::StructSaltIndex;

    #[test]
    fn renames_free_function_but_not_main() {
        let mut file: syn::File = syn::parse_str(
            r#"
            fn helper() {}
            fn main() { helper(); }
            "#,
        )
        .unwrap();
        let action_id = ActionId([4u8; 32]);
        let salts = StructSaltIndex::build(&file);
        let observed = HashSet::new();
        let map = RenameMap::build(&file, &action_id, b"", &observed, &salts);
        assert!(map.items.contains_key("helper"));
        assert!(!map.items.contains_key("main"));

        let mut renamer = Renamer::new(&map);
        renamer.apply(&mut file);
        let printed = prettyplease::unparse(&file);
        assert!(!printed.contains("fn helper"));
        assert!(printed.contains("fn main"));
    }

    #[test]
    fn reflect_observed_name_is_skipped() {
        let mut file: syn::File = syn::parse_str("pub struct Foo { pub n: i32 }").unwrap();
        let action_id = ActionId([4u8; 32]);
        let salts = StructSaltIndex::build(&file);
        let mut observed = HashSet::new();
        observed.insert("Foo".to_string());
        let map = RenameMap::build(&file, &action_id, b"", &observed, &salts);
        assert!(!map.items.contains_key("Foo"));

        let mut renamer = Renamer::new(&map);
        renamer.apply(&mut file);
        let printed = prettyplease::unparse(&file);
        assert!(printed.contains("Foo"));
    }
}
