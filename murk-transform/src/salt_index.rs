//! The field-to-struct back-index (spec §4.5 step 5): "each field pointer
//! to its canonical containing struct type, for hashing in §4.1". Built
//! once per crate before any renaming happens, shared by the identifier
//! rewrite pass and the reflection analyzer's recording step so both use
//! the exact same canonical salt for a given struct shape.

use std::collections::HashMap;

use murk_analyze::salt::struct_canonical_form;

pub struct StructSaltIndex {
    /// struct name -> canonical salt string (attributes/tags stripped).
    canonical_by_name: HashMap<String, String>,
}

impl StructSaltIndex {
    pub fn build(file: &syn::File) -> Self {
        let mut canonical_by_name = HashMap::new();
        for item in &file.items {
            if let syn::Item::Struct(s) = item {
                if let syn::Fields::Named(named) = &s.fields {
                    let fields: Vec<(String, String)> = named
                        .named
                        .iter()
                        .map(|f| {
                            let ty = &f.ty;
                            (
                                f.ident.as_ref().map(|i| i.to_string()).unwrap_or_default(),
                                quote::quote!(#ty).to_string(),
                            )
                        })
                        .collect();
                    canonical_by_name.insert(s.ident.to_string(), struct_canonical_form(&fields));
                }
            }
        }
        StructSaltIndex { canonical_by_name }
    }

    /// Merges another file's struct declarations into this index (used
    /// when a crate spans multiple source files).
    pub fn extend(&mut self, other: StructSaltIndex) {
        self.canonical_by_name.extend(other.canonical_by_name);
    }

    pub fn canonical_for(&self, struct_name: &str) -> Option<&str> {
        self.canonical_by_name.get(struct_name).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_shapes_share_a_salt() {
        let a: syn::File = syn::parse_str("struct Foo { n: i32 }").unwrap();
        let b: syn::File = syn::parse_str("struct Bar { n: i32 }").unwrap();
        let ia = StructSaltIndex::build(&a);
        let ib = StructSaltIndex::build(&b);
        assert_eq!(ia.canonical_for("Foo"), ib.canonical_for("Bar"));
    }
}
