//! Canonical struct-type strings used to salt field names (spec §4.1
//! "Salt choice", §9 "Cross-module type identity via anonymous structs").
//!
//! Two structurally identical anonymous/named structs in different crates
//! must obfuscate a field with the same name identically, so that
//! cross-crate field-by-field assignment between structurally equal types
//! keeps type-checking after rewrite. Salting fields by a canonical string
//! form of the *declaring struct*, instead of by crate action id, makes
//! that convergence automatic -- no cross-crate coordination needed.

/// Builds the canonical salt string for one struct, from its fields in
/// declaration order with attributes/tags stripped. `fields` is
/// `(field_name, field_type_string)` pairs as written in the source (after
/// whitespace normalization), in declaration order.
pub fn struct_canonical_form(fields: &[(String, String)]) -> String {
    let mut out = String::from("struct{");
    for (i, (name, ty)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(name);
        out.push(':');
        out.push_str(&normalize_type(ty));
    }
    out.push('}');
    out
}

/// Strips incidental whitespace differences (`Vec < u8 >` vs `Vec<u8>`) so
/// the same structural type always canonicalizes identically regardless of
/// formatting in the original source.
fn normalize_type(ty: &str) -> String {
    ty.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_insensitive() {
        let a = struct_canonical_form(&[("n".into(), "i32".into())]);
        let b = struct_canonical_form(&[("n".into(), " i32 ".into())]);
        assert_eq!(a, b);
    }

    #[test]
    fn order_sensitive() {
        let a = struct_canonical_form(&[("a".into(), "i32".into()), ("b".into(), "u8".into())]);
        let b = struct_canonical_form(&[("b".into(), "u8".into()), ("a".into(), "i32".into())]);
        assert_ne!(a, b);
    }

    #[test]
    fn identical_structs_identical_salt() {
        let a = struct_canonical_form(&[("n".into(), "i32".into())]);
        let b = struct_canonical_form(&[("n".into(), "i32".into())]);
        assert_eq!(a, b);
    }
}
