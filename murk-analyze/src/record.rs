//! Recording a type/field as reflection-observed (spec §4.4 "Recording
//! types"): computes the item's would-be obfuscated name under the naming
//! policy and inserts it into `reflect_object_names`, keyed by the
//! obfuscated spelling so downstream consumers (the transform's de-
//! obfuscation table, §4.9) can reconstruct the original by obfuscated
//! name alone.

use murk_core::naming::{self, Visibility};
use murk_core::{ActionId, AnalysisEntry};

use crate::salt;

fn vis_of(is_pub: bool) -> Visibility {
    if is_pub {
        Visibility::Exported
    } else {
        Visibility::Unexported
    }
}

/// A struct or struct-like enum variant discovered in the crate being
/// analyzed, reduced to what recording needs: its own name/visibility and
/// its fields in declaration order.
#[derive(Debug, Clone)]
pub struct ObservedStruct {
    pub type_name: String,
    pub is_pub: bool,
    /// `(field_name, field_type_string, field_is_pub)` in declaration order.
    pub fields: Vec<(String, String, bool)>,
}

/// A plain enum: only variant names are observed (no cross-crate
/// structural-identity rationale applies to enum variants, so they are
/// salted with the crate's own action id rather than a canonical form).
#[derive(Debug, Clone)]
pub struct ObservedEnum {
    pub type_name: String,
    pub is_pub: bool,
    /// `(variant_name, variant_is_pub)`.
    pub variants: Vec<(String, bool)>,
}

/// Records a struct and all of its fields into `entry`.
pub fn record_struct(
    entry: &mut AnalysisEntry,
    item: &ObservedStruct,
    action_id: &ActionId,
    user_seed: &[u8],
) {
    let obf_type = naming::obfuscate_ident(
        action_id.as_bytes(),
        user_seed,
        &item.type_name,
        vis_of(item.is_pub),
    );
    entry
        .reflect_object_names
        .insert(obf_type, item.type_name.clone());

    let canonical_fields: Vec<(String, String)> = item
        .fields
        .iter()
        .map(|(n, t, _)| (n.clone(), t.clone()))
        .collect();
    let canonical = salt::struct_canonical_form(&canonical_fields);

    for (name, _ty, is_pub) in &item.fields {
        let obf_field =
            naming::obfuscate_ident(canonical.as_bytes(), user_seed, name, vis_of(*is_pub));
        entry.reflect_object_names.insert(obf_field, name.clone());
    }
}

/// Records an enum and all of its variant names into `entry`.
pub fn record_enum(
    entry: &mut AnalysisEntry,
    item: &ObservedEnum,
    action_id: &ActionId,
    user_seed: &[u8],
) {
    let obf_type = naming::obfuscate_ident(
        action_id.as_bytes(),
        user_seed,
        &item.type_name,
        vis_of(item.is_pub),
    );
    entry
        .reflect_object_names
        .insert(obf_type, item.type_name.clone());

    for (name, is_pub) in &item.variants {
        let obf_variant =
            naming::obfuscate_ident(action_id.as_bytes(), user_seed, name, vis_of(*is_pub));
        entry.reflect_object_names.insert(obf_variant, name.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_fields_salted_by_struct_shape_not_crate() {
        let action_a = ActionId([1u8; 32]);
        let action_b = ActionId([2u8; 32]);
        let item = ObservedStruct {
            type_name: "Foo".into(),
            is_pub: true,
            fields: vec![("n".into(), "i32".into(), true)],
        };

        let mut entry_a = AnalysisEntry::default();
        record_struct(&mut entry_a, &item, &action_a, b"");
        let mut entry_b = AnalysisEntry::default();
        record_struct(&mut entry_b, &item, &action_b, b"");

        // Type name obfuscation differs (crate-salted)...
        let type_a = entry_a
            .reflect_object_names
            .values()
            .find(|v| *v == "Foo");
        let type_b = entry_b
            .reflect_object_names
            .values()
            .find(|v| *v == "Foo");
        assert!(type_a.is_some() && type_b.is_some());

        // ...but the obfuscated spelling of field `n` is identical across
        // both crates, since it is salted by struct shape, not action id.
        let field_hash_a = entry_a
            .reflect_object_names
            .iter()
            .find(|(_, v)| *v == "n")
            .map(|(k, _)| k.clone());
        let field_hash_b = entry_b
            .reflect_object_names
            .iter()
            .find(|(_, v)| *v == "n")
            .map(|(k, _)| k.clone());
        assert_eq!(field_hash_a, field_hash_b);
    }
}
