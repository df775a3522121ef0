//! Fixed-point propagation over call sites, stores, and casts (spec §4.4
//! "Propagation", "Termination", "Scope discipline").

use std::collections::HashSet;

use murk_core::{ActionId, AnalysisEntry};

use crate::cfg::{FunctionFacts, Operand};
use crate::record::{record_struct, ObservedStruct};

/// A minimal view of one crate's struct declarations, enough to "record"
/// a type the propagation loop marks observed (spec §4.4 "Recording
/// types"). Populated by the caller (murk-transform, which already parses
/// the crate with `syn` for the compiler transform) from every
/// `syn::ItemStruct` it sees.
#[derive(Debug, Clone)]
pub struct CrateStructTable {
    pub structs: Vec<ObservedStruct>,
}

impl CrateStructTable {
    pub fn find(&self, name: &str) -> Option<&ObservedStruct> {
        self.structs.iter().find(|s| s.type_name == name)
    }
}

/// Runs the propagation fixed point described in spec §4.4 over every
/// function in the crate, starting from `seed` (which already carries any
/// unioned-in import facts plus derive-based direct seeding, per §4.3's
/// "deep" cache entries).
///
/// Returns the final entry once a full pass adds nothing new. Both maps
/// only grow (never shrink) across iterations, guaranteeing termination
/// over the crate's finite function/type universe.
pub fn run_fixed_point(
    functions: &[FunctionFacts],
    structs: &CrateStructTable,
    mut entry: AnalysisEntry,
    action_id: &ActionId,
    user_seed: &[u8],
) -> AnalysisEntry {
    loop {
        let before = entry.clone();
        one_pass(functions, structs, &mut entry, action_id, user_seed);
        if entry.is_superset_of(&before) && before.is_superset_of(&entry) {
            break;
        }
    }
    entry
}

fn one_pass(
    functions: &[FunctionFacts],
    structs: &CrateStructTable,
    entry: &mut AnalysisEntry,
    action_id: &ActionId,
    user_seed: &[u8],
) {
    for func in functions {
        propagate_calls(func, structs, entry, action_id, user_seed);
        propagate_stores(func, structs, entry, action_id, user_seed);
        propagate_casts(func, structs, entry, action_id, user_seed);
    }
}

/// For every call site, looks up the callee's entry in `reflect_apis`; for
/// each observed parameter index, traces that argument backward to either
/// an originating struct literal (recorded directly) or a parameter of the
/// containing function (whose index is added to *that* function's own
/// entry, continuing propagation interprocedurally).
fn propagate_calls(
    func: &FunctionFacts,
    structs: &CrateStructTable,
    entry: &mut AnalysisEntry,
    action_id: &ActionId,
    user_seed: &[u8],
) {
    let mut newly_observed_params: HashSet<usize> = HashSet::new();

    for call in &func.calls {
        let observed_indices = match find_apis_entry(entry, &call.callee_path) {
            Some(idx) => idx,
            None => continue,
        };
        for &idx in &observed_indices {
            let Some(arg) = call.args.get(idx) else {
                continue;
            };
            record_operand(arg, func, structs, entry, action_id, user_seed, &mut newly_observed_params);
        }
    }

    if !newly_observed_params.is_empty() {
        entry
            .reflect_apis
            .entry(func.name.clone())
            .or_default()
            .extend(newly_observed_params);
    }
}

fn find_apis_entry(entry: &AnalysisEntry, callee_path: &str) -> Option<HashSet<usize>> {
    if let Some(set) = entry.reflect_apis.get(callee_path) {
        return Some(set.clone());
    }
    // Best-effort: also match on the last path segment, since call sites
    // are resolved textually rather than through full name resolution
    // (murk-analyze has no type checker; see SPEC_FULL.md §4.4).
    let short = callee_path.rsplit("::").next().unwrap_or(callee_path);
    entry
        .reflect_apis
        .iter()
        .find(|(k, _)| k.rsplit("::").next() == Some(short))
        .map(|(_, v)| v.clone())
}

fn record_operand(
    op: &Operand,
    func: &FunctionFacts,
    structs: &CrateStructTable,
    entry: &mut AnalysisEntry,
    action_id: &ActionId,
    user_seed: &[u8],
    newly_observed_params: &mut HashSet<usize>,
) {
    match op.base() {
        Operand::StructLiteral(name) => {
            if let Some(s) = structs.find(name) {
                record_struct(entry, s, action_id, user_seed);
            }
        }
        Operand::Local(name) => {
            // Is it a parameter of the containing function?
            if let Some(idx) = func.params.iter().position(|(n, _)| n == name) {
                newly_observed_params.insert(idx);
                return;
            }
            // Is it a local bound to a known struct literal or type?
            if let Some(ty) = func.locals.get(name) {
                if let Some(s) = structs.find(ty) {
                    record_struct(entry, s, action_id, user_seed);
                }
            }
        }
        _ => {}
    }
}

/// For every store to a field of an address whose *containing* type is
/// already observed, marks the stored value's originating type observed
/// too (spec §4.4's store-propagation rule).
fn propagate_stores(
    func: &FunctionFacts,
    structs: &CrateStructTable,
    entry: &mut AnalysisEntry,
    action_id: &ActionId,
    user_seed: &[u8],
) {
    for store in &func.stores {
        let Operand::Local(base_name) = store.place.base() else {
            continue;
        };
        let place_ty = func
            .locals
            .get(base_name)
            .or_else(|| {
                func.params
                    .iter()
                    .find(|(n, _)| n == base_name)
                    .map(|(_, t)| t)
            });
        let Some(place_ty) = place_ty else { continue };
        let short_ty = short_type_name(place_ty);
        if !is_observed_type(entry, &short_ty) {
            continue;
        }
        if let Operand::StructLiteral(value_ty) = store.value.base() {
            if let Some(s) = structs.find(value_ty) {
                record_struct(entry, s, action_id, user_seed);
            }
        }
    }
}

/// For every type conversion whose source type is observed, marks the
/// destination type observed (spec §4.4's cast-propagation rule).
fn propagate_casts(
    func: &FunctionFacts,
    structs: &CrateStructTable,
    entry: &mut AnalysisEntry,
    action_id: &ActionId,
    user_seed: &[u8],
) {
    for cast in &func.casts {
        let Operand::Local(base_name) = cast.source.base() else {
            continue;
        };
        let source_ty = func
            .locals
            .get(base_name)
            .or_else(|| {
                func.params
                    .iter()
                    .find(|(n, _)| n == base_name)
                    .map(|(_, t)| t)
            });
        let Some(source_ty) = source_ty else { continue };
        if !is_observed_type(entry, &short_type_name(source_ty)) {
            continue;
        }
        let dest_ty = short_type_name(&cast.target_type);
        if let Some(s) = structs.find(&dest_ty) {
            record_struct(entry, s, action_id, user_seed);
        }
    }
}

fn short_type_name(ty: &str) -> String {
    ty.trim_start_matches('&')
        .trim_start_matches("mut ")
        .rsplit("::")
        .next()
        .unwrap_or(ty)
        .to_string()
}

fn is_observed_type(entry: &AnalysisEntry, type_name: &str) -> bool {
    entry
        .reflect_object_names
        .values()
        .any(|original| original == type_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::lower_item_fn;

    #[test]
    fn call_site_propagation_records_struct_literal() {
        let item: syn::ItemFn = syn::parse_str(
            r#"
            fn f() {
                let v = Foo { n: 1 };
                core::any::Any::downcast_ref::<Foo>(v);
            }
            "#,
        )
        .unwrap();
        let func = lower_item_fn(&item, "crate::f".to_string());

        let structs = CrateStructTable {
            structs: vec![ObservedStruct {
                type_name: "Foo".to_string(),
                is_pub: false,
                fields: vec![("n".to_string(), "i32".to_string(), false)],
            }],
        };

        let seed = AnalysisEntry::seed();
        let action_id = ActionId([5u8; 32]);
        let result = run_fixed_point(&[func], &structs, seed, &action_id, b"");
        assert!(result
            .reflect_object_names
            .values()
            .any(|v| v == "Foo" || v == "n"));
    }

    #[test]
    fn param_flowing_into_reflection_marks_containing_fn() {
        let item: syn::ItemFn = syn::parse_str(
            r#"
            fn inspect(x: Foo) {
                core::any::Any::downcast_ref::<Foo>(x);
            }
            "#,
        )
        .unwrap();
        let func = lower_item_fn(&item, "crate::inspect".to_string());
        let structs = CrateStructTable { structs: vec![] };
        let seed = AnalysisEntry::seed();
        let action_id = ActionId([6u8; 32]);
        let result = run_fixed_point(&[func], &structs, seed, &action_id, b"");
        assert!(result.reflect_apis.contains_key("crate::inspect"));
        assert!(result.reflect_apis["crate::inspect"].contains(&0));
    }
}
