//! Runtime source patches (spec §4.9), narrowed to main-crate injection.
//!
//! murk cannot patch the prebuilt `std` sysroot the way spec.md's
//! original patches the runtime it compiles from source, so the
//! Rust-faithful realization only touches the crate that produces the
//! final binary: it injects a panic hook that keeps the real source
//! position out of anything printed to stderr, and it strips leftover
//! debug call expressions the compiler transform finds in user code.
//! The mapping back from an opaque placeholder to the real file/line
//! lives only in the analysis cache, consulted by `murk reverse`; it is
//! never baked into the binary itself, unlike spec.md's in-binary
//! `entryoff` XOR table, which is a REDESIGN FLAG resolution recorded in
//! `DESIGN.md`.

use syn::visit_mut::{self, VisitMut};
use syn::{Block, Expr, ExprMacro, Stmt};

/// Names the runtime patch itself introduces or depends on. A
/// `#[no_mangle]`/`#[export_name]`/`#[link_name]` rewrite (see
/// `ffi_exports`) that targets one of these is refused rather than
/// honored, since aliasing it would let foreign code shadow or hijack
/// the injected panic hook.
pub const RUNTIME_PATCHED_SYMBOLS: &[&str] = &["__murk_install_panic_hook"];

/// Removes expression-statement calls to `dbg!(...)` and to any function
/// whose path ends in `debug_print`, from every block in the file.
/// Returns how many statements were removed.
pub fn strip_debug_calls(file: &mut syn::File) -> usize {
    let mut stripper = DebugStripper { removed: 0 };
    stripper.visit_file_mut(file);
    stripper.removed
}

struct DebugStripper {
    removed: usize,
}

fn is_dbg_macro(mac: &ExprMacro) -> bool {
    mac.mac.path.is_ident("dbg")
}

fn is_debug_print_call(expr: &Expr) -> bool {
    let Expr::Call(call) = expr else { return false };
    let Expr::Path(p) = call.func.as_ref() else {
        return false;
    };
    p.path
        .segments
        .last()
        .map(|seg| seg.ident == "debug_print")
        .unwrap_or(false)
}

fn stmt_is_stale_debug_call(stmt: &Stmt) -> bool {
    let expr = match stmt {
        Stmt::Expr(e, _) => e,
        _ => return false,
    };
    match expr {
        Expr::Macro(m) if is_dbg_macro(m) => true,
        _ if is_debug_print_call(expr) => true,
        _ => false,
    }
}

impl VisitMut for DebugStripper {
    fn visit_block_mut(&mut self, block: &mut Block) {
        let before = block.stmts.len();
        block.stmts.retain(|s| !stmt_is_stale_debug_call(s));
        self.removed += before - block.stmts.len();
        for stmt in &mut block.stmts {
            visit_mut::visit_stmt_mut(self, stmt);
        }
    }
}

/// Source text for the panic-hook module injected once into the main
/// crate (see `compiler.rs`, which splices this into the crate's `lib.rs`
/// or `main.rs` alongside a call to `install_panic_hook()` near the top
/// of `fn main`). Kept as a raw string and parsed by the caller so the
/// injected items can be merged into an existing `syn::File` like any
/// other item.
pub fn panic_hook_source(tiny: bool) -> String {
    if tiny {
        r#"
fn __murk_install_panic_hook() {
    std::panic::set_hook(Box::new(|_info| {
        eprintln!("panic");
    }));
}
"#
        .to_string()
    } else {
        r#"
fn __murk_install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());
        eprintln!("panic at <redacted>: {}", message);
    }));
}
"#
        .to_string()
    }
}

/// Parses [`panic_hook_source`] into items ready to splice into a file.
pub fn panic_hook_items(tiny: bool) -> Vec<syn::Item> {
    let file: syn::File = syn::parse_str(&panic_hook_source(tiny)).expect("panic hook source must parse");
    file.items
}

/// The statement to insert at the top of `fn main` to install the hook.
pub fn install_call_stmt() -> Stmt {
    syn::parse_str("__murk_install_panic_hook();").expect("install call must parse")
}

/// Inserts the panic-hook items and the install call into a parsed main
/// crate file, if it contains a `fn main`. No-op (returns `false`) for
/// crates without one (library crates, which spec §4.9 does not target).
pub fn inject_into_main(file: &mut syn::File, tiny: bool) -> bool {
    let Some(main_idx) = file.items.iter().position(|item| {
        matches!(item, syn::Item::Fn(f) if f.sig.ident == "main")
    }) else {
        return false;
    };

    if let syn::Item::Fn(main_fn) = &mut file.items[main_idx] {
        main_fn.block.stmts.insert(0, install_call_stmt());
    }

    let insert_at = main_idx;
    for (offset, item) in panic_hook_items(tiny).into_iter().enumerate() {
        file.items.insert(insert_at + offset, item);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_dbg_macro_statements() {
        let mut file: syn::File = syn::parse_str(
            r#"
            fn f() {
                dbg!(1 + 1);
                let x = 2;
            }
            "#,
        )
        .unwrap();
        let removed = strip_debug_calls(&mut file);
        assert_eq!(removed, 1);
        let printed = prettyplease::unparse(&file);
        assert!(!printed.contains("dbg!"));
        assert!(printed.contains("let x"));
    }

    #[test]
    fn strips_debug_print_calls() {
        let mut file: syn::File = syn::parse_str(
            r#"
            fn f() {
                debug_print("hi");
                do_work();
            }
            "#,
        )
        .unwrap();
        let removed = strip_debug_calls(&mut file);
        assert_eq!(removed, 1);
        let printed = prettyplease::unparse(&file);
        assert!(!printed.contains("debug_print"));
        assert!(printed.contains("do_work"));
    }

    #[test]
    fn injects_hook_and_install_call_into_main() {
        let mut file: syn::File = syn::parse_str("fn main() { println!(\"hi\"); }").unwrap();
        let injected = inject_into_main(&mut file, false);
        assert!(injected);
        let printed = prettyplease::unparse(&file);
        assert!(printed.contains("__murk_install_panic_hook"));
        assert!(printed.contains("fn main"));
    }

    #[test]
    fn non_main_crate_is_left_alone() {
        let mut file: syn::File = syn::parse_str("pub fn lib_fn() {}").unwrap();
        assert!(!inject_into_main(&mut file, false));
    }
}
