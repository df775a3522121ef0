//! A simplified, flow-insensitive-per-function CFG lowering (SPEC_FULL.md
//! §4.4): rather than a full SSA form, murk-analyze lowers each function
//! body into a flat list of operand-level facts -- call sites, casts, and
//! field stores -- sufficient to drive the same backward-taint propagation
//! spec.md §4.4 describes, without needing a type checker.

use std::collections::HashMap;

use syn::visit::{self, Visit};
use syn::{Expr, ExprCall, ExprCast, ExprMethodCall, ImplItemFn, ItemFn, Pat};

/// A simplified operand: enough structure to walk backward through field
/// projections, derefs, indexing and casts to an originating local or
/// parameter, as spec §4.4's propagation rule requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A bare identifier -- either a local variable or a parameter.
    Local(String),
    Field(Box<Operand>, String),
    Deref(Box<Operand>),
    Index(Box<Operand>),
    Cast(Box<Operand>, String),
    /// A struct/tuple-struct literal of a known named type -- the
    /// "originating allocation" spec §4.4 traces backward to.
    StructLiteral(String),
    /// Anything else (method chains, literals, macro calls): propagation
    /// stops here, same as spec.md's analyzer giving up past an opaque
    /// operation.
    Opaque,
}

impl Operand {
    /// Follows `Field`/`Deref`/`Index`/`Cast` wrappers down to the
    /// underlying base operand, mirroring spec §4.4's "trace backwards...
    /// to find either (a) the originating allocation... or (b) a
    /// parameter".
    pub fn base(&self) -> &Operand {
        match self {
            Operand::Field(inner, _)
            | Operand::Deref(inner)
            | Operand::Index(inner)
            | Operand::Cast(inner, _) => inner.base(),
            other => other,
        }
    }
}

fn expr_to_operand(expr: &Expr) -> Operand {
    match expr {
        Expr::Path(p) if p.path.segments.len() == 1 => {
            Operand::Local(p.path.segments[0].ident.to_string())
        }
        Expr::Field(f) => Operand::Field(
            Box::new(expr_to_operand(&f.base)),
            match &f.member {
                syn::Member::Named(ident) => ident.to_string(),
                syn::Member::Unnamed(idx) => idx.index.to_string(),
            },
        ),
        Expr::Unary(u) if matches!(u.op, syn::UnOp::Deref(_)) => {
            Operand::Deref(Box::new(expr_to_operand(&u.expr)))
        }
        Expr::Reference(r) => expr_to_operand(&r.expr),
        Expr::Paren(p) => expr_to_operand(&p.expr),
        Expr::Index(i) => Operand::Index(Box::new(expr_to_operand(&i.expr))),
        Expr::Cast(c) => Operand::Cast(
            Box::new(expr_to_operand(&c.expr)),
            {
                let ty = &c.ty;
                quote::quote!(#ty).to_string()
            },
        ),
        Expr::Struct(s) if s.path.segments.len() >= 1 => Operand::StructLiteral(
            s.path
                .segments
                .last()
                .map(|s| s.ident.to_string())
                .unwrap_or_default(),
        ),
        _ => Operand::Opaque,
    }
}

fn path_to_string(path: &syn::Path) -> String {
    path.segments
        .iter()
        .map(|s| s.ident.to_string())
        .collect::<Vec<_>>()
        .join("::")
}

/// One call site: the (best-effort, textual) callee path and its operand
/// arguments in order.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub callee_path: String,
    pub args: Vec<Operand>,
}

/// One cast: `<expr> as <Type>`.
#[derive(Debug, Clone)]
pub struct CastSite {
    pub source: Operand,
    pub target_type: String,
}

/// One field store: `<place>.<field> = <value>`.
#[derive(Debug, Clone)]
pub struct StoreSite {
    pub place: Operand,
    pub value: Operand,
}

/// All per-function facts collected from one function's body.
#[derive(Debug, Clone, Default)]
pub struct FunctionFacts {
    pub name: String,
    pub is_pub: bool,
    /// Parameter name -> declared type string, in declaration order.
    pub params: Vec<(String, String)>,
    /// Local `let` bindings with a known type or struct-literal
    /// initializer, name -> declared/inferred type string.
    pub locals: HashMap<String, String>,
    pub calls: Vec<CallSite>,
    pub casts: Vec<CastSite>,
    pub stores: Vec<StoreSite>,
}

struct FnVisitor<'a> {
    facts: &'a mut FunctionFacts,
}

impl<'a> Visit<'a> for FnVisitor<'a> {
    fn visit_local(&mut self, node: &'a syn::Local) {
        if let Pat::Type(pt) = &node.pat {
            if let Pat::Ident(id) = &*pt.pat {
                let ty = &pt.ty;
                self.facts
                    .locals
                    .insert(id.ident.to_string(), quote::quote!(#ty).to_string());
            }
        } else if let Pat::Ident(id) = &node.pat {
            if let Some(init) = &node.init {
                if let Expr::Struct(s) = &*init.expr {
                    let ty = s
                        .path
                        .segments
                        .last()
                        .map(|s| s.ident.to_string())
                        .unwrap_or_default();
                    self.facts.locals.insert(id.ident.to_string(), ty);
                }
            }
        }
        visit::visit_local(self, node);
    }

    fn visit_expr_call(&mut self, node: &'a ExprCall) {
        if let Expr::Path(p) = &*node.func {
            self.facts.calls.push(CallSite {
                callee_path: path_to_string(&p.path),
                args: node.args.iter().map(expr_to_operand).collect(),
            });
        }
        visit::visit_expr_call(self, node);
    }

    fn visit_expr_method_call(&mut self, node: &'a ExprMethodCall) {
        let mut args = vec![expr_to_operand(&node.receiver)];
        args.extend(node.args.iter().map(expr_to_operand));
        self.facts.calls.push(CallSite {
            callee_path: node.method.to_string(),
            args,
        });
        visit::visit_expr_method_call(self, node);
    }

    fn visit_expr_cast(&mut self, node: &'a ExprCast) {
        let ty = &node.ty;
        self.facts.casts.push(CastSite {
            source: expr_to_operand(&node.expr),
            target_type: quote::quote!(#ty).to_string(),
        });
        visit::visit_expr_cast(self, node);
    }

    fn visit_expr_assign(&mut self, node: &'a syn::ExprAssign) {
        if matches!(&*node.left, Expr::Field(_)) {
            self.facts.stores.push(StoreSite {
                place: expr_to_operand(&node.left),
                value: expr_to_operand(&node.right),
            });
        }
        visit::visit_expr_assign(self, node);
    }
}

fn params_of(sig: &syn::Signature) -> Vec<(String, String)> {
    sig.inputs
        .iter()
        .filter_map(|arg| match arg {
            syn::FnArg::Typed(pt) => {
                if let Pat::Ident(id) = &*pt.pat {
                    let ty = &pt.ty;
                    Some((id.ident.to_string(), quote::quote!(#ty).to_string()))
                } else {
                    None
                }
            }
            syn::FnArg::Receiver(_) => Some(("self".to_string(), "Self".to_string())),
        })
        .collect()
}

/// Lowers one free function into [`FunctionFacts`].
pub fn lower_item_fn(item: &ItemFn, qualified_name: String) -> FunctionFacts {
    let mut facts = FunctionFacts {
        name: qualified_name,
        is_pub: matches!(item.vis, syn::Visibility::Public(_)),
        params: params_of(&item.sig),
        ..Default::default()
    };
    let mut visitor = FnVisitor { facts: &mut facts };
    visitor.visit_block(&item.block);
    facts
}

/// Lowers one `impl` method into [`FunctionFacts`].
pub fn lower_impl_fn(item: &ImplItemFn, qualified_name: String) -> FunctionFacts {
    let mut facts = FunctionFacts {
        name: qualified_name,
        is_pub: matches!(item.vis, syn::Visibility::Public(_)),
        params: params_of(&item.sig),
        ..Default::default()
    };
    let mut visitor = FnVisitor { facts: &mut facts };
    visitor.visit_block(&item.block);
    facts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_call_sites_and_casts() {
        let item: ItemFn = syn::parse_str(
            r#"
            fn f(x: Foo) {
                let y = x;
                core::any::Any::downcast_ref::<Bar>(y);
                let z = 1u8 as u32;
            }
            "#,
        )
        .unwrap();
        let facts = lower_item_fn(&item, "crate::f".to_string());
        assert_eq!(facts.params[0].0, "x");
        assert!(!facts.calls.is_empty());
        assert_eq!(facts.casts.len(), 1);
    }
}
