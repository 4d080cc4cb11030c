//! Symbolic reference resolution.
//!
//! Maps receiver expressions to stable identities used as fact keys.
//! Only direct reads are resolved: a local, a parameter, `this`, or the
//! implicit receiver of an enclosing lambda. Aliases are not followed:
//! after `val b = a`, `b` is its own reference bound at the `val` site and
//! shares no facts with `a`. This is a known limitation of the analysis.

use ctxeffects_core::{Callable, Expr, SourceLocation, TypeHierarchy};
use serde::Serialize;
use std::fmt;

/// Identity key for a trackable entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum SymbolicReference {
    /// No receiver: facts that hold for the whole context (caught exceptions).
    Global,
    /// `this` of the analyzed member function.
    This { owner: String },
    /// A value parameter of the analyzed callable.
    Param { name: String },
    /// A local variable, identified by its binding site.
    Local {
        name: String,
        binding: SourceLocation,
    },
    /// The implicit receiver of the lambda written at `site`.
    LambdaReceiver { site: SourceLocation },
}

impl fmt::Display for SymbolicReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolicReference::Global => f.write_str("<context>"),
            SymbolicReference::This { owner } => write!(f, "this@{}", owner),
            SymbolicReference::Param { name } | SymbolicReference::Local { name, .. } => {
                f.write_str(name)
            }
            SymbolicReference::LambdaReceiver { site } => {
                write!(f, "receiver of lambda at {}", site)
            }
        }
    }
}

#[derive(Debug, Clone)]
enum ScopeKind {
    /// The analyzed callable itself; frame boundary for `return`.
    Callable,
    /// A lambda body; frame boundary for `return`.
    Lambda {
        receiver: Option<(String, SymbolicReference)>,
        label: Option<String>,
    },
    Block,
}

#[derive(Debug, Clone)]
struct Scope {
    kind: ScopeKind,
    bindings: Vec<(String, SymbolicReference)>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Scope {
            kind,
            bindings: Vec::new(),
        }
    }

    fn is_frame(&self) -> bool {
        !matches!(self.kind, ScopeKind::Block)
    }
}

/// Lexical scope chain of the callable being analyzed.
#[derive(Debug, Clone)]
pub struct Resolver<'a> {
    hierarchy: &'a TypeHierarchy,
    owner: Option<String>,
    params: Vec<String>,
    scopes: Vec<Scope>,
}

impl<'a> Resolver<'a> {
    pub fn for_callable(callable: &Callable, hierarchy: &'a TypeHierarchy) -> Self {
        Resolver {
            hierarchy,
            owner: callable.owner.clone(),
            params: callable
                .params
                .iter()
                .filter(|p| !p.is_lambda())
                .map(|p| p.name.clone())
                .collect(),
            scopes: vec![Scope::new(ScopeKind::Callable)],
        }
    }

    pub fn push_block(&mut self) {
        self.scopes.push(Scope::new(ScopeKind::Block));
    }

    /// Enter a lambda body. `receiver` is the receiver type and identity for
    /// lambdas with receiver; `label` is the name `this@label` refers to.
    pub fn push_lambda(
        &mut self,
        receiver: Option<(String, SymbolicReference)>,
        label: Option<String>,
    ) {
        self.scopes
            .push(Scope::new(ScopeKind::Lambda { receiver, label }));
    }

    /// Leave the innermost scope, returning the locals it bound.
    pub fn pop(&mut self) -> Vec<SymbolicReference> {
        if self.scopes.len() <= 1 {
            return Vec::new();
        }
        self.scopes
            .pop()
            .map(|s| s.bindings.into_iter().map(|(_, r)| r).collect())
            .unwrap_or_default()
    }

    /// Bind a local in the innermost scope. Rebinding a name shadows it.
    pub fn bind(&mut self, name: &str, site: SourceLocation) -> SymbolicReference {
        let reference = SymbolicReference::Local {
            name: name.to_string(),
            binding: site,
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.push((name.to_string(), reference.clone()));
        }
        reference
    }

    /// Locals bound between the innermost frame (lambda or callable) and here.
    pub fn locals_in_frame(&self) -> Vec<SymbolicReference> {
        let mut locals = Vec::new();
        for scope in self.scopes.iter().rev() {
            locals.extend(scope.bindings.iter().map(|(_, r)| r.clone()));
            if scope.is_frame() {
                break;
            }
        }
        locals
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Resolve a receiver expression.
    pub fn resolve(&self, expr: &Expr) -> Option<SymbolicReference> {
        match expr {
            Expr::Var { name, .. } => self.resolve_name(name),
            Expr::This { label, .. } => self.resolve_this(label.as_deref()),
            Expr::Call { .. } | Expr::Lambda { .. } | Expr::Opaque { .. } => None,
        }
    }

    fn resolve_name(&self, name: &str) -> Option<SymbolicReference> {
        for scope in self.scopes.iter().rev() {
            if let Some((_, r)) = scope.bindings.iter().rev().find(|(n, _)| n == name) {
                return Some(r.clone());
            }
        }
        if self.params.iter().any(|p| p == name) {
            return Some(SymbolicReference::Param {
                name: name.to_string(),
            });
        }
        None
    }

    /// `this` resolves to the innermost lambda receiver, `this@label` to the
    /// lambda passed to `label` or to the enclosing class named `label`.
    pub fn resolve_this(&self, label: Option<&str>) -> Option<SymbolicReference> {
        for scope in self.scopes.iter().rev() {
            if let ScopeKind::Lambda {
                receiver: Some((_, r)),
                label: scope_label,
            } = &scope.kind
            {
                match label {
                    None => return Some(r.clone()),
                    Some(l) if scope_label.as_deref() == Some(l) => return Some(r.clone()),
                    Some(_) => {}
                }
            }
        }
        match (&self.owner, label) {
            (Some(owner), None) => Some(SymbolicReference::This {
                owner: owner.clone(),
            }),
            (Some(owner), Some(l)) if owner == l => Some(SymbolicReference::This {
                owner: owner.clone(),
            }),
            _ => None,
        }
    }

    /// Receiver of an unqualified call to a member of `owner_type`: the
    /// innermost lambda receiver of a compatible type, else the enclosing
    /// class instance.
    pub fn resolve_implicit(&self, owner_type: &str) -> Option<SymbolicReference> {
        for scope in self.scopes.iter().rev() {
            if let ScopeKind::Lambda {
                receiver: Some((ty, r)),
                ..
            } = &scope.kind
            {
                if self.hierarchy.is_subtype(ty, owner_type) {
                    return Some(r.clone());
                }
            }
        }
        match &self.owner {
            Some(owner) if self.hierarchy.is_subtype(owner, owner_type) => {
                Some(SymbolicReference::This {
                    owner: owner.clone(),
                })
            }
            _ => None,
        }
    }
}
