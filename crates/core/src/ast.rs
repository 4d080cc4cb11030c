//! Program model consumed by the contract parser and the analyzer.
//!
//! A program unit is produced by an external front end and handed over as
//! JSON. Bodies are reduced to the control-flow skeleton the effect
//! tracker needs: bindings, calls, lambdas, branches, loops, try blocks and
//! returns. Everything else is `Opaque`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ──────────────────────────────────────────────
// Source locations
// ──────────────────────────────────────────────

/// Position of a construct in the analyzed source unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
    #[serde(default)]
    pub span: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        SourceLocation {
            line,
            column,
            span: 0,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// ──────────────────────────────────────────────
// Declarations
// ──────────────────────────────────────────────

/// A nominal type with its direct supertypes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub supertypes: Vec<String>,
}

/// Function type of a higher-order parameter. `receiver` is set for
/// lambdas with receiver (`T.() -> Unit`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LambdaType {
    #[serde(default)]
    pub receiver: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub lambda: Option<LambdaType>,
}

impl Param {
    pub fn is_lambda(&self) -> bool {
        self.lambda.is_some()
    }

    pub fn receiver_type(&self) -> Option<&str> {
        self.lambda.as_ref().and_then(|l| l.receiver.as_deref())
    }
}

/// A function or member function declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Callable {
    pub name: String,
    /// Declaring class for member functions.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub type_params: Vec<String>,
    #[serde(default)]
    pub params: Vec<Param>,
    /// Contract block clauses, one per entry, in source syntax.
    #[serde(default)]
    pub contract: Vec<String>,
    #[serde(default)]
    pub body: Option<Vec<Stmt>>,
    pub location: SourceLocation,
    /// Location of the closing brace; scope-exit diagnostics anchor here.
    #[serde(default)]
    pub end: Option<SourceLocation>,
}

impl Callable {
    /// Qualified id: `Owner.name` for members, `name` for top-level functions.
    pub fn id(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}.{}", owner, self.name),
            None => self.name.clone(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn end_location(&self) -> SourceLocation {
        self.end.unwrap_or(self.location)
    }
}

// ──────────────────────────────────────────────
// Bodies
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Stmt {
    /// `val name = init`
    Let {
        name: String,
        init: Expr,
        location: SourceLocation,
    },
    /// Expression statement.
    Eval { expr: Expr },
    If {
        #[serde(default)]
        condition: Option<Expr>,
        then: Vec<Stmt>,
        #[serde(default, rename = "else")]
        otherwise: Vec<Stmt>,
        #[serde(default)]
        location: SourceLocation,
    },
    /// Any loop form; the body may run zero or more times.
    Loop {
        body: Vec<Stmt>,
        #[serde(default)]
        location: SourceLocation,
    },
    Try {
        body: Vec<Stmt>,
        #[serde(default)]
        catches: Vec<CatchClause>,
        #[serde(default)]
        location: SourceLocation,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
        location: SourceLocation,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchClause {
    pub exception: String,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Expr {
    /// Call of a declared callable (by qualified id) or of an undeclared
    /// function such as a constructor or a lambda parameter.
    Call {
        callee: String,
        #[serde(default)]
        receiver: Option<Box<Expr>>,
        #[serde(default)]
        args: Vec<Expr>,
        location: SourceLocation,
    },
    Var {
        name: String,
        #[serde(default)]
        location: SourceLocation,
    },
    /// `this` or `this@label`.
    This {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        location: SourceLocation,
    },
    Lambda {
        body: Vec<Stmt>,
        location: SourceLocation,
        #[serde(default)]
        end: Option<SourceLocation>,
    },
    /// Anything the tracker does not model; sub-expressions are still walked.
    Opaque {
        #[serde(default)]
        children: Vec<Expr>,
    },
}

impl Expr {
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            Expr::Call { location, .. }
            | Expr::Var { location, .. }
            | Expr::This { location, .. }
            | Expr::Lambda { location, .. } => Some(*location),
            Expr::Opaque { .. } => None,
        }
    }
}

// ──────────────────────────────────────────────
// Program unit
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub unit: String,
    #[serde(default)]
    pub types: Vec<TypeDecl>,
    /// Extra open/close effect constructors declared by the unit.
    #[serde(default)]
    pub effects: Vec<String>,
    pub callables: Vec<Callable>,
}

impl Program {
    pub fn callable(&self, id: &str) -> Option<&Callable> {
        self.callables.iter().find(|c| c.id() == id)
    }

    pub fn callable_ids(&self) -> BTreeSet<String> {
        self.callables.iter().map(Callable::id).collect()
    }

    /// Build the subtype relation declared by `types`.
    pub fn hierarchy(&self) -> TypeHierarchy {
        TypeHierarchy::new(&self.types)
    }
}

/// Reflexive-transitive subtype relation over declared types.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    supertypes: BTreeMap<String, Vec<String>>,
}

impl TypeHierarchy {
    pub fn new(types: &[TypeDecl]) -> Self {
        let mut supertypes = BTreeMap::new();
        for t in types {
            supertypes.insert(t.name.clone(), t.supertypes.clone());
        }
        TypeHierarchy { supertypes }
    }

    /// True when `sub` is `sup` or (transitively) declares it as a supertype.
    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        let mut pending = vec![sub];
        let mut seen = BTreeSet::new();
        while let Some(current) = pending.pop() {
            if current == sup {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(parents) = self.supertypes.get(current) {
                pending.extend(parents.iter().map(String::as_str));
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn callable_id_includes_owner() {
        let c: Callable = serde_json::from_value(json!({
            "name": "commit",
            "owner": "Transaction",
            "location": {"line": 3, "column": 5}
        }))
        .unwrap();
        assert_eq!(c.id(), "Transaction.commit");
        assert_eq!(c.end_location(), SourceLocation::new(3, 5));
    }

    #[test]
    fn stmt_and_expr_deserialize_tagged() {
        let s: Stmt = serde_json::from_value(json!({
            "kind": "Eval",
            "expr": {
                "kind": "Call",
                "callee": "Transaction.start",
                "receiver": {"kind": "Var", "name": "t"},
                "location": {"line": 10, "column": 7}
            }
        }))
        .unwrap();
        match s {
            Stmt::Eval {
                expr: Expr::Call { callee, receiver, .. },
            } => {
                assert_eq!(callee, "Transaction.start");
                assert!(matches!(receiver.as_deref(), Some(Expr::Var { name, .. }) if name == "t"));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn if_else_uses_else_key() {
        let s: Stmt = serde_json::from_value(json!({
            "kind": "If",
            "then": [],
            "else": [{"kind": "Return", "location": {"line": 2, "column": 1}}]
        }))
        .unwrap();
        match s {
            Stmt::If { otherwise, .. } => assert_eq!(otherwise.len(), 1),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn hierarchy_is_transitive_and_reflexive() {
        let h = TypeHierarchy::new(&[
            TypeDecl {
                name: "FileNotFoundException".into(),
                supertypes: vec!["IOException".into()],
            },
            TypeDecl {
                name: "IOException".into(),
                supertypes: vec!["Exception".into()],
            },
        ]);
        assert!(h.is_subtype("FileNotFoundException", "Exception"));
        assert!(h.is_subtype("IOException", "IOException"));
        assert!(!h.is_subtype("IOException", "FileNotFoundException"));
        assert!(!h.is_subtype("Unknown", "Exception"));
    }

    #[test]
    fn location_ordering_is_line_then_column() {
        let a = SourceLocation::new(3, 9);
        let b = SourceLocation::new(4, 1);
        let c = SourceLocation::new(3, 10);
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }
}
