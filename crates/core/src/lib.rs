//! ctxeffects-core: program model and contract declarations.
//!
//! Provides everything the analyzer consumes before any flow analysis runs:
//!
//! - [`Program`] -- the program unit handed over by a front end
//! - [`load_program`] -- read a unit through a [`SourceProvider`]
//! - [`EffectRegistry`] / [`EffectFamily`] -- the pluggable effect kinds
//! - [`build_contract_table`] -- parse every contract block into a
//!   read-only [`ContractTable`], collecting [`DeclError`]s

pub mod ast;
pub mod contracts;
pub mod effect;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod source;

// ── Convenience re-exports: key types ────────────────────────────────

pub use ast::{
    Callable, CatchClause, Expr, LambdaType, Param, Program, SourceLocation, Stmt, TypeDecl,
    TypeHierarchy,
};
pub use contracts::{CallableContract, ContractClause, ContractTable};
pub use effect::{CallKind, Effect, EffectFamily, EffectRegistry, InvocationKind, ReceiverRef};
pub use error::{DeclError, LoadError};
pub use source::{FileSystemProvider, InMemoryProvider, SourceProvider};

// ── Convenience re-exports: entry points ─────────────────────────────

pub use contracts::build_contract_table;
pub use source::load_program;
