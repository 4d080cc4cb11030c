//! Structural call counting for `expectsTo` obligations.
//!
//! Counts, per control-flow path through a lambda body, how many times a
//! target member is invoked directly on the lambda receiver. Counts are
//! ranges: branches merge by union, loops that may call contribute an
//! unbounded range, and nested lambdas multiply their own count by the
//! invocation kind their callee declares.

use crate::error::AnalysisFault;
use crate::index::ProgramIndex;
use crate::reference::{Resolver, SymbolicReference};
use crate::state::CountRange;
use ctxeffects_core::{ContractTable, Expr, InvocationKind, Stmt};

/// Count of calls on the paths that fall through (`live`) and on the paths
/// that left the lambda through `return` (`exited`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tally {
    live: Option<CountRange>,
    exited: Option<CountRange>,
}

impl Tally {
    fn total(self) -> CountRange {
        union_opt(self.live, self.exited).unwrap_or(CountRange::ZERO)
    }
}

fn union_opt(a: Option<CountRange>, b: Option<CountRange>) -> Option<CountRange> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(b)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

pub struct CallCountVerifier<'a> {
    index: &'a ProgramIndex<'a>,
    table: &'a ContractTable,
    resolver: Resolver<'a>,
    max_depth: usize,
    depth: usize,
    target: String,
    receiver: SymbolicReference,
}

impl<'a> CallCountVerifier<'a> {
    /// `resolver` must already be positioned inside the lambda being checked.
    pub fn new(
        index: &'a ProgramIndex<'a>,
        table: &'a ContractTable,
        resolver: Resolver<'a>,
        max_depth: usize,
    ) -> Self {
        CallCountVerifier {
            index,
            table,
            resolver,
            max_depth,
            depth: 0,
            target: String::new(),
            receiver: SymbolicReference::Global,
        }
    }

    /// Range of direct calls of `target` on `receiver` over every path
    /// through `body`.
    pub fn count(
        &mut self,
        body: &[Stmt],
        target: &str,
        receiver: &SymbolicReference,
    ) -> Result<CountRange, AnalysisFault> {
        self.target = target.to_string();
        self.receiver = receiver.clone();
        self.depth = 0;
        Ok(self.block(body, CountRange::ZERO)?.total())
    }

    fn block(&mut self, stmts: &[Stmt], incoming: CountRange) -> Result<Tally, AnalysisFault> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(AnalysisFault::NestingTooDeep {
                limit: self.max_depth,
            });
        }
        self.resolver.push_block();

        let mut live = Some(incoming);
        let mut exited = None;
        for stmt in stmts {
            let Some(current) = live else { break };
            match stmt {
                Stmt::Let {
                    name,
                    init,
                    location,
                } => {
                    let n = self.expr(init)?;
                    self.resolver.bind(name, *location);
                    live = Some(current.add(n));
                }
                Stmt::Eval { expr } => live = Some(current.add(self.expr(expr)?)),
                Stmt::If {
                    condition,
                    then,
                    otherwise,
                    ..
                } => {
                    let base = match condition {
                        Some(c) => current.add(self.expr(c)?),
                        None => current,
                    };
                    let t = self.block(then, base)?;
                    let e = self.block(otherwise, base)?;
                    live = union_opt(t.live, e.live);
                    exited = union_opt(exited, union_opt(t.exited, e.exited));
                }
                Stmt::Loop { body, .. } => {
                    let once = self.block(body, CountRange::ZERO)?;
                    let prior = if once.total().max == Some(0) {
                        CountRange::ZERO
                    } else {
                        CountRange::ANY
                    };
                    if let Some(e) = once.exited {
                        exited = union_opt(exited, Some(current.add(prior).add(e)));
                    }
                    live = Some(current.add(prior));
                }
                Stmt::Try { body, catches, .. } => {
                    let t = self.block(body, current)?;
                    let handler_entry = current.union(t.total());
                    let mut merged_live = t.live;
                    let mut merged_exit = t.exited;
                    for clause in catches {
                        let h = self.block(&clause.body, handler_entry)?;
                        merged_live = union_opt(merged_live, h.live);
                        merged_exit = union_opt(merged_exit, h.exited);
                    }
                    live = merged_live;
                    exited = union_opt(exited, merged_exit);
                }
                Stmt::Return { value, .. } => {
                    let n = match value {
                        Some(v) => self.expr(v)?,
                        None => CountRange::ZERO,
                    };
                    exited = union_opt(exited, Some(current.add(n)));
                    live = None;
                }
            }
        }

        self.resolver.pop();
        self.depth -= 1;
        Ok(Tally { live, exited })
    }

    fn expr(&mut self, expr: &Expr) -> Result<CountRange, AnalysisFault> {
        match expr {
            Expr::Call {
                callee,
                receiver,
                args,
                ..
            } => {
                let mut n = match receiver {
                    Some(r) => self.expr(r)?,
                    None => CountRange::ZERO,
                };
                for arg in args.iter().filter(|a| !matches!(a, Expr::Lambda { .. })) {
                    n = n.add(self.expr(arg)?);
                }

                let resolved = match receiver {
                    Some(r) => self.resolver.resolve(r),
                    None => self
                        .index
                        .owner_of(callee)
                        .and_then(|owner| self.resolver.resolve_implicit(owner)),
                };
                if *callee == self.target && resolved.as_ref() == Some(&self.receiver) {
                    n = n.add(CountRange::ONE);
                }

                let decl = self.index.callable(callee);
                let contract = self.table.get(callee);
                for (i, arg) in args.iter().enumerate() {
                    let Expr::Lambda {
                        body,
                        location: site,
                        ..
                    } = arg
                    else {
                        continue;
                    };
                    let param = decl.and_then(|d| d.params.get(i));
                    let kind = match (param, contract) {
                        (Some(p), Some(c)) => c.invocation_kind(&p.name),
                        _ => None,
                    }
                    .unwrap_or(InvocationKind::Unknown);
                    let receiver = param.and_then(|p| p.receiver_type()).map(|ty| {
                        (
                            ty.to_string(),
                            SymbolicReference::LambdaReceiver { site: *site },
                        )
                    });
                    let label = callee.rsplit('.').next().map(str::to_string);
                    self.resolver.push_lambda(receiver, label);
                    let inner = self.block(body, CountRange::ZERO)?;
                    self.resolver.pop();
                    n = n.add(inner.total().times(CountRange::of_kind(kind)));
                }
                Ok(n)
            }
            Expr::Lambda { body, .. } => {
                self.resolver.push_lambda(None, None);
                let inner = self.block(body, CountRange::ZERO)?;
                self.resolver.pop();
                Ok(inner.total().times(CountRange::ANY))
            }
            Expr::Opaque { children } => {
                let mut n = CountRange::ZERO;
                for child in children {
                    n = n.add(self.expr(child)?);
                }
                Ok(n)
            }
            Expr::Var { .. } | Expr::This { .. } => Ok(CountRange::ZERO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxeffects_core::{build_contract_table, EffectRegistry, Program, SourceLocation};
    use serde_json::json;

    fn program() -> Program {
        serde_json::from_value(json!({
            "unit": "builders.kt",
            "callables": [
                {"name": "setY", "owner": "BazBuilder", "params": [{"name": "v"}],
                 "location": {"line": 1, "column": 1}},
                {"name": "run", "params": [{"name": "block", "lambda": {}}],
                 "contract": ["callsInPlace(block, InvocationKind.EXACTLY_ONCE)"],
                 "location": {"line": 2, "column": 1}},
                {"name": "repeat", "params": [{"name": "block", "lambda": {}}],
                 "contract": ["callsInPlace(block, InvocationKind.AT_LEAST_ONCE)"],
                 "location": {"line": 3, "column": 1}},
                {"name": "later", "params": [{"name": "block", "lambda": {}}],
                 "location": {"line": 4, "column": 1}}
            ]
        }))
        .unwrap()
    }

    fn set_y(line: u32) -> serde_json::Value {
        json!({"kind": "Eval", "expr": {"kind": "Call", "callee": "BazBuilder.setY",
               "args": [{"kind": "Opaque"}], "location": {"line": line, "column": 5}}})
    }

    fn wrap(callee: &str, body: serde_json::Value) -> serde_json::Value {
        json!({"kind": "Eval", "expr": {"kind": "Call", "callee": callee,
               "args": [{"kind": "Lambda", "body": body, "location": {"line": 20, "column": 9}}],
               "location": {"line": 20, "column": 5}}})
    }

    fn count(body: serde_json::Value) -> CountRange {
        let program = program();
        let index = ProgramIndex::new(&program);
        let table = build_contract_table(&program, &EffectRegistry::default());
        let stmts: Vec<Stmt> = serde_json::from_value(body).unwrap();
        let site = SourceLocation::new(10, 1);
        let receiver = SymbolicReference::LambdaReceiver { site };
        let callable = &program.callables[1];
        let mut resolver = Resolver::for_callable(callable, index.hierarchy());
        resolver.push_lambda(Some(("BazBuilder".into(), receiver.clone())), None);
        let mut v = CallCountVerifier::new(&index, &table, resolver, 64);
        v.count(&stmts, "BazBuilder.setY", &receiver).unwrap()
    }

    #[test]
    fn straight_line_calls_add_up() {
        assert_eq!(count(json!([])), CountRange::ZERO);
        assert_eq!(count(json!([set_y(1)])), CountRange::ONE);
        assert_eq!(count(json!([set_y(1), set_y(2)])), CountRange::exactly(2));
    }

    #[test]
    fn exclusive_branches_merge_by_union() {
        let body = json!([{"kind": "If", "then": [set_y(2)], "else": [set_y(3)]}]);
        assert_eq!(count(body), CountRange::ONE);
        let one_sided = json!([{"kind": "If", "then": [set_y(2)]}]);
        assert_eq!(count(one_sided), CountRange { min: 0, max: Some(1) });
    }

    #[test]
    fn loops_are_unbounded_when_calling() {
        let body = json!([{"kind": "Loop", "body": [set_y(2)]}]);
        assert_eq!(count(body), CountRange::ANY);
        let quiet = json!([{"kind": "Loop", "body": []}, set_y(3)]);
        assert_eq!(count(quiet), CountRange::ONE);
    }

    #[test]
    fn return_ends_a_path() {
        let body = json!([
            {"kind": "If", "then": [set_y(2), {"kind": "Return", "location": {"line": 2, "column": 20}}]},
            set_y(3)
        ]);
        assert_eq!(count(body), CountRange::ONE);
    }

    #[test]
    fn nested_lambdas_scale_by_invocation_kind() {
        assert_eq!(count(json!([wrap("run", json!([set_y(21)]))])), CountRange::ONE);
        assert_eq!(
            count(json!([wrap("repeat", json!([set_y(21)]))])),
            CountRange { min: 1, max: None }
        );
        assert_eq!(count(json!([wrap("later", json!([set_y(21)]))])), CountRange::ANY);
    }

    #[test]
    fn calls_through_aliases_are_not_counted() {
        let body = json!([
            {"kind": "Let", "name": "b", "init": {"kind": "This"}, "location": {"line": 2, "column": 5}},
            {"kind": "Eval", "expr": {"kind": "Call", "callee": "BazBuilder.setY",
             "receiver": {"kind": "Var", "name": "b"}, "location": {"line": 3, "column": 5}}}
        ]);
        assert_eq!(count(body), CountRange::ZERO);
    }

    #[test]
    fn explicit_this_receiver_is_counted() {
        let body = json!([{"kind": "Eval", "expr": {"kind": "Call", "callee": "BazBuilder.setY",
            "receiver": {"kind": "This"}, "location": {"line": 3, "column": 5}}}]);
        assert_eq!(count(body), CountRange::ONE);
    }
}
