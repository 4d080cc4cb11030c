//! Flow-sensitive effect tracking over one callable body.
//!
//! The tracker walks the control-flow skeleton of a body, threading a
//! [`FlowState`] through statements. At each call of a contracted callee
//! it checks `requires` clauses, applies `provides`/`starts`/`closes`, then
//! analyzes lambda arguments according to the callee's `callsInPlace`
//! declaration for that parameter.

use crate::call_count::CallCountVerifier;
use crate::config::AnalyzerConfig;
use crate::diagnostics::Diagnostic;
use crate::error::AnalysisFault;
use crate::index::ProgramIndex;
use crate::reference::{Resolver, SymbolicReference};
use crate::state::{FactKey, FactValue, FlowState};
use ctxeffects_core::{
    Callable, CallableContract, CatchClause, ContractClause, ContractTable, Effect, EffectFamily,
    Expr, InvocationKind, Param, ReceiverRef, SourceLocation, Stmt,
};
use std::collections::BTreeMap;

/// What each declared receiver denotes at one call site.
#[derive(Debug, Clone, Default)]
struct CallBindings {
    this: Option<SymbolicReference>,
    params: BTreeMap<String, Option<SymbolicReference>>,
    lambda_receivers: BTreeMap<String, SymbolicReference>,
}

impl CallBindings {
    fn resolve(&self, receiver: &ReceiverRef) -> Option<SymbolicReference> {
        match receiver {
            ReceiverRef::This => self.this.clone(),
            ReceiverRef::Param(name) => self.params.get(name).cloned().flatten(),
            ReceiverRef::ReceiverOf(name) => self.lambda_receivers.get(name).cloned(),
        }
    }

    /// Fact key of `effect` at this site, `None` when its receiver does not
    /// resolve to a trackable reference.
    fn key(&self, effect: &Effect) -> Option<FactKey> {
        let reference = match effect.receiver() {
            None => SymbolicReference::Global,
            Some(receiver) => self.resolve(receiver)?,
        };
        Some(FactKey::new(effect.family(), reference, effect.token()))
    }
}

/// A lambda passed directly as an argument.
struct LambdaArg<'s> {
    callee: &'s str,
    body: &'s [Stmt],
    site: SourceLocation,
    end: SourceLocation,
    param: Option<&'s Param>,
    contract: Option<&'s CallableContract>,
}

/// States that left the current callable or lambda through `return`.
#[derive(Debug, Default)]
struct Frame {
    returns: Vec<FlowState>,
}

#[derive(Debug)]
pub struct CallableOutcome {
    pub diagnostics: Vec<Diagnostic>,
    pub exit: FlowState,
}

pub struct Tracker<'a> {
    index: &'a ProgramIndex<'a>,
    table: &'a ContractTable,
    config: &'a AnalyzerConfig,
    callable: &'a Callable,
    id: String,
    resolver: Resolver<'a>,
    diagnostics: Vec<Diagnostic>,
    /// Non-zero while computing loop fixed points; diagnostics are dropped.
    muted: u32,
    depth: usize,
    frames: Vec<Frame>,
}

impl<'a> Tracker<'a> {
    pub fn new(
        callable: &'a Callable,
        index: &'a ProgramIndex<'a>,
        table: &'a ContractTable,
        config: &'a AnalyzerConfig,
    ) -> Self {
        Tracker {
            index,
            table,
            config,
            callable,
            id: callable.id(),
            resolver: Resolver::for_callable(callable, index.hierarchy()),
            diagnostics: Vec::new(),
            muted: 0,
            depth: 0,
            frames: Vec::new(),
        }
    }

    pub fn run(mut self) -> Result<CallableOutcome, AnalysisFault> {
        let callable = self.callable;
        let entry = self.entry_state();
        let exit = match &callable.body {
            Some(body) => self.walk_frame(body, entry, callable.end_location())?,
            None => entry,
        };
        Ok(CallableOutcome {
            diagnostics: self.diagnostics,
            exit,
        })
    }

    /// The callable's own `requires` and `closes` effects hold on entry.
    fn entry_state(&self) -> FlowState {
        let mut state = FlowState::new();
        let Some(contract) = self.table.get(&self.id) else {
            return state;
        };
        let bindings = CallBindings {
            this: self
                .callable
                .owner
                .as_ref()
                .map(|owner| SymbolicReference::This {
                    owner: owner.clone(),
                }),
            params: self
                .callable
                .params
                .iter()
                .filter(|p| !p.is_lambda())
                .map(|p| {
                    (
                        p.name.clone(),
                        Some(SymbolicReference::Param {
                            name: p.name.clone(),
                        }),
                    )
                })
                .collect(),
            lambda_receivers: BTreeMap::new(),
        };
        for clause in &contract.clauses {
            if let ContractClause::Requires(effect) | ContractClause::Closes(effect) = clause {
                if let Some(key) = bindings.key(effect) {
                    state.provide(key);
                }
            }
        }
        state
    }

    // ── Structure ───────────────────────────────────────────────────

    fn enter(&mut self) -> Result<(), AnalysisFault> {
        self.depth += 1;
        if self.depth > self.config.max_nesting_depth {
            return Err(AnalysisFault::NestingTooDeep {
                limit: self.config.max_nesting_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Body of the callable or of a lambda: a scope that `return` leaves.
    fn walk_frame(
        &mut self,
        body: &[Stmt],
        entry: FlowState,
        end: SourceLocation,
    ) -> Result<FlowState, AnalysisFault> {
        self.frames.push(Frame::default());
        let normal = self.walk_scope(body, entry, end);
        let frame = self.frames.pop().unwrap_or_default();
        let normal = normal?;
        Ok(frame.returns.iter().fold(normal, |acc, s| acc.join(s)))
    }

    fn walk_scope(
        &mut self,
        stmts: &[Stmt],
        entry: FlowState,
        end: SourceLocation,
    ) -> Result<FlowState, AnalysisFault> {
        self.enter()?;
        self.resolver.push_block();
        let state = self.walk_stmts(stmts, entry)?;
        let locals = self.resolver.pop();
        let state = self.close_scope(state, &locals, end);
        self.leave();
        Ok(state)
    }

    fn walk_stmts(
        &mut self,
        stmts: &[Stmt],
        mut state: FlowState,
    ) -> Result<FlowState, AnalysisFault> {
        for stmt in stmts {
            if !state.is_reachable() {
                break;
            }
            state = self.walk_stmt(stmt, state)?;
        }
        Ok(state)
    }

    fn walk_stmt(&mut self, stmt: &Stmt, state: FlowState) -> Result<FlowState, AnalysisFault> {
        match stmt {
            Stmt::Let {
                name,
                init,
                location,
            } => {
                let state = self.eval(init, state)?;
                self.resolver.bind(name, *location);
                Ok(state)
            }
            Stmt::Eval { expr } => self.eval(expr, state),
            Stmt::If {
                condition,
                then,
                otherwise,
                location,
            } => {
                let state = match condition {
                    Some(c) => self.eval(c, state)?,
                    None => state,
                };
                let taken = self.walk_scope(then, state.clone(), *location)?;
                let skipped = self.walk_scope(otherwise, state, *location)?;
                Ok(taken.join(&skipped))
            }
            Stmt::Loop { body, location } => {
                let end = *location;
                self.iterate(state, true, |this, s| this.walk_scope(body, s, end))
            }
            Stmt::Try {
                body,
                catches,
                location,
            } => self.walk_try(body, catches, *location, state),
            Stmt::Return { value, location } => {
                let state = match value {
                    Some(v) => self.eval(v, state)?,
                    None => state,
                };
                let locals = self.resolver.locals_in_frame();
                let state = self.close_scope(state, &locals, *location);
                if let Some(frame) = self.frames.last_mut() {
                    frame.returns.push(state);
                }
                Ok(FlowState::unreachable())
            }
        }
    }

    fn walk_try(
        &mut self,
        body: &[Stmt],
        catches: &[CatchClause],
        location: SourceLocation,
        entry: FlowState,
    ) -> Result<FlowState, AnalysisFault> {
        let mut inner = entry.clone();
        let mut introduced = Vec::new();
        for clause in catches {
            let key = FactKey::new(
                EffectFamily::ExceptionCatch,
                SymbolicReference::Global,
                clause.exception.clone(),
            );
            if inner.get(&key).is_none() {
                inner.provide(key.clone());
                introduced.push(key);
            }
        }

        let mut body_exit = self.walk_scope(body, inner, location)?;
        for key in &introduced {
            body_exit.remove(key);
        }

        let handler_entry = entry.join(&body_exit);
        let mut exit = body_exit;
        for clause in catches {
            let handled = self.walk_scope(&clause.body, handler_entry.clone(), location)?;
            exit = exit.join(&handled);
        }
        Ok(exit)
    }

    /// Fixed point of `step` from `entry`. The muted passes settle the head
    /// state; the final pass runs with diagnostics enabled. With `may_skip`
    /// the result also covers running the body zero times.
    fn iterate<F>(
        &mut self,
        entry: FlowState,
        may_skip: bool,
        mut step: F,
    ) -> Result<FlowState, AnalysisFault>
    where
        F: FnMut(&mut Self, FlowState) -> Result<FlowState, AnalysisFault>,
    {
        let bound = self.config.loop_iterations.max(1);
        let mut head = entry;
        let mut pass = 0;

        self.muted += 1;
        let settled = loop {
            let out = match step(self, head.clone()) {
                Ok(out) => out,
                Err(fault) => {
                    self.muted -= 1;
                    return Err(fault);
                }
            };
            let next = head.join(&out);
            pass += 1;
            if next == head {
                break head;
            }
            if pass >= bound {
                tracing::trace!(callable = %self.id, passes = pass, "collapsing unstable loop facts");
                break head.collapse_toward(&next);
            }
            head = next;
        };
        self.muted -= 1;

        let out = step(self, settled.clone())?;
        Ok(if may_skip { settled.join(&out) } else { out })
    }

    /// Report locals still open at a scope exit and forget their facts.
    fn close_scope(
        &mut self,
        mut state: FlowState,
        locals: &[SymbolicReference],
        at: SourceLocation,
    ) -> FlowState {
        if !state.is_reachable() || locals.is_empty() {
            return state;
        }
        let leaked: Vec<FactKey> = state
            .iter()
            .filter(|(k, v)| **v == FactValue::Opened && locals.contains(&k.reference))
            .map(|(k, _)| k.clone())
            .collect();
        for key in leaked {
            self.report(
                at,
                format!(
                    "'{}' must be closed before the end of its scope ({})",
                    key.reference, key.token
                ),
            );
        }
        state.retain(|k, _| !locals.contains(&k.reference));
        state
    }

    // ── Expressions and calls ───────────────────────────────────────

    fn eval(&mut self, expr: &Expr, state: FlowState) -> Result<FlowState, AnalysisFault> {
        match expr {
            Expr::Call {
                callee,
                receiver,
                args,
                location,
            } => self.visit_call(callee, receiver.as_deref(), args, *location, state),
            Expr::Lambda {
                body,
                location,
                end,
            } => {
                // A lambda value not passed to a callee runs at an unknown
                // time: analyzed on its own, no effect on the enclosing flow.
                self.enter()?;
                self.resolver.push_lambda(None, None);
                let inner = self.walk_frame(body, FlowState::new(), end.unwrap_or(*location));
                self.resolver.pop();
                self.leave();
                inner?;
                Ok(state)
            }
            Expr::Opaque { children } => {
                let mut state = state;
                for child in children {
                    state = self.eval(child, state)?;
                }
                Ok(state)
            }
            Expr::Var { .. } | Expr::This { .. } => Ok(state),
        }
    }

    fn visit_call(
        &mut self,
        callee: &str,
        receiver: Option<&Expr>,
        args: &[Expr],
        location: SourceLocation,
        mut state: FlowState,
    ) -> Result<FlowState, AnalysisFault> {
        if let Some(r) = receiver {
            state = self.eval(r, state)?;
        }
        for arg in args.iter().filter(|a| !matches!(a, Expr::Lambda { .. })) {
            state = self.eval(arg, state)?;
        }

        let index = self.index;
        let table = self.table;
        let decl = index.callable(callee);
        let contract = table.get(callee);
        let bindings = self.bind_call(decl, receiver, args);

        if let Some(contract) = contract {
            self.check_requirements(callee, contract, &bindings, location, &state);
            self.apply_effects(callee, contract, &bindings, location, &mut state);
        }

        for (i, arg) in args.iter().enumerate() {
            if let Expr::Lambda {
                body,
                location: site,
                end,
            } = arg
            {
                let lambda = LambdaArg {
                    callee,
                    body,
                    site: *site,
                    end: end.unwrap_or(*site),
                    param: decl.and_then(|d| d.params.get(i)),
                    contract,
                };
                state = self.visit_lambda(lambda, &bindings, state)?;
            }
        }
        Ok(state)
    }

    fn bind_call(
        &self,
        decl: Option<&Callable>,
        receiver: Option<&Expr>,
        args: &[Expr],
    ) -> CallBindings {
        let this = match receiver {
            Some(r) => self.resolver.resolve(r),
            None => decl
                .and_then(|d| d.owner.as_deref())
                .and_then(|owner| self.resolver.resolve_implicit(owner)),
        };
        let mut bindings = CallBindings {
            this,
            ..CallBindings::default()
        };
        if let Some(decl) = decl {
            for (param, arg) in decl.params.iter().zip(args) {
                match arg {
                    Expr::Lambda { location, .. } => {
                        if param.receiver_type().is_some() {
                            bindings.lambda_receivers.insert(
                                param.name.clone(),
                                SymbolicReference::LambdaReceiver { site: *location },
                            );
                        }
                    }
                    _ => {
                        bindings
                            .params
                            .insert(param.name.clone(), self.resolver.resolve(arg));
                    }
                }
            }
        }
        bindings
    }

    fn check_requirements(
        &mut self,
        callee: &str,
        contract: &CallableContract,
        bindings: &CallBindings,
        location: SourceLocation,
        state: &FlowState,
    ) {
        for effect in contract.requirements() {
            match bindings.key(effect) {
                Some(key) => {
                    if !state.satisfies(&key, self.index.hierarchy()) {
                        self.report(
                            location,
                            format!(
                                "unsatisfied requirement of '{}': {}",
                                callee,
                                key.obligation()
                            ),
                        );
                    }
                }
                None => self.report(
                    location,
                    format!(
                        "unsatisfied requirement of '{}': cannot resolve the receiver of {}",
                        callee, effect
                    ),
                ),
            }
        }
    }

    fn apply_effects(
        &mut self,
        callee: &str,
        contract: &CallableContract,
        bindings: &CallBindings,
        location: SourceLocation,
        state: &mut FlowState,
    ) {
        for clause in &contract.clauses {
            match clause {
                ContractClause::Provides(effect) => match bindings.key(effect) {
                    Some(key) => {
                        tracing::trace!(callable = %self.id, %callee, fact = %key, "provides");
                        state.provide(key);
                    }
                    None => {
                        tracing::trace!(callable = %self.id, %callee, %effect, "unresolved receiver, provides ignored");
                    }
                },
                ContractClause::Starts(effect) => match bindings.key(effect) {
                    Some(key) => {
                        if state.is_open(&key) {
                            self.report(
                                location,
                                format!(
                                    "'{}' is already in state {}, '{}' cannot start it again",
                                    key.reference, key.token, callee
                                ),
                            );
                        }
                        tracing::trace!(callable = %self.id, %callee, fact = %key, "starts");
                        state.provide(key);
                    }
                    None => {
                        tracing::trace!(callable = %self.id, %callee, %effect, "unresolved receiver, starts ignored");
                    }
                },
                ContractClause::Closes(effect) => match bindings.key(effect) {
                    Some(key) => {
                        if !state.is_open(&key) {
                            self.report(
                                location,
                                format!(
                                    "'{}' is not in state {}, '{}' cannot close it",
                                    key.reference, key.token, callee
                                ),
                            );
                        }
                        tracing::trace!(callable = %self.id, %callee, fact = %key, "closes");
                        state.remove(&key);
                    }
                    None => self.report(
                        location,
                        format!(
                            "'{}' cannot close {}: the receiver cannot be resolved",
                            callee, effect
                        ),
                    ),
                },
                ContractClause::Requires(_)
                | ContractClause::CallsIn { .. }
                | ContractClause::ExpectsTo { .. }
                | ContractClause::CallsInPlace { .. } => {}
            }
        }
    }

    // ── Lambdas ─────────────────────────────────────────────────────

    fn visit_lambda(
        &mut self,
        lambda: LambdaArg<'_>,
        bindings: &CallBindings,
        outer: FlowState,
    ) -> Result<FlowState, AnalysisFault> {
        self.enter()?;
        let receiver_ref = lambda
            .param
            .and_then(Param::receiver_type)
            .map(|_| SymbolicReference::LambdaReceiver { site: lambda.site });
        let receiver = lambda
            .param
            .and_then(Param::receiver_type)
            .zip(receiver_ref.clone())
            .map(|(ty, r)| (ty.to_string(), r));
        let label = lambda.callee.rsplit('.').next().map(str::to_string);
        self.resolver.push_lambda(receiver, label);

        let result = self.run_lambda(&lambda, bindings, receiver_ref.as_ref(), outer);

        self.resolver.pop();
        self.leave();
        result
    }

    fn run_lambda(
        &mut self,
        lambda: &LambdaArg<'_>,
        bindings: &CallBindings,
        receiver: Option<&SymbolicReference>,
        outer: FlowState,
    ) -> Result<FlowState, AnalysisFault> {
        let (Some(param), Some(contract)) = (lambda.param, lambda.contract) else {
            self.walk_frame(lambda.body, FlowState::new(), lambda.end)?;
            return Ok(outer);
        };

        if let Some(receiver) = receiver {
            self.verify_call_counts(lambda, &param.name, contract, receiver)?;
        }

        let Some(kind) = contract.invocation_kind(&param.name) else {
            // May run any number of times, at any point: nothing flows in or out.
            self.walk_frame(lambda.body, FlowState::new(), lambda.end)?;
            return Ok(outer);
        };

        let mut entry = outer.clone();
        let mut introduced = Vec::new();
        for effect in contract.calls_in(&param.name) {
            match bindings.key(effect) {
                Some(key) => {
                    if key.family == EffectFamily::DslMarker {
                        entry.retain(|k, _| k.family != EffectFamily::DslMarker);
                    }
                    entry.provide(key.clone());
                    introduced.push(key);
                }
                None => {
                    tracing::trace!(callable = %self.id, %effect, "unresolved callsIn receiver");
                }
            }
        }

        let (body, end) = (lambda.body, lambda.end);
        let exit = match kind {
            InvocationKind::ExactlyOnce => self.walk_frame(body, entry, end)?,
            InvocationKind::AtMostOnce => {
                let ran = self.walk_frame(body, entry.clone(), end)?;
                ran.join(&entry)
            }
            InvocationKind::AtLeastOnce => {
                self.iterate(entry, false, |this, s| this.walk_frame(body, s, end))?
            }
            InvocationKind::Unknown => {
                self.iterate(entry, true, |this, s| this.walk_frame(body, s, end))?
            }
        };
        Ok(restore_after_lambda(exit, &outer, &introduced, receiver))
    }

    fn verify_call_counts(
        &mut self,
        lambda: &LambdaArg<'_>,
        param: &str,
        contract: &CallableContract,
        receiver: &SymbolicReference,
    ) -> Result<(), AnalysisFault> {
        let expectations = contract.expectations(param);
        if expectations.is_empty() || self.muted > 0 {
            return Ok(());
        }
        let mut verifier = CallCountVerifier::new(
            self.index,
            self.table,
            self.resolver.clone(),
            self.config.max_nesting_depth,
        );
        for call in expectations {
            let range = verifier.count(lambda.body, &call.callee, receiver)?;
            tracing::trace!(callable = %self.id, target = %call.callee, %range, "counted calls");
            if !range.satisfies(call.kind) {
                self.report(
                    lambda.site,
                    format!(
                        "'{}' must be called {} in '{}', but is called {} times",
                        call.callee, call.kind, param, range
                    ),
                );
            }
        }
        Ok(())
    }

    fn report(&mut self, location: SourceLocation, message: String) {
        if self.muted > 0 {
            return;
        }
        tracing::trace!(callable = %self.id, %location, %message, "violation");
        self.diagnostics.push(Diagnostic::violation(
            &self.id,
            location,
            self.config.violation_severity,
            message,
        ));
    }
}

/// Caller state after an in-place lambda: `callsIn` facts and DSL markers
/// revert to the caller's values, facts about the lambda receiver go away.
fn restore_after_lambda(
    exit: FlowState,
    outer: &FlowState,
    introduced: &[FactKey],
    receiver: Option<&SymbolicReference>,
) -> FlowState {
    if !exit.is_reachable() {
        return exit;
    }
    let mut state = exit;
    state.retain(|k, _| {
        k.family != EffectFamily::DslMarker
            && Some(&k.reference) != receiver
            && !introduced.contains(k)
    });
    for (k, v) in outer.iter() {
        if k.family == EffectFamily::DslMarker || introduced.contains(k) {
            state.insert(k.clone(), *v);
        }
    }
    state
}
