//! Contract clause interpretation and the per-callable contract table.
//!
//! Each callable's contract block is parsed clause by clause into
//! [`ContractClause`] values. A callable with any malformed clause gets an
//! empty contract so downstream analysis does not pile false positives on
//! top of the declaration error.

use crate::ast::{Callable, Program};
use crate::effect::{CallKind, Effect, EffectFamily, EffectRegistry, InvocationKind, ReceiverRef};
use crate::error::DeclError;
use crate::parser::{parse_clause, Term};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One declared clause of a contract block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ContractClause {
    Requires(Effect),
    Provides(Effect),
    Starts(Effect),
    Closes(Effect),
    CallsIn { param: String, effect: Effect },
    ExpectsTo { param: String, call: CallKind },
    CallsInPlace { param: String, kind: InvocationKind },
}

/// The ordered clause list of one callable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallableContract {
    pub callable: String,
    pub clauses: Vec<ContractClause>,
}

impl CallableContract {
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn requirements(&self) -> impl Iterator<Item = &Effect> {
        self.clauses.iter().filter_map(|c| match c {
            ContractClause::Requires(e) => Some(e),
            _ => None,
        })
    }

    /// Declared `callsInPlace` kind for a lambda parameter.
    pub fn invocation_kind(&self, param: &str) -> Option<InvocationKind> {
        self.clauses.iter().find_map(|c| match c {
            ContractClause::CallsInPlace { param: p, kind } if p == param => Some(*kind),
            _ => None,
        })
    }

    pub fn calls_in(&self, param: &str) -> Vec<&Effect> {
        self.clauses
            .iter()
            .filter_map(|c| match c {
                ContractClause::CallsIn { param: p, effect } if p == param => Some(effect),
                _ => None,
            })
            .collect()
    }

    pub fn expectations(&self, param: &str) -> Vec<&CallKind> {
        self.clauses
            .iter()
            .filter_map(|c| match c {
                ContractClause::ExpectsTo { param: p, call } if p == param => Some(call),
                _ => None,
            })
            .collect()
    }
}

/// Contract clauses of every callable in a program unit, plus the
/// declaration errors found while building it. Read-only once built.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContractTable {
    contracts: BTreeMap<String, CallableContract>,
    errors: Vec<DeclError>,
}

impl ContractTable {
    pub fn get(&self, callable: &str) -> Option<&CallableContract> {
        self.contracts.get(callable).filter(|c| !c.is_empty())
    }

    pub fn errors(&self) -> &[DeclError] {
        &self.errors
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallableContract> {
        self.contracts.values()
    }

    /// True when the callable's contract was rejected.
    pub fn is_rejected(&self, callable: &str) -> bool {
        self.errors.iter().any(|e| e.callable == callable)
    }
}

/// Parse and validate every contract block of `program`.
///
/// Open/close constructors listed in `program.effects` are added to a copy
/// of `registry` first.
pub fn build_contract_table(program: &Program, registry: &EffectRegistry) -> ContractTable {
    let mut registry = registry.clone();
    for name in &program.effects {
        registry.register(name.clone(), EffectFamily::OpenClose);
    }
    let callable_ids = program.callable_ids();

    let mut table = ContractTable::default();
    for callable in &program.callables {
        let id = callable.id();
        let (clauses, errors) = parse_contract(callable, &callable_ids, &registry);
        let contract = if errors.is_empty() {
            CallableContract {
                callable: id.clone(),
                clauses,
            }
        } else {
            for e in &errors {
                tracing::warn!(callable = %e.callable, message = %e.message, "rejected contract clause");
            }
            table.errors.extend(errors);
            CallableContract {
                callable: id.clone(),
                clauses: Vec::new(),
            }
        };
        table.contracts.insert(id, contract);
    }

    tracing::debug!(
        callables = table.contracts.len(),
        errors = table.errors.len(),
        "built contract table"
    );
    table
}

/// Parse one callable's contract block. Returns the clauses and every
/// declaration error found.
pub fn parse_contract(
    callable: &Callable,
    callable_ids: &BTreeSet<String>,
    registry: &EffectRegistry,
) -> (Vec<ContractClause>, Vec<DeclError>) {
    let id = callable.id();
    let mut clauses = Vec::new();
    let mut errors = Vec::new();

    for text in &callable.contract {
        let term = match parse_clause(text) {
            Ok(t) => t,
            Err(e) => {
                errors.push(DeclError::syntax(
                    &id,
                    callable.location,
                    text,
                    format!("syntax error in contract clause at {}", e),
                ));
                continue;
            }
        };
        let interp = Interpreter {
            callable,
            callable_ids,
            registry,
        };
        match interp.clause(&term) {
            Ok(clause) => clauses.push(clause),
            Err(message) => errors.push(DeclError::new(
                &id,
                callable.location,
                Some(text.as_str()),
                message,
            )),
        }
    }

    // Lambda-scoped clauses need an invocation bound for their parameter.
    let mut in_place: BTreeMap<&str, usize> = BTreeMap::new();
    for clause in &clauses {
        if let ContractClause::CallsInPlace { param, .. } = clause {
            *in_place.entry(param.as_str()).or_default() += 1;
        }
    }
    for (param, count) in &in_place {
        if *count > 1 {
            errors.push(DeclError::new(
                &id,
                callable.location,
                None,
                format!("duplicate callsInPlace declaration for '{}'", param),
            ));
        }
    }
    let mut reported = BTreeSet::new();
    for clause in &clauses {
        let param = match clause {
            ContractClause::CallsIn { param, .. } | ContractClause::ExpectsTo { param, .. } => param,
            _ => continue,
        };
        if !in_place.contains_key(param.as_str()) && reported.insert(param.clone()) {
            errors.push(DeclError::new(
                &id,
                callable.location,
                None,
                format!(
                    "lambda '{}' has callsIn/expectsTo clauses but no callsInPlace declaration",
                    param
                ),
            ));
        }
    }

    (clauses, errors)
}

struct Interpreter<'a> {
    callable: &'a Callable,
    callable_ids: &'a BTreeSet<String>,
    registry: &'a EffectRegistry,
}

impl Interpreter<'_> {
    fn clause(&self, term: &Term) -> Result<ContractClause, String> {
        let Term::Apply { args, .. } = term else {
            return Err("a contract clause must be a call such as requires(...)".to_string());
        };
        let name = term.simple_name().unwrap_or_default();
        match name {
            "requires" | "provides" | "starts" | "closes" => {
                let [arg] = args.as_slice() else {
                    return Err(format!("'{}' takes exactly one effect", name));
                };
                let effect = self.effect(arg)?;
                match name {
                    "requires" => Ok(ContractClause::Requires(effect)),
                    "provides" => Ok(ContractClause::Provides(effect)),
                    _ if effect.family() != EffectFamily::OpenClose => Err(format!(
                        "'{}' only applies to open/close effects, not {}",
                        name,
                        effect.family()
                    )),
                    "starts" => Ok(ContractClause::Starts(effect)),
                    _ => Ok(ContractClause::Closes(effect)),
                }
            }
            "callsIn" => {
                let [lambda, effect] = args.as_slice() else {
                    return Err("'callsIn' takes a lambda parameter and an effect".to_string());
                };
                Ok(ContractClause::CallsIn {
                    param: self.lambda_param(lambda)?,
                    effect: self.effect(effect)?,
                })
            }
            "expectsTo" => {
                let [lambda, call] = args.as_slice() else {
                    return Err("'expectsTo' takes a lambda parameter and a CallKind".to_string());
                };
                let param = self.lambda_param(lambda)?;
                let call = self.call_kind(call)?;
                if call.receiver != ReceiverRef::ReceiverOf(param.clone()) {
                    return Err(format!(
                        "expectsTo on '{}' can only count calls on receiverOf({})",
                        param, param
                    ));
                }
                Ok(ContractClause::ExpectsTo { param, call })
            }
            "callsInPlace" => {
                let (lambda, kind) = match args.as_slice() {
                    [lambda] => (lambda, InvocationKind::Unknown),
                    [lambda, kind] => (lambda, self.invocation_kind(kind)?),
                    _ => {
                        return Err(
                            "'callsInPlace' takes a lambda parameter and an optional kind"
                                .to_string(),
                        )
                    }
                };
                Ok(ContractClause::CallsInPlace {
                    param: self.lambda_param(lambda)?,
                    kind,
                })
            }
            other => Err(format!("unknown contract clause '{}'", other)),
        }
    }

    fn effect(&self, term: &Term) -> Result<Effect, String> {
        let Term::Apply {
            type_args, args, ..
        } = term
        else {
            return Err("expected an effect constructor call".to_string());
        };
        let constructor = term.simple_name().unwrap_or_default();
        let family = self
            .registry
            .family_of(constructor)
            .ok_or_else(|| format!("unknown effect constructor '{}'", constructor))?;

        match family {
            EffectFamily::ExceptionCatch => {
                let ([exception], []) = (type_args.as_slice(), args.as_slice()) else {
                    return Err(format!(
                        "'{}' takes one type argument and no value arguments",
                        constructor
                    ));
                };
                if self.callable.type_params.iter().any(|t| t == exception) {
                    return Err(format!(
                        "generic effects are not supported yet: '{}' is a type parameter of '{}'",
                        exception,
                        self.callable.id()
                    ));
                }
                let exception = exception.rsplit('.').next().unwrap_or(exception);
                Ok(Effect::CatchesException {
                    exception: exception.to_string(),
                })
            }
            EffectFamily::DslMarker => {
                let [receiver] = args.as_slice() else {
                    return Err(format!("'{}' takes one receiver", constructor));
                };
                Ok(Effect::DslMarkers {
                    receiver: self.receiver(receiver)?,
                })
            }
            EffectFamily::CallCount => {
                let [callee, receiver] = args.as_slice() else {
                    return Err(format!(
                        "'{}' takes a callable reference and a receiver",
                        constructor
                    ));
                };
                Ok(Effect::Calls {
                    callee: self.callable_ref(callee)?,
                    receiver: self.receiver(receiver)?,
                })
            }
            EffectFamily::OpenClose => {
                let [receiver] = args.as_slice() else {
                    return Err(format!("'{}' takes one receiver", constructor));
                };
                Ok(Effect::OpenClose {
                    name: constructor.to_string(),
                    receiver: self.receiver(receiver)?,
                })
            }
        }
    }

    fn receiver(&self, term: &Term) -> Result<ReceiverRef, String> {
        match term {
            Term::This { label, .. } => {
                let owner = self.callable.owner.as_deref().ok_or_else(|| {
                    format!(
                        "'this' is not in scope: '{}' is not a member function",
                        self.callable.id()
                    )
                })?;
                match label {
                    Some(l) if l != owner => Err(format!(
                        "'this@{}' is not in scope in a member of '{}'",
                        l, owner
                    )),
                    _ => Ok(ReceiverRef::This),
                }
            }
            Term::Name { path, .. } => match self.callable.param(path) {
                Some(p) if p.is_lambda() => Err(format!(
                    "'{}' is a lambda parameter; use receiverOf({}) for its receiver",
                    path, path
                )),
                Some(_) => Ok(ReceiverRef::Param(path.clone())),
                None => Err(format!("receiver '{}' is not in scope", path)),
            },
            Term::Apply { args, .. } if term.simple_name() == Some("receiverOf") => {
                let [lambda] = args.as_slice() else {
                    return Err("'receiverOf' takes one lambda parameter".to_string());
                };
                let param = self.lambda_param(lambda)?;
                match self.callable.param(&param).and_then(|p| p.receiver_type()) {
                    Some(_) => Ok(ReceiverRef::ReceiverOf(param)),
                    None => Err(format!("lambda '{}' has no receiver", param)),
                }
            }
            _ => Err("expected a receiver: this, a parameter or receiverOf(lambda)".to_string()),
        }
    }

    fn lambda_param(&self, term: &Term) -> Result<String, String> {
        let Term::Name { path, .. } = term else {
            return Err("expected a lambda parameter name".to_string());
        };
        match self.callable.param(path) {
            Some(p) if p.is_lambda() => Ok(path.clone()),
            Some(_) => Err(format!("parameter '{}' is not a lambda", path)),
            None => Err(format!("unknown parameter '{}'", path)),
        }
    }

    fn callable_ref(&self, term: &Term) -> Result<String, String> {
        let Term::CallableRef { owner, member, .. } = term else {
            return Err("expected a callable reference such as ::member".to_string());
        };
        let id = match (owner, &self.callable.owner) {
            (Some(o), _) => format!("{}.{}", o, member),
            (None, Some(o)) => format!("{}.{}", o, member),
            (None, None) => member.clone(),
        };
        if self.callable_ids.contains(&id) {
            Ok(id)
        } else {
            Err(format!("callable reference '{}' names no declared callable", id))
        }
    }

    fn call_kind(&self, term: &Term) -> Result<CallKind, String> {
        let Term::Apply { args, .. } = term else {
            return Err("expected CallKind(member, kind, receiver)".to_string());
        };
        if term.simple_name() != Some("CallKind") {
            return Err("expected CallKind(member, kind, receiver)".to_string());
        }
        let [callee, kind, receiver] = args.as_slice() else {
            return Err("'CallKind' takes a callable reference, a kind and a receiver".to_string());
        };
        Ok(CallKind {
            callee: self.callable_ref(callee)?,
            kind: self.invocation_kind(kind)?,
            receiver: self.receiver(receiver)?,
        })
    }

    fn invocation_kind(&self, term: &Term) -> Result<InvocationKind, String> {
        term.simple_name()
            .and_then(InvocationKind::from_keyword)
            .ok_or_else(|| "expected an InvocationKind such as EXACTLY_ONCE".to_string())
    }
}
