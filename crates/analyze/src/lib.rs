//! ctxeffects static analyzer: flow-sensitive contextual effect checking.
//!
//! The analyzer consumes a [`Program`] produced by a front end. Contract
//! blocks are parsed into a read-only table first; every callable body is
//! then walked by an independent [`tracker::Tracker`] pass. Passes share
//! nothing mutable, so with `jobs > 1` they run on scoped worker threads
//! and are merged back in declaration order.

pub mod call_count;
pub mod cancel;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod index;
pub mod reference;
pub mod report;
pub mod state;
pub mod tracker;

pub use cancel::CancellationToken;
pub use config::{AnalyzerConfig, ConfigError};
pub use diagnostics::{Diagnostic, DiagnosticEmitter, DiagnosticKind, Severity};
pub use error::AnalysisFault;
pub use reference::SymbolicReference;
pub use report::{AnalysisReport, CallableStatus, CallableSummary};
pub use state::{CountRange, FactKey, FactValue, FlowState};

use ctxeffects_core::{build_contract_table, Callable, ContractTable, Program};
use index::ProgramIndex;
use std::panic::{self, AssertUnwindSafe};
use tracker::Tracker;

/// Analyze every callable of `program`.
pub fn analyze(program: &Program, config: &AnalyzerConfig) -> AnalysisReport {
    analyze_with_cancel(program, config, &CancellationToken::new())
}

/// Like [`analyze`], checking `cancel` before and after each callable.
pub fn analyze_with_cancel(
    program: &Program,
    config: &AnalyzerConfig,
    cancel: &CancellationToken,
) -> AnalysisReport {
    tracing::info!(
        unit = %program.unit,
        callables = program.callables.len(),
        jobs = config.jobs,
        "analyzing program unit"
    );

    let table = build_contract_table(program, &config.registry());
    let index = ProgramIndex::new(program);
    let ctx = Context {
        index: &index,
        table: &table,
        config,
        cancel,
    };

    let results = if config.jobs > 1 && program.callables.len() > 1 {
        analyze_parallel(&ctx, &program.callables)
    } else {
        program
            .callables
            .iter()
            .map(|c| analyze_callable(&ctx, c))
            .collect()
    };

    let mut emitter = DiagnosticEmitter::new();
    emitter.extend(table.errors().iter().map(Diagnostic::declaration));
    let mut report = AnalysisReport::new(&program.unit);
    for result in results {
        report.cancelled |= result.summary.status == CallableStatus::Cancelled;
        emitter.extend(result.diagnostics);
        report.callables.push(result.summary);
    }
    report.diagnostics = emitter.finish();

    tracing::info!(
        diagnostics = report.diagnostics.len(),
        cancelled = report.cancelled,
        "analysis finished"
    );
    report
}

/// Read-only state shared by all callable passes.
struct Context<'a> {
    index: &'a ProgramIndex<'a>,
    table: &'a ContractTable,
    config: &'a AnalyzerConfig,
    cancel: &'a CancellationToken,
}

struct CallableResult {
    summary: CallableSummary,
    diagnostics: Vec<Diagnostic>,
}

impl CallableResult {
    fn bare(callable: String, status: CallableStatus, contract_rejected: bool) -> Self {
        CallableResult {
            summary: CallableSummary {
                callable,
                status,
                contract_rejected,
                diagnostics: 0,
                exit_facts: Vec::new(),
            },
            diagnostics: Vec::new(),
        }
    }
}

fn analyze_parallel(ctx: &Context<'_>, callables: &[Callable]) -> Vec<CallableResult> {
    let chunk_size = callables.len().div_ceil(ctx.config.jobs);
    std::thread::scope(|scope| {
        let handles: Vec<_> = callables
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|c| analyze_callable(ctx, c))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .zip(callables.chunks(chunk_size))
            .flat_map(|(handle, chunk)| match handle.join() {
                Ok(results) => results,
                Err(_) => chunk
                    .iter()
                    .map(|c| {
                        faulted(
                            ctx,
                            c,
                            AnalysisFault::Panicked("worker thread panicked".into()),
                        )
                    })
                    .collect(),
            })
            .collect()
    })
}

fn analyze_callable(ctx: &Context<'_>, callable: &Callable) -> CallableResult {
    let id = callable.id();
    let contract_rejected = ctx.table.is_rejected(&id);
    if ctx.cancel.is_cancelled() {
        return CallableResult::bare(id, CallableStatus::Cancelled, contract_rejected);
    }
    if callable.body.is_none() {
        return CallableResult::bare(id, CallableStatus::NoBody, contract_rejected);
    }

    tracing::debug!(callable = %id, "analyzing callable");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        Tracker::new(callable, ctx.index, ctx.table, ctx.config).run()
    }));
    let fault = match outcome {
        Ok(Ok(outcome)) => {
            if ctx.cancel.is_cancelled() {
                return CallableResult::bare(id, CallableStatus::Cancelled, contract_rejected);
            }
            tracing::debug!(callable = %id, diagnostics = outcome.diagnostics.len(), "callable done");
            return CallableResult {
                summary: CallableSummary {
                    callable: id,
                    status: CallableStatus::Complete,
                    contract_rejected,
                    diagnostics: outcome.diagnostics.len(),
                    exit_facts: outcome.exit.describe(),
                },
                diagnostics: outcome.diagnostics,
            };
        }
        Ok(Err(fault)) => fault,
        Err(payload) => AnalysisFault::Panicked(panic_message(payload.as_ref())),
    };
    faulted(ctx, callable, fault)
}

/// One internal diagnostic replaces whatever the failed pass produced.
fn faulted(ctx: &Context<'_>, callable: &Callable, fault: AnalysisFault) -> CallableResult {
    let id = callable.id();
    tracing::error!(callable = %id, error = %fault, "analysis of callable failed");
    let diagnostic = Diagnostic::internal(&id, callable.location, fault.to_string());
    CallableResult {
        summary: CallableSummary {
            callable: id.clone(),
            status: CallableStatus::Incomplete,
            contract_rejected: ctx.table.is_rejected(&id),
            diagnostics: 1,
            exit_facts: Vec::new(),
        },
        diagnostics: vec![diagnostic],
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
