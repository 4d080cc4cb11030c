use std::path::Path;

use ctxeffects_core::{build_contract_table, ContractClause, ContractTable, DeclError};
use serde::Serialize;

use super::{config_or_exit, load_or_exit};
use crate::OutputFormat;

#[derive(Serialize)]
struct ContractsOutput<'a> {
    unit: &'a str,
    #[serde(flatten)]
    table: &'a ContractTable,
}

pub(crate) fn cmd_contracts(
    file: &Path,
    config: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let config = config_or_exit(config, output, quiet);
    let program = load_or_exit(file, output, quiet);
    let table = build_contract_table(&program, &config.registry());

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => {
            let out = ContractsOutput {
                unit: &program.unit,
                table: &table,
            };
            let json = serde_json::to_string_pretty(&out)
                .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
            println!("{}", json);
        }
        OutputFormat::Text => {
            for contract in table.iter() {
                if table.is_rejected(&contract.callable) {
                    println!("{} (rejected)", contract.callable);
                    continue;
                }
                if contract.is_empty() {
                    continue;
                }
                println!("{}", contract.callable);
                for clause in &contract.clauses {
                    println!("  {}", render_clause(clause));
                }
            }
            if !table.errors().is_empty() {
                println!();
                println!("Declaration errors:");
                for error in table.errors() {
                    println!("  {}", render_error(error));
                }
            }
        }
    }
}

fn render_clause(clause: &ContractClause) -> String {
    match clause {
        ContractClause::Requires(e) => format!("requires({})", e),
        ContractClause::Provides(e) => format!("provides({})", e),
        ContractClause::Starts(e) => format!("starts({})", e),
        ContractClause::Closes(e) => format!("closes({})", e),
        ContractClause::CallsIn { param, effect } => format!("callsIn({}, {})", param, effect),
        ContractClause::ExpectsTo { param, call } => format!(
            "expectsTo({}, {} {} on {})",
            param, call.callee, call.kind, call.receiver
        ),
        ContractClause::CallsInPlace { param, kind } => {
            format!("callsInPlace({}, {})", param, kind)
        }
    }
}

fn render_error(error: &DeclError) -> String {
    match &error.clause {
        Some(clause) => format!(
            "{}: {} in '{}': {}",
            error.location, error.callable, clause, error.message
        ),
        None => format!("{}: {}: {}", error.location, error.callable, error.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxeffects_core::{CallKind, Effect, InvocationKind, ReceiverRef};

    #[test]
    fn clauses_render_readably() {
        let clause = ContractClause::ExpectsTo {
            param: "init".into(),
            call: CallKind {
                callee: "XYZBuilder.setValX".into(),
                kind: InvocationKind::ExactlyOnce,
                receiver: ReceiverRef::ReceiverOf("init".into()),
            },
        };
        assert_eq!(
            render_clause(&clause),
            "expectsTo(init, XYZBuilder.setValX exactly once on receiverOf(init))"
        );
        let clause = ContractClause::Closes(Effect::OpenClose {
            name: "OpenedTransaction".into(),
            receiver: ReceiverRef::This,
        });
        assert_eq!(render_clause(&clause), "closes(OpenedTransaction(this))");
    }
}
