use std::path::Path;
use std::process;

use ctxeffects_analyze::{AnalysisReport, CallableStatus, Severity};

use super::{config_or_exit, load_or_exit};
use crate::{report_error, OutputFormat, EXIT_LOAD_FAILURE};

pub(crate) struct CheckOptions<'a> {
    pub config: Option<&'a Path>,
    pub jobs: Option<usize>,
    pub deny_warnings: bool,
}

pub(crate) fn cmd_check(file: &Path, options: &CheckOptions<'_>, output: OutputFormat, quiet: bool) {
    // Step 1: Load the config and the program unit
    let mut config = config_or_exit(options.config, output, quiet);
    if let Some(jobs) = options.jobs {
        config.jobs = jobs;
    }
    if let Err(e) = config.validate() {
        report_error(&format!("error: {}", e), output, quiet);
        process::exit(EXIT_LOAD_FAILURE);
    }
    let program = load_or_exit(file, output, quiet);

    // Step 2: Run the analysis
    let report = ctxeffects_analyze::analyze(&program, &config);

    // Step 3: Format output
    if !quiet {
        match output {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&report)
                    .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
                println!("{}", json);
            }
            OutputFormat::Text => print_text(&report),
        }
    }

    // Step 4: Exit code based on diagnostics
    let failing = if options.deny_warnings {
        !report.diagnostics.is_empty()
    } else {
        report.has_errors()
    };
    if failing {
        process::exit(1);
    }
}

fn print_text(report: &AnalysisReport) {
    for diagnostic in &report.diagnostics {
        println!("{}:{}", report.unit, diagnostic);
    }

    let incomplete = report
        .callables
        .iter()
        .filter(|s| s.status == CallableStatus::Incomplete)
        .count();
    if report.diagnostics.is_empty() {
        println!(
            "{}: no findings in {} callable(s)",
            report.unit,
            report.callables.len()
        );
    } else {
        println!(
            "{}: {} error(s), {} warning(s) in {} callable(s)",
            report.unit,
            report.count(Severity::Error),
            report.count(Severity::Warning),
            report.callables.len()
        );
    }
    if incomplete > 0 {
        println!("  {} callable(s) could not be fully analyzed", incomplete);
    }
}
