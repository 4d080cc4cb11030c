mod check;
mod contracts;

pub(crate) use check::{cmd_check, CheckOptions};
pub(crate) use contracts::cmd_contracts;

use std::path::Path;
use std::process;

use ctxeffects_analyze::AnalyzerConfig;
use ctxeffects_core::{load_program, FileSystemProvider, Program};

use crate::{report_error, OutputFormat, EXIT_LOAD_FAILURE};

/// Load a program unit from disk, exiting on failure.
pub(crate) fn load_or_exit(path: &Path, output: OutputFormat, quiet: bool) -> Program {
    match load_program(&FileSystemProvider, path) {
        Ok(program) => program,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(EXIT_LOAD_FAILURE);
        }
    }
}

/// Load and validate the analyzer config, or the defaults when no file is given.
pub(crate) fn config_or_exit(
    path: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) -> AnalyzerConfig {
    let Some(path) = path else {
        return AnalyzerConfig::default();
    };
    match AnalyzerConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(EXIT_LOAD_FAILURE);
        }
    }
}
