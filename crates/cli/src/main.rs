mod commands;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use commands::{cmd_check, cmd_contracts, CheckOptions};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Exit status when the program unit or the config cannot be loaded.
pub(crate) const EXIT_LOAD_FAILURE: i32 = 2;

/// Contextual effects checker.
#[derive(Parser)]
#[command(name = "ctxeffects", version, about = "Contextual effects checker")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log verbosity on stderr (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every callable of a program unit against its callees' contracts
    Check {
        /// Path to the program unit JSON file
        program: PathBuf,
        /// Analyzer configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Worker threads; overrides the config file
        #[arg(long)]
        jobs: Option<usize>,
        /// Exit with status 1 on warnings as well as errors
        #[arg(long)]
        deny_warnings: bool,
    },

    /// Print the parsed contract table and any declaration errors
    Contracts {
        /// Path to the program unit JSON file
        program: PathBuf,
        /// Analyzer configuration (TOML), for extra open/close effects
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Check {
            program,
            config,
            jobs,
            deny_warnings,
        } => {
            let options = CheckOptions {
                config: config.as_deref(),
                jobs,
                deny_warnings,
            };
            cmd_check(&program, &options, cli.output, cli.quiet);
        }
        Commands::Contracts { program, config } => {
            cmd_contracts(&program, config.as_deref(), cli.output, cli.quiet);
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Report an error to stderr in the selected format.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
