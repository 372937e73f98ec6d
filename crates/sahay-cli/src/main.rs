// crates/sahay-cli/src/main.rs
// ============================================================================
// Module: SAHAY CLI Entry Point
// Description: Command dispatcher for the SAHAY backend.
// Purpose: Run the server and offline config/audit utilities.
// Dependencies: clap, sahay-api, sahay-config, sahay-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! The CLI runs the server (`serve`), validates configuration
//! (`check-config`), renders the canonical example config
//! (`print-config-example`), and verifies an audit chain offline against a
//! database file (`verify-audit`). A broken chain exits non-zero so
//! operators can alert on it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use sahay_config::SahayConfig;
use sahay_config::config_toml_example;
use sahay_store_sqlite::SqliteStore;
use sahay_store_sqlite::SqliteStoreConfig;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "sahay", version, arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the SAHAY API server.
    Serve(ServeCommand),
    /// Validate a configuration file and exit.
    CheckConfig(CheckConfigCommand),
    /// Print the canonical example configuration.
    PrintConfigExample,
    /// Verify the audit chain of a database file offline.
    VerifyAudit(VerifyAuditCommand),
}

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Config file path (defaults to sahay.toml when present).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for the `check-config` command.
#[derive(Args, Debug)]
struct CheckConfigCommand {
    /// Config file path.
    #[arg(long, value_name = "PATH")]
    config: PathBuf,
}

/// Arguments for the `verify-audit` command.
#[derive(Args, Debug)]
struct VerifyAuditCommand {
    /// Database file path.
    #[arg(long, value_name = "PATH")]
    db: PathBuf,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::CheckConfig(command) => command_check_config(&command),
        Commands::PrintConfigExample => command_print_config_example(),
        Commands::VerifyAudit(command) => command_verify_audit(&command),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config.as_deref())?;
    config.validate().map_err(|err| CliError::new(err.to_string()))?;
    sahay_api::serve(config).await.map_err(|err| CliError::new(err.to_string()))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `check-config` command.
fn command_check_config(command: &CheckConfigCommand) -> CliResult<ExitCode> {
    let config =
        SahayConfig::load(&command.config).map_err(|err| CliError::new(err.to_string()))?;
    config.validate().map_err(|err| CliError::new(err.to_string()))?;
    write_stdout_line("config ok")?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `print-config-example` command.
fn command_print_config_example() -> CliResult<ExitCode> {
    let example = config_toml_example().map_err(|err| CliError::new(err.to_string()))?;
    write_stdout_line(&example)?;
    Ok(ExitCode::SUCCESS)
}

/// Executes the `verify-audit` command.
fn command_verify_audit(command: &VerifyAuditCommand) -> CliResult<ExitCode> {
    let store = SqliteStore::open(&SqliteStoreConfig::new(command.db.clone()))
        .map_err(|err| CliError::new(err.to_string()))?;
    let report = store.verify_audit_chain().map_err(|err| CliError::new(err.to_string()))?;
    if report.ok {
        write_stdout_line(&format!("audit chain ok ({} entries)", report.checked))?;
        Ok(ExitCode::SUCCESS)
    } else {
        let seq = report.first_broken_seq.unwrap_or(0);
        write_stdout_line(&format!("audit chain BROKEN at seq {seq}"))?;
        Ok(ExitCode::FAILURE)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Loads the config from an explicit path, `sahay.toml`, or defaults.
fn load_config(path: Option<&Path>) -> CliResult<SahayConfig> {
    match path {
        Some(path) => SahayConfig::load(path).map_err(|err| CliError::new(err.to_string())),
        None => {
            let default_path = Path::new("sahay.toml");
            if default_path.exists() {
                SahayConfig::load(default_path).map_err(|err| CliError::new(err.to_string()))
            } else {
                Ok(SahayConfig::default())
            }
        }
    }
}

/// Writes one line to stdout through an explicit handle.
fn write_stdout_line(line: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}").map_err(|err| CliError::new(format!("stdout write failed: {err}")))
}
