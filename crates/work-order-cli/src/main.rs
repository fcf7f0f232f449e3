// work-order-cli/src/main.rs
// ============================================================================
// Module: Work Order CLI Entry Point
// Description: Command dispatcher for maintenance ticks.
// Purpose: Drive the caller-owned maintenance loop against a configured
// store from cron or an operator shell.
// Dependencies: clap, serde_json, tracing-subscriber, work-order-config,
// work-order-core, work-order-store-sqlite
// ============================================================================

//! ## Overview
//! The CLI drives the engine's maintenance loop: reclaim expired leases,
//! dead-letter stuck work, and surface stale orders. It exits zero on a
//! clean tick and non-zero when any pass recorded an unrecovered error, so
//! cron and alerting can key off the exit code.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use thiserror::Error;
use work_order_config::DEFAULT_CONFIG_NAME;
use work_order_config::LeaseBackendKind;
use work_order_config::WorkOrderConfig;
use work_order_core::DatabaseLeaseBackend;
use work_order_core::HandlerRegistry;
use work_order_core::KeyValueLeaseBackend;
use work_order_core::LeaseBackend;
use work_order_core::MaintenancePhase;
use work_order_core::MaintenanceReport;
use work_order_core::Timestamp;
use work_order_core::WorkEngine;
use work_order_store_sqlite::SqliteStoreConfig;
use work_order_store_sqlite::SqliteStoreError;
use work_order_store_sqlite::SqliteWorkOrderStore;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "work-order", version, about = "Work order control plane maintenance")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run maintenance passes against the configured store.
    Tick(TickCommand),
}

/// Configuration for the `tick` command.
#[derive(clap::Args, Debug)]
struct TickCommand {
    /// Phases to run; all when omitted.
    #[arg(long, value_delimiter = ',')]
    phases: Option<Vec<PhaseArg>>,
}

/// CLI-facing maintenance phase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PhaseArg {
    /// Reclaim expired leases.
    ReclaimLeases,
    /// Dead-letter stuck failed work.
    DeadLetter,
    /// Surface stale orders.
    StaleOrders,
}

impl From<PhaseArg> for MaintenancePhase {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::ReclaimLeases => Self::ReclaimLeases,
            PhaseArg::DeadLetter => Self::DeadLetter,
            PhaseArg::StaleOrders => Self::StaleOrders,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures before the tick runs.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] work_order_config::ConfigError),
    /// Store failure.
    #[error(transparent)]
    Store(#[from] SqliteStoreError),
    /// Report serialization failure.
    #[error("report serialization failed: {0}")]
    Report(String),
    /// Output write failure.
    #[error("stdout write failed: {0}")]
    Output(String),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(report) if report.is_clean() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %err, "tick failed");
            ExitCode::FAILURE
        }
    }
}

/// Loads configuration, opens the store, and runs the requested command.
fn run(cli: &Cli) -> Result<MaintenanceReport, CliError> {
    let config = match &cli.config {
        Some(path) => WorkOrderConfig::load(path)?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_NAME);
            if default.exists() {
                WorkOrderConfig::load(&default)?
            } else {
                WorkOrderConfig::default()
            }
        }
    };

    let store = SqliteWorkOrderStore::new(&SqliteStoreConfig::for_path(&config.store_path))?;
    let Commands::Tick(tick) = &cli.command;
    let phases: Option<Vec<MaintenancePhase>> = tick
        .phases
        .as_ref()
        .map(|args| args.iter().copied().map(MaintenancePhase::from).collect());

    // Both backends ride the same durable database so lease state set by
    // out-of-process agents stays visible across tick invocations.
    let report = match config.lease_backend {
        LeaseBackendKind::Database => run_tick(
            store.clone(),
            DatabaseLeaseBackend::new(store),
            &config,
            phases.as_deref(),
        ),
        LeaseBackendKind::Keyvalue => run_tick(
            store.clone(),
            KeyValueLeaseBackend::new(store),
            &config,
            phases.as_deref(),
        ),
    };

    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| CliError::Report(err.to_string()))?;
    write_stdout_line(&rendered).map_err(|err| CliError::Output(err.to_string()))?;
    Ok(report)
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Runs a tick over a concrete lease backend.
fn run_tick<B: LeaseBackend + Clone>(
    store: SqliteWorkOrderStore,
    backend: B,
    config: &WorkOrderConfig,
    phases: Option<&[MaintenancePhase]>,
) -> MaintenanceReport {
    let engine = WorkEngine::new(
        store,
        backend,
        HandlerRegistry::new(),
        config.engine.clone(),
    );
    engine.tick(phases, Timestamp::now_utc())
}
