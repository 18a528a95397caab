//! CLI commands.

mod policy;
mod run;
mod state;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use roster_reconcile::{JsonFileStore, ReconciliationEngine};
use tracing_subscriber::EnvFilter;

use crate::canvas::CanvasClient;
use crate::config::{default_config_path, RosterConfig, Secrets};
use crate::output::OutputFormat;
use crate::sheets::SheetsClient;

/// Engine wired to the live LMS, the spreadsheet ledger and the state file.
pub type LiveEngine = ReconciliationEngine<CanvasClient, SheetsClient, JsonFileStore>;

/// roster - Assign owners to completed surveys and record them in the ledger.
#[derive(Debug, Parser)]
#[command(name = "roster")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true, env = "ROSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, env = "ROSTER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch eligible events, assign owners and record new rows.
    Run(run::RunCommand),

    /// Show what a run would record without writing anything.
    Plan(run::PlanCommand),

    /// Inspect the assignment policy.
    Policy(policy::PolicyCommand),

    /// Inspect or repair rotation cursors.
    State(state::StateCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        init_tracing(&self.log_level, self.log_json);

        let ctx = CommandContext {
            config_path: self.config,
            format: self.format,
        };

        match self.command {
            Commands::Run(cmd) => cmd.run(ctx).await,
            Commands::Plan(cmd) => cmd.run(ctx).await,
            Commands::Policy(cmd) => cmd.run(ctx),
            Commands::State(cmd) => cmd.run(ctx),
            Commands::Version => {
                println!("roster {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Logs go to stderr so JSON output on stdout stays clean.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed (tests); keep the first one.
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config_path: Option<PathBuf>,
    pub format: OutputFormat,
}

impl CommandContext {
    /// Config path, preferring the flag over the default location.
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => default_config_path(),
        }
    }

    pub fn load_config(&self) -> Result<RosterConfig> {
        RosterConfig::load(&self.config_path()?)
    }

    /// Rotation store named by the config.
    pub fn store(&self, config: &RosterConfig) -> JsonFileStore {
        JsonFileStore::new(config.state.path.clone())
    }

    /// Build an engine against the live services.
    pub fn engine(&self, config: &RosterConfig) -> Result<LiveEngine> {
        let secrets = Secrets::from_env()?;
        let provider = CanvasClient::new(&config.canvas, &secrets.canvas_token)?;
        let ledger = SheetsClient::new(&config.sheets, &secrets.sheets_token)?;
        let policy = config.build_policy()?;

        Ok(ReconciliationEngine::new(
            provider,
            ledger,
            self.store(config),
            policy,
        ))
    }
}
