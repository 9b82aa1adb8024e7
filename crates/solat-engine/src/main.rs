//! Execution safety engine - entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use solat_engine::{admin, AppConfig, Application};

/// Execution safety and risk gating engine
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file path (can also be set via SOLAT_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the engine against the paper broker (default)
    Run,
    /// Inspect or change the durable kill switch (engine should be stopped)
    KillSwitch {
        #[command(subcommand)]
        action: KillSwitchAction,
    },
    /// Ledger tools
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
}

#[derive(Subcommand, Debug)]
enum KillSwitchAction {
    Status,
    Activate {
        #[arg(long)]
        reason: String,
    },
    Reset,
}

#[derive(Subcommand, Debug)]
enum LedgerAction {
    /// Entry counts by type and torn-tail detection
    Inspect { path: PathBuf },
}

fn load_config(cli_path: Option<String>) -> Result<AppConfig> {
    // CLI arg > SOLAT_CONFIG env var > default
    let path = cli_path
        .or_else(|| std::env::var("SOLAT_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());
    info!(config_path = %path, "Loading configuration");
    Ok(AppConfig::load(&path)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    solat_telemetry::init_logging()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("Starting solat-engine v{}", env!("CARGO_PKG_VERSION"));
            let config = load_config(cli.config)?;
            let app = Application::start(config).await?;
            app.run().await?;
        }
        Command::KillSwitch { action } => {
            let config = load_config(cli.config)?;
            let path = &config.persistence.kill_switch_path;
            match action {
                KillSwitchAction::Status => {
                    let state = admin::kill_switch_status(path)?;
                    println!("{}", serde_json::to_string_pretty(&state)?);
                }
                KillSwitchAction::Activate { reason } => {
                    let state = admin::activate_kill_switch(path, &reason)?;
                    println!("{}", serde_json::to_string_pretty(&state)?);
                }
                KillSwitchAction::Reset => {
                    let was_active = admin::reset_kill_switch(path)?;
                    println!("kill switch reset (was active: {was_active})");
                }
            }
        }
        Command::Ledger {
            action: LedgerAction::Inspect { path },
        } => {
            let summary = admin::inspect_ledger(&path)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
