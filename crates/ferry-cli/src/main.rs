//! ferry: migrate files from a watched Google Drive folder into blob storage.
//!
//! Configuration comes from the environment (and `.env`); see
//! `MigrationConfig::from_env`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ferry_cli::app::App;
use ferry_cli::{cancel_on_shutdown, format_stats_table, init_tracing};
use ferry_core::MigrationConfig;
use ferry_worker::TransferRunState;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "ferry", about = "Drive to blob storage migration pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the ledger schema if it does not exist
    Bootstrap,
    /// Run discovery passes until the watched folder is empty
    Discover,
    /// Transfer eligible records until none are left
    Transfer {
        /// Records claimed per batch (defaults to TRANSFER_BATCH_SIZE)
        #[arg(long)]
        batch_size: Option<i64>,
    },
    /// Alternate discovery and transfer until a pass finds no work
    Run,
    /// Poll discovery and transfer continuously until interrupted
    Serve,
    /// Show ledger counts
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Store the destination key computed by the naming step
    Assign {
        /// Remote identity of the file
        identity_key: String,
        /// Blob store key to write the file to
        destination_key: String,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize report")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = MigrationConfig::from_env().context("Invalid configuration")?;
    if let Commands::Transfer {
        batch_size: Some(batch_size),
    } = &cli.command
    {
        anyhow::ensure!(*batch_size > 0, "--batch-size must be greater than 0");
        config.pipeline.transfer_batch_size = *batch_size;
    }
    tracing::debug!(environment = %config.environment, "Configuration loaded");

    let app = App::new(config)?;

    match cli.command {
        Commands::Bootstrap => {
            app.bootstrap().await?;
            println!("Schema ready");
        }
        Commands::Discover => {
            let driver = app.driver().await?;
            let cancel = cancel_on_shutdown();
            let report = driver
                .discovery()
                .run_until_empty(&driver.settings().watch_location, &cancel)
                .await?;
            print_json(&report)?;
        }
        Commands::Transfer { .. } => {
            let driver = app.driver().await?;
            let cancel = cancel_on_shutdown();
            let state = TransferRunState::new();
            let report = driver.run_transfer_workers(&state, &cancel).await?;
            print_json(&report)?;
        }
        Commands::Run => {
            let driver = app.driver().await?;
            let cancel = cancel_on_shutdown();
            let report = driver.run_once(&cancel).await?;
            print_json(&report)?;
        }
        Commands::Serve => {
            let driver = app.driver().await?;
            let cancel = cancel_on_shutdown();
            tracing::info!(
                watch_location = %driver.settings().watch_location,
                transfer_workers = driver.settings().transfer_workers,
                "Starting ferry service"
            );
            driver.run_forever(&cancel).await;
        }
        Commands::Status { json } => {
            let stats = app
                .ledger()
                .stats(app.config.pipeline.claim_ttl)
                .await
                .context("Failed to read ledger counts")?;
            if json {
                print_json(&stats)?;
            } else {
                print!("{}", format_stats_table(&stats));
            }
        }
        Commands::Assign {
            identity_key,
            destination_key,
        } => {
            ferry_storage::keys::validate_destination_key(&destination_key)?;
            let record = app
                .ledger()
                .set_destination_key(
                    &identity_key,
                    &destination_key,
                    app.config.pipeline.claim_ttl,
                )
                .await
                .with_context(|| format!("Failed to assign destination for {identity_key}"))?;
            print_json(&record)?;
        }
    }

    Ok(())
}
