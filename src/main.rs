// ABOUTME: CLI entry point for table-sync
// ABOUTME: Parses commands, sets up logging and routes to the command handlers

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use table_sync::commands;
use table_sync::commands::history::HistoryOptions;
use table_sync::commands::inspect::{InspectOptions, Side};
use table_sync::commands::sync::SyncOptions;
use table_sync::config::{FileConfig, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "table-sync")]
#[command(about = "Table-to-table synchronization with bitemporal history", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the table-sync.toml config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make every configured destination table match its source
    Sync {
        /// Only sync the entry with this source table
        #[arg(long)]
        table: Option<String>,
        /// Detect and report changes without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Record changes of every configured live table in its history table
    History {
        /// Only update the entry with this live table
        #[arg(long)]
        table: Option<String>,
    },
    /// Print a table's schema as JSON
    Inspect {
        /// Table as `table` or `schema.table`
        #[arg(long)]
        table: String,
        /// Which configured database to read from
        #[arg(long, value_enum, default_value_t = Side::Source)]
        side: Side,
        /// Use these columns as the primary key (comma-separated)
        #[arg(long, value_delimiter = ',')]
        primary_key: Option<Vec<String>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = FileConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    match cli.command {
        Commands::Sync { table, dry_run } => {
            let options = SyncOptions {
                allow_self_signed_certs: cli.allow_self_signed_certs,
                table,
                dry_run,
            };
            commands::sync(&config, &options).await?;
        }
        Commands::History { table } => {
            let options = HistoryOptions {
                allow_self_signed_certs: cli.allow_self_signed_certs,
                table,
            };
            commands::history(&config, &options).await?;
        }
        Commands::Inspect {
            table,
            side,
            primary_key,
        } => {
            let options = InspectOptions {
                allow_self_signed_certs: cli.allow_self_signed_certs,
                side,
                table,
                primary_key,
            };
            commands::inspect(&config, &options).await?;
        }
    }

    Ok(())
}
