use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_thought_ledger::{
    config::{Config, ExportConfig},
    migrate::{migrate_dir, MigrateOptions},
    store::{FileThoughtStore, ThoughtStore},
};

/// Inspect and maintain a thought-ledger store.
#[derive(Debug, Parser)]
#[command(name = "thought-ledger", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Migrate legacy flat exports into the store layout
    Migrate {
        /// Directory of legacy {session, nodes[]} JSON files
        src_dir: PathBuf,
        /// Report outcomes without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Report already-present sessions as skipped
        #[arg(long)]
        skip_existing: bool,
        /// Delete each source file after its session lands
        #[arg(long)]
        delete_source: bool,
    },
    /// Verify a session's manifest and hash chains
    Verify {
        /// Session id
        session_id: String,
    },
    /// Write a session's linked export snapshot
    Export {
        /// Session id
        session_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    let cli = Cli::parse();

    match cli.command {
        Command::Migrate {
            src_dir,
            dry_run,
            skip_existing,
            delete_source,
        } => {
            // Migration replays terminal thoughts; suppress per-session
            // auto-export so the run only writes the store layout.
            let store = FileThoughtStore::new(&config.storage.root)
                .await?
                .with_export(ExportConfig {
                    dir: config.export.dir.clone(),
                    auto_export: false,
                });
            let options = MigrateOptions {
                dry_run,
                skip_existing,
                delete_source,
            };
            let report = migrate_dir(&store, &src_dir, options).await?;
            for file in &report.files {
                println!("{}: {}", file.file, serde_json::to_string(&file.outcome)?);
            }
            println!("{}", report.summary());
            if report.failed() > 0 {
                std::process::exit(1);
            }
        }
        Command::Verify { session_id } => {
            let store = FileThoughtStore::new(&config.storage.root).await?;
            let report = store.validate_session_integrity(&session_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                error!(session_id = %session_id, issues = report.issues.len(), "Integrity check failed");
                std::process::exit(1);
            }
            info!(session_id = %session_id, "Integrity check passed");
        }
        Command::Export { session_id } => {
            let store = FileThoughtStore::new(&config.storage.root)
                .await?
                .with_export(config.export.clone());
            let path = store.export_session(&session_id).await?;
            info!(session_id = %session_id, path = %path.display(), "Export written");
            println!("{}", path.display());
        }
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        mcp_thought_ledger::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        mcp_thought_ledger::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
