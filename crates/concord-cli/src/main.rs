//! Concord CLI - ledger read API and configuration checks

use anyhow::{bail, Context};
use clap::Parser;
use concord_core::{ConcordConfig, LedgerBlock, LedgerStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "concord")]
#[command(about = "Concord - Auditable multi-model answers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Verify the hash chain over a range of blocks
    Verify {
        /// Ledger database path
        #[arg(long)]
        db: PathBuf,
        /// First block to check
        #[arg(long, default_value_t = 0)]
        from: u64,
        /// Last block to check (defaults to the tail)
        #[arg(long)]
        to: Option<u64>,
    },
    /// Print one ledger block
    Block {
        /// Ledger database path
        #[arg(long)]
        db: PathBuf,
        /// Block sequence number
        #[arg(long)]
        sequence: u64,
    },
    /// Show the ledger length and its newest block
    Tail {
        /// Ledger database path
        #[arg(long)]
        db: PathBuf,
    },
    /// Check configuration validity
    Check {
        /// Configuration file path
        #[arg(short, long, default_value = "config/concord.json")]
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct TailView {
    blocks: u64,
    tail: Option<LedgerBlock>,
}

fn open_ledger(db: &Path) -> anyhow::Result<LedgerStore> {
    LedgerStore::open(db).with_context(|| format!("opening ledger at {}", db.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Some(Commands::Verify { db, from, to }) => {
            let ledger = open_ledger(&db)?;
            let report = ledger.verify_chain(from, to)?;
            print_json(&report)?;
            if let (Some(sequence), Some(kind)) = (report.first_break, report.break_kind) {
                bail!("ledger chain broken at block {} ({})", sequence, kind);
            }
        }
        Some(Commands::Block { db, sequence }) => {
            let ledger = open_ledger(&db)?;
            print_json(&ledger.get(sequence)?)?;
        }
        Some(Commands::Tail { db }) => {
            let ledger = open_ledger(&db)?;
            print_json(&TailView {
                blocks: ledger.len()?,
                tail: ledger.tail()?,
            })?;
        }
        Some(Commands::Check { config }) => {
            let parsed = ConcordConfig::from_file(&config)
                .with_context(|| format!("checking {}", config.display()))?;
            info!(path = %config.display(), "Configuration valid");
            println!(
                "Configuration OK: {} models, {} dimensions, debate {}",
                parsed.models.model_ids.len(),
                parsed.synthesis.dimensions.len(),
                if parsed.debate.enabled { "enabled" } else { "disabled" }
            );
        }
        None => {
            println!("Concord v{} - Use --help for commands", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
