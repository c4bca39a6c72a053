//! auditchain: operator CLI for the tamper-evident audit ledger.
//!
//! A thin surface over `Ledger`: every subcommand opens the configured store,
//! runs one ledger operation and prints the result as JSON on stdout.  Logs
//! go to stderr.
//!
//! Usage:
//!   auditchain --config ledger.toml summary
//!   auditchain --store sqlite --path ledger.db append --json entry.json
//!   echo '{...}' | auditchain --store filesystem --path /srv/worm append --json -
//!   auditchain --store sqlite --path ledger.db verify --from-seq 1 --limit 5000
//!
//! Exit codes: 0 success, 1 error, 2 chain verification failed.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use auditchain_contracts::{
    chain::VerifyStart,
    entry::AuditEntryDraft,
    error::{LedgerError, LedgerResult},
};
use auditchain_core::{
    config::{LedgerConfig, StoreBackend},
    ledger::{Ledger, TracingObserver},
};
use auditchain_store::open_store;
use auditchain_verify::HashChainVerifier;

const EXIT_ERROR: i32 = 1;
const EXIT_CHAIN_BROKEN: i32 = 2;

// ── CLI definition ────────────────────────────────────────────────────────────

/// auditchain: append-only, SHA-256 hash-chained audit ledger.
#[derive(Parser, Debug)]
#[command(
    name = "auditchain",
    about = "Tamper-evident audit ledger",
    long_about = "Appends audit entries to a SHA-256 hash chain and verifies its integrity.\n\
                  Store selection comes from --config, overridden by --store / --path."
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store backend: memory, filesystem or sqlite.
    #[arg(long, global = true)]
    store: Option<StoreBackend>,

    /// Store root directory (filesystem) or database file (sqlite).
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append one entry read as JSON from a file, or stdin with `-`.
    Append {
        #[arg(long)]
        json: String,
    },
    /// Print the entry with this id.
    Get { id: String },
    /// Print every entry of a trace.
    Trace { trace_id: String },
    /// Print up to COUNT entries starting at sequence FROM.
    Range { from: u64, count: u64 },
    /// Verify chain integrity.
    Verify {
        /// Start at this sequence (default 1).
        #[arg(long, conflicts_with = "from_id")]
        from_seq: Option<u64>,
        /// Start at the entry with this id.
        #[arg(long)]
        from_id: Option<String>,
        /// Maximum entries to check (default and cap: verify.max_limit).
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Print entry count and chain head.
    Summary,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Logs on stderr so stdout stays machine-readable.  RUST_LOG overrides.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("auditchain: {}", e);
            std::process::exit(EXIT_ERROR);
        }
    }
}

/// Execute one subcommand.  Returns the process exit code.
fn run(cli: Cli) -> LedgerResult<i32> {
    let config = resolve_config(&cli)?;
    if config.store.backend == StoreBackend::Memory {
        warn!("memory backend selected; nothing will persist past this command");
    }

    let ledger = open_ledger(&config)?;

    match cli.command {
        Command::Append { json } => {
            let draft = read_draft(&json)?;
            print_json(&ledger.append(&draft)?)?;
        }
        Command::Get { id } => print_json(&ledger.get(&id)?)?,
        Command::Trace { trace_id } => print_json(&ledger.get_by_trace_id(&trace_id)?)?,
        Command::Range { from, count } => {
            print_json(&ledger.get_by_sequence_range(from, count)?)?
        }
        Command::Verify {
            from_seq,
            from_id,
            limit,
        } => {
            let start = match (from_id, from_seq) {
                (Some(id), _) => VerifyStart::EntryId(id),
                (None, Some(seq)) => VerifyStart::Sequence(seq),
                (None, None) => VerifyStart::default(),
            };
            let limit = limit.unwrap_or(config.verify.max_limit);
            let result = ledger.verify(&start, limit)?;
            print_json(&result)?;
            if !result.valid {
                return Ok(EXIT_CHAIN_BROKEN);
            }
        }
        Command::Summary => print_json(&ledger.chain_summary()?)?,
    }

    Ok(0)
}

// ── Wiring ────────────────────────────────────────────────────────────────────

/// File config first, then command-line overrides.
fn resolve_config(cli: &Cli) -> LedgerResult<LedgerConfig> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    };
    if let Some(backend) = cli.store {
        config.store.backend = backend;
    }
    if let Some(path) = &cli.path {
        config.store.path = Some(path.clone());
    }
    config.validate()?;
    Ok(config)
}

fn open_ledger(config: &LedgerConfig) -> LedgerResult<Ledger> {
    let store = open_store(&config.store)?;
    Ok(Ledger::open(store, Box::new(HashChainVerifier::new()), config)?
        .with_observer(Arc::new(TracingObserver)))
}

fn read_draft(source: &str) -> LedgerResult<AuditEntryDraft> {
    let mut text = String::new();
    if source == "-" {
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| LedgerError::InvalidArgument {
                reason: format!("failed to read stdin: {e}"),
            })?;
    } else {
        text = std::fs::read_to_string(source).map_err(|e| LedgerError::InvalidArgument {
            reason: format!("failed to read '{source}': {e}"),
        })?;
    }
    serde_json::from_str(&text).map_err(|e| LedgerError::InvalidEntry {
        reason: format!("entry JSON does not parse: {e}"),
    })
}

fn print_json<T: Serialize>(value: &T) -> LedgerResult<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| LedgerError::Storage {
        reason: format!("failed to encode output: {e}"),
    })?;
    println!("{text}");
    Ok(())
}
