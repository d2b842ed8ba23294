//! filekv CLI
//!
//! Command-line interface for a filekv data file. Each invocation opens the
//! store, runs one command and closes it, so several shells can work on the
//! same file at once.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use filekv::{Config, KvError, Store, SyncStrategy};
use tracing_subscriber::{fmt, EnvFilter};

/// filekv CLI
#[derive(Parser, Debug)]
#[command(name = "filekv")]
#[command(about = "File-backed key-value store")]
#[command(version)]
struct Args {
    /// Data file
    #[arg(short, long, default_value = "./kv_store.db")]
    path: PathBuf,

    /// Seconds to wait for the file lock (0 waits forever)
    #[arg(long, default_value = "10")]
    lock_timeout: u64,

    /// fsync after every write
    #[arg(long)]
    sync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Time to live in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Set a key only if it doesn't exist
    Create {
        key: String,
        value: String,

        /// Time to live in seconds
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Delete a key
    #[command(visible_alias = "del")]
    Delete {
        /// The key to delete
        key: String,
    },

    /// Rewrite the data file without dead records
    Compact,

    /// Print store counters
    Stats,

    /// Scan the data file for corrupt records
    Verify,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,filekv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, KvError> {
    let mut builder = Config::builder()
        .path(args.path)
        .lock_timeout(match args.lock_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        })
        // One command per process; nothing to sweep in the background.
        .compaction_interval(None);
    if args.sync {
        builder = builder.sync_strategy(SyncStrategy::EveryWrite);
    }

    let store = Store::open(builder.build())?;
    let code = execute(&store, args.command)?;
    store.close()?;
    Ok(code)
}

fn execute(store: &Store, command: Commands) -> Result<ExitCode, KvError> {
    match command {
        Commands::Get { key } => match store.get(key.as_bytes()) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(KvError::NotFound) => {
                println!("(nil)");
                return Ok(ExitCode::from(1));
            }
            Err(e) => return Err(e),
        },

        Commands::Set { key, value, ttl } => {
            store.set(key.as_bytes(), value.as_bytes(), ttl.map(Duration::from_secs))?;
            println!("OK");
        }

        Commands::Create { key, value, ttl } => {
            match store.create(key.as_bytes(), value.as_bytes(), ttl.map(Duration::from_secs)) {
                Ok(()) => println!("OK"),
                Err(KvError::KeyExists) => {
                    println!("(exists)");
                    return Ok(ExitCode::from(1));
                }
                Err(e) => return Err(e),
            }
        }

        Commands::Delete { key } => match store.delete(key.as_bytes()) {
            Ok(()) => println!("(integer) 1"),
            Err(KvError::NotFound) => println!("(integer) 0"),
            Err(e) => return Err(e),
        },

        Commands::Compact => {
            let report = store.compact()?;
            println!(
                "records {} -> {}, bytes {} -> {} ({} reclaimed), quarantined {}",
                report.records_before,
                report.records_after,
                report.bytes_before,
                report.bytes_after,
                report.bytes_reclaimed(),
                report.quarantined
            );
        }

        Commands::Stats => {
            let stats = store.stats()?;
            println!("live_keys:       {}", stats.live_keys);
            println!("tombstones:      {}", stats.tombstones);
            println!("expired:         {}", stats.expired);
            println!("total_records:   {}", stats.total_records);
            println!("reclaimable:     {}", stats.reclaimable);
            println!("corrupt_records: {}", stats.corrupt_records);
            println!("file_size:       {}", stats.file_size);
            println!("generation:      {}", stats.generation);
        }

        Commands::Verify => {
            let report = store.verify()?;
            if report.is_clean() {
                println!("ok: {} records", report.records);
            } else {
                for error in report.errors() {
                    println!("{}", error);
                }
                return Ok(ExitCode::from(2));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
