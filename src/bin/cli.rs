//! StrataKV CLI
//!
//! Command-line interface for inspecting and editing a StrataKV data
//! directory. Opens the engine, runs one command, closes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stratakv::{Config, Engine};

/// StrataKV CLI
#[derive(Parser, Debug)]
#[command(name = "stratakv-cli")]
#[command(about = "CLI for the StrataKV storage engine")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./stratakv_data")]
    data_dir: PathBuf,

    /// Verify segment checksums on open
    #[arg(long)]
    verify: bool,

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
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List live entries in key order
    Scan {
        /// First key to include
        #[arg(long)]
        from: Option<String>,

        /// First key to exclude
        #[arg(long)]
        to: Option<String>,
    },

    /// Write the MemTable out as a segment
    Flush,

    /// Merge all segments into one
    Compact,

    /// Show segment and generation counts
    Stats,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stratakv=debug")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}

fn run(args: Args) -> stratakv::Result<()> {
    let config = Config::builder()
        .data_dir(args.data_dir)
        .verify_checksums(args.verify)
        .build();
    let engine = Engine::open(config)?;

    match args.command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Commands::Put { key, value } => {
            engine.put(key.into_bytes(), value.into_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            engine.delete(key.into_bytes())?;
            println!("OK");
        }
        Commands::Scan { from, to } => {
            let iter = engine.range(
                from.as_deref().map(str::as_bytes),
                to.as_deref().map(str::as_bytes),
            )?;
            for entry in iter {
                let value = entry.value().map(|v| v.to_vec()).unwrap_or_default();
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(entry.key()),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Commands::Flush => {
            engine.flush()?;
            println!("OK");
        }
        Commands::Compact => {
            engine.compact()?;
            println!("OK");
        }
        Commands::Stats => {
            println!("data_dir:        {}", engine.data_dir().display());
            println!("segments:        {}", engine.segment_count());
            println!("generations:     {:?}", engine.segment_generations());
            println!("next_generation: {}", engine.next_generation());
        }
    }

    engine.close()
}
