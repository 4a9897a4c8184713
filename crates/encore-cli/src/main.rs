//! # encore CLI
//!
//! Operator tool for Encore caches and datastores.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use encore_config::logging::{init_logging, LogLevel};
use encore_config::Config;
use encore_store::{EvictionPolicy, StoreRegistry};

mod commands;
mod target;

use target::StoreRef;

/// Inspect and repair Encore storage
#[derive(Parser)]
#[command(name = "encore")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.encore/config.toml and .encore/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show entry count, size and counters of a store
    Stats {
        #[arg(value_name = "STORE")]
        store: StoreRef,
    },

    /// Bring the journal back in line with the files on disk
    Reconcile {
        #[arg(value_name = "STORE")]
        store: StoreRef,

        /// Adopt files that have no journal entry
        #[arg(long)]
        restore: bool,
    },

    /// Remove expired cache entries
    Collect {
        #[arg(value_name = "CACHE")]
        store: StoreRef,
    },

    /// Evict cache entries by policy
    Evict {
        #[arg(value_name = "CACHE")]
        store: StoreRef,

        /// lru, lfu or largest
        #[arg(long, default_value = "lru")]
        policy: EvictionPolicy,

        /// Number of entries to evict
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },

    /// Remove every entry of a store
    Clear {
        #[arg(value_name = "STORE")]
        store: StoreRef,
    },

    /// Print a stored value (binary payloads are written raw)
    Get {
        #[arg(value_name = "STORE")]
        store: StoreRef,

        key: String,
    },

    /// Print the 32-hex fingerprint of a string
    Fingerprint { input: String },

    /// Download a URL into a datastore entry
    Download {
        url: String,

        key: String,

        /// Datastore to write into
        #[arg(long, default_value = "downloads")]
        store: String,

        /// File extension of the entry (e.g. webm)
        #[arg(long)]
        ext: Option<String>,

        /// Continue a partial file left by an interrupted download
        #[arg(long)]
        resume: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    // Operator commands look at stores as they are; drift is only repaired
    // by `reconcile`.
    config.storage.reconcile_on_open = false;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let level = match cli.verbose {
        0 => LogLevel::from_name(&config.logging.level),
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };
    init_logging(level);

    let registry = StoreRegistry::new(&config.storage);

    match cli.command {
        Commands::Stats { store } => commands::stats(&registry, &store),
        Commands::Reconcile { store, restore } => commands::reconcile(&registry, &store, restore),
        Commands::Collect { store } => commands::collect(&registry, &store),
        Commands::Evict {
            store,
            policy,
            count,
        } => commands::evict(&registry, &store, policy, count),
        Commands::Clear { store } => commands::clear(&registry, &store),
        Commands::Get { store, key } => commands::get(&registry, &store, &key),
        Commands::Fingerprint { input } => commands::fingerprint(&input),
        Commands::Download {
            url,
            key,
            store,
            ext,
            resume,
        } => commands::download(
            &config,
            &registry,
            &url,
            &store,
            &key,
            ext.as_deref(),
            resume,
        ),
    }
}
