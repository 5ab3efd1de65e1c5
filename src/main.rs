//! tile-cache - maintenance tool for durable tile stores.
//!
//! Inspects, purges and clears the SQLite files written by
//! [`PersistentTileStore`].

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tile_cache::{
    cache::{CacheTier, PersistentTileStore},
    config::{CacheConfig, ClearArgs, Cli, Command, InfoArgs, PurgeArgs, StoreArgs},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Info(args) => run_info(args).await,
        Command::Purge(args) => run_purge(args).await,
        Command::Clear(args) => run_clear(args).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "tile_cache=debug"
    } else {
        "tile_cache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolve the store path, failing if no store exists there.
fn existing_store_path(args: &StoreArgs) -> Result<PathBuf, String> {
    let path = args.resolve_path()?;
    if !path.exists() {
        return Err(format!("no tile store at {}", path.display()));
    }
    Ok(path)
}

fn open_store(args: &StoreArgs, config: CacheConfig) -> Result<PersistentTileStore, String> {
    let path = existing_store_path(args)?;
    let store = match args.db {
        Some(_) => PersistentTileStore::open(&path, config),
        None => PersistentTileStore::open_at(args.location.into_location(), &args.name, config),
    };
    store.map_err(|e| e.to_string())
}

// =============================================================================
// Info Command
// =============================================================================

async fn run_info(args: InfoArgs) -> ExitCode {
    let store = match open_store(&args.store, CacheConfig::default().with_read_only(true)) {
        Ok(store) => store,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let file_size = match store.file_size().await {
        Ok(size) => size,
        Err(e) => {
            error!("Failed to stat store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        let json = serde_json::json!({
            "path": store.path().display().to_string(),
            "tiles": store.len(),
            "file_size": file_size,
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to render JSON: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("Store: {}", store.path().display());
        println!("Tiles: {}", store.len());
        println!(
            "Size:  {} bytes ({:.2} MB)",
            file_size,
            file_size as f64 / (1024.0 * 1024.0)
        );
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Purge Command
// =============================================================================

async fn run_purge(args: PurgeArgs) -> ExitCode {
    let config = args.cache_config();
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    // Open without limits so the pass below accounts for everything it removes
    let store = match open_store(&args.store, CacheConfig::default()) {
        Ok(store) => store,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let before = store.len();

    if let Err(e) = store.reconfigure(config) {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    match store.purge().await {
        Ok(removed) => {
            info!(removed, before, after = store.len(), "Purge finished");
            println!("Removed {} of {} tiles", removed, before);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Purge failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Clear Command
// =============================================================================

async fn run_clear(args: ClearArgs) -> ExitCode {
    let store = match open_store(&args.store, CacheConfig::default()) {
        Ok(store) => store,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let before = store.len();

    let result = match args.cache_key.as_deref() {
        Some(cache_key) => store.clear_for_cache_key(cache_key).await,
        None => store.clear().await,
    };

    match result {
        Ok(()) => {
            println!("Removed {} tiles", before - store.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Clear failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
