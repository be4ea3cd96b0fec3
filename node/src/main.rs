// Copyright (c) 2026 Meridian Contributors. MIT License.
// See LICENSE for details.

//! # Meridian Node
//!
//! Entry point for the `meridian-node` binary. Parses CLI arguments,
//! initializes logging, and drives the ledger store.
//!
//! - `init`    — create a data directory, generate a development
//!   bookkeeper key set, and commit the genesis block
//! - `status`  — open an initialized data directory and print the chain
//!   status as JSON
//! - `version` — print build version information

mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use meridian_ledger::config::{LedgerConfig, SYSTEM_VERSION};
use meridian_ledger::crypto::keys::Keypair;
use meridian_ledger::exec::NativeEngine;
use meridian_ledger::types::Block;
use meridian_ledger::LedgerStore;

use cli::{Commands, MeridianNodeCli};
use logging::LogFormat;

fn main() -> Result<()> {
    let cli = MeridianNodeCli::parse();

    match cli.command {
        Commands::Init(args) => {
            logging::init_logging("meridian_node=info,meridian_ledger=info", LogFormat::Pretty);
            init_node(&args)
        }
        Commands::Status(args) => {
            logging::init_logging("meridian_node=warn,meridian_ledger=warn", LogFormat::Pretty);
            let status = status_json(&args.data_dir)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn open_store(data_dir: &Path) -> Result<LedgerStore> {
    LedgerStore::open(
        data_dir,
        LedgerConfig::default(),
        Box::new(NativeEngine::new()),
    )
    .with_context(|| format!("failed to open ledger store at {}", data_dir.display()))
}

/// Initialize a data directory: generate a bookkeeper key set, write the
/// secret keys beside the stores, and commit the genesis block.
fn init_node(args: &cli::InitArgs) -> Result<()> {
    let data_dir = &args.data_dir;
    if args.bookkeepers == 0 {
        anyhow::bail!("at least one bookkeeper key is required");
    }
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let keypairs: Vec<Keypair> = (0..args.bookkeepers).map(|_| Keypair::generate()).collect();
    for (i, kp) in keypairs.iter().enumerate() {
        let key_path = data_dir.join(format!("bookkeeper-{i}.key"));
        std::fs::write(&key_path, hex::encode(kp.secret_bytes()))
            .with_context(|| format!("failed to write key to {}", key_path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
        }
    }

    let timestamp = match args.timestamp {
        Some(t) => t,
        None => SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs(),
    };
    let keys: Vec<_> = keypairs.iter().map(|k| k.public_key()).collect();
    let genesis = Block::genesis(&keys, timestamp, vec![])?;

    let store = open_store(data_dir)?;
    store.init_with_genesis_block(&genesis)?;
    store.close()?;

    tracing::info!(
        genesis = %genesis.hash(),
        bookkeepers = keypairs.len(),
        "data directory initialized"
    );
    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Genesis hash   : {}", genesis.hash());
    println!("  Bookkeepers    : {}", keypairs.len());
    Ok(())
}

/// Open an initialized data directory and summarize the committed chain.
fn status_json(data_dir: &Path) -> Result<serde_json::Value> {
    let store = open_store(data_dir)?;
    let (height, hash) = store
        .current_block()
        .context("data directory is not initialized, run `meridian-node init` first")?;
    let genesis_hash = store
        .block_hash_at(0)
        .context("genesis hash missing from header index")?;
    let state_root = store.state_root_at(height)?;
    let layer2_height = store.latest_layer2_height()?;
    store.close()?;

    Ok(serde_json::json!({
        "version": SYSTEM_VERSION,
        "height": height,
        "block_hash": hash.to_hex(),
        "genesis_hash": genesis_hash.to_hex(),
        "state_root": state_root.map(|r| r.to_hex()),
        "latest_layer2_height": layer2_height,
    }))
}

/// Prints version information to stdout.
fn print_version() {
    println!("meridian-node {}", env!("CARGO_PKG_VERSION"));
    println!("store format  {SYSTEM_VERSION}");
    println!("rustc         {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_then_status_roundtrip() {
        let dir = TempDir::new().unwrap();
        let args = cli::InitArgs {
            data_dir: dir.path().to_path_buf(),
            bookkeepers: 4,
            timestamp: Some(1_700_000_000),
        };
        init_node(&args).unwrap();

        // The generated keys are on disk with one file per bookkeeper.
        for i in 0..4 {
            assert!(dir.path().join(format!("bookkeeper-{i}.key")).exists());
        }

        let status = status_json(dir.path()).unwrap();
        assert_eq!(status["height"], 0);
        assert_eq!(status["version"], SYSTEM_VERSION);
        assert_eq!(status["genesis_hash"], status["block_hash"]);

        // Re-running init against the same directory must not clobber
        // the chain: a different random key set means a different
        // genesis, which the store refuses.
        let again = init_node(&cli::InitArgs {
            data_dir: dir.path().to_path_buf(),
            bookkeepers: 4,
            timestamp: Some(1_700_000_000),
        });
        assert!(again.is_err());
    }

    #[test]
    fn status_on_empty_dir_fails() {
        let dir = TempDir::new().unwrap();
        assert!(status_json(dir.path()).is_err());
    }

    #[test]
    fn init_requires_bookkeepers() {
        let dir = TempDir::new().unwrap();
        let err = init_node(&cli::InitArgs {
            data_dir: dir.path().to_path_buf(),
            bookkeepers: 0,
            timestamp: None,
        });
        assert!(err.is_err());
    }
}
