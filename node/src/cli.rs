//! # CLI Interface
//!
//! Command-line argument structure for `meridian-node` using `clap`
//! derive. Three subcommands: `init`, `status`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Meridian ledger node.
///
/// Operates the commitment layer of a Meridian chain: initializes the
/// data directory with a genesis block and inspects the committed chain.
#[derive(Parser, Debug)]
#[command(
    name = "meridian-node",
    about = "Meridian ledger node",
    version,
    propagate_version = true
)]
pub struct MeridianNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a data directory: generate bookkeeper keys, build the
    /// genesis block, and commit it.
    Init(InitArgs),
    /// Open an initialized data directory and print the chain status
    /// as JSON.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// `$HOME/.meridian`, falling back to the working directory when the
/// environment carries no home.
fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".meridian")
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(
        long,
        short = 'd',
        env = "MERIDIAN_DATA_DIR",
        default_value_os_t = default_data_dir()
    )]
    pub data_dir: PathBuf,

    /// Number of bookkeeper keys to generate for the development
    /// genesis set.
    #[arg(long, default_value_t = 4)]
    pub bookkeepers: u8,

    /// Genesis timestamp (Unix seconds). Defaults to now.
    #[arg(long)]
    pub timestamp: Option<u64>,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Path to the node data directory.
    #[arg(
        long,
        short = 'd',
        env = "MERIDIAN_DATA_DIR",
        default_value_os_t = default_data_dir()
    )]
    pub data_dir: PathBuf,
}
