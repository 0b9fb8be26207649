//! # CLI Interface
//!
//! Defines the command-line argument structure for `keel-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Keel asset token platform node.
///
/// Hosts crowdfunded asset token instances, pairs their value legs with
/// the platform treasury, serves the REST API, and exposes Prometheus
/// metrics.
#[derive(Parser, Debug)]
#[command(
    name = "keel-node",
    about = "Keel asset token platform node",
    version,
    propagate_version = true
)]
pub struct KeelNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the Keel node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the platform node.
    Run(RunArgs),
    /// Initialize a new node: creates the data directory and generates
    /// a fresh operator keypair.
    Init(InitArgs),
    /// Query the status of a running node via its RPC endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node data directory where tokens, the broker registry,
    /// and keys are stored.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "KEEL_DATA_DIR", default_value = "~/.keel")]
    pub data_dir: PathBuf,

    /// Port for the REST API.
    #[arg(
        long,
        env = "KEEL_RPC_PORT",
        default_value_t = keel_core::config::DEFAULT_RPC_PORT
    )]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(
        long,
        env = "KEEL_METRICS_PORT",
        default_value_t = keel_core::config::DEFAULT_METRICS_PORT
    )]
    pub metrics_port: u16,

    /// Hex-encoded Ed25519 operator seed.
    ///
    /// If not provided, the node reads the key from `operator.key` in the
    /// data directory. **Never pass this flag in production**, use a key
    /// file or vault instead.
    #[arg(long, env = "KEEL_OPERATOR_KEY")]
    pub operator_key: Option<String>,

    /// Log output format: pretty, compact, or json.
    #[arg(long, env = "KEEL_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "KEEL_DATA_DIR", default_value = "~/.keel")]
    pub data_dir: PathBuf,

    /// Network to configure for: mainnet, testnet, or devnet.
    #[arg(long, default_value = "devnet")]
    pub network: String,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// RPC endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9760")]
    pub rpc_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        KeelNodeCli::command().debug_assert();
    }
}
