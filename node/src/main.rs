// Copyright (c) 2026 Keelworks Systems. MIT License.
// See LICENSE for details.

//! # Keel Platform Node
//!
//! Entry point for the `keel-node` binary. Parses CLI arguments, initializes
//! logging and metrics, restores hosted tokens from disk, and serves the
//! HTTP/WS API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     - start the platform node
//! - `init`    - initialize data directory and generate the operator key
//! - `status`  - query a running node's status endpoint
//! - `version` - print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use keel_core::account::Account;
use keel_core::keys::KeelKeypair;
use keel_token::asset_token::{AssetToken, TokenId};
use keel_token::registry::BrokerRegistry;
use keel_token::store::TokenStore;

use cli::{Commands, KeelNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Broadcast channel capacity for live event streaming.
/// 256 is large enough to absorb short bursts without dropping events
/// for connected WebSocket clients.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How often the hosted-token gauges are recomputed from the token map.
const GAUGE_REFRESH_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KeelNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full platform node: API server, metrics endpoint, and
/// persistent token hosting.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "keel_node=info,keel_token=info,keel_core=info,tower_http=debug",
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting keel-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let store = TokenStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Hosted tokens ---
    let tokens: Arc<DashMap<TokenId, AssetToken>> = Arc::new(DashMap::new());
    let persisted = store
        .all_tokens()
        .context("failed to load persisted tokens")?;
    let restored = persisted.len();
    for token in persisted {
        tokens.insert(token.id, token);
    }
    if restored > 0 {
        tracing::info!(count = restored, "hosted tokens restored from disk");
    }

    // --- Broker registry ---
    // First boot needs an owner account for the registry; it comes from the
    // operator key (flag or key file). Subsequent boots read the persisted
    // registry and never look at the key again.
    let registry = match store
        .get_registry()
        .context("failed to load broker registry")?
    {
        Some(registry) => registry,
        None => {
            let owner = resolve_operator_account(&args)?;
            let registry = BrokerRegistry::new(owner);
            store
                .put_registry(&registry)
                .context("failed to persist broker registry")?;
            tracing::info!(owner = %owner, "broker registry created");
            registry
        }
    };

    // --- Treasury ---
    let treasury = store
        .get_treasury()
        .context("failed to load treasury")?
        .unwrap_or_default();

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            keel_core::config::PROTOCOL_VERSION,
        ),
        network: "devnet".to_string(),
        started_at: chrono::Utc::now(),
        tokens: Arc::clone(&tokens),
        registry: Arc::new(Mutex::new(registry)),
        treasury: Arc::new(Mutex::new(treasury)),
        store: store.clone(),
        event_tx: event_tx.clone(),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state.clone());
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("RPC/API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Gauge refresh ---
    // The hosted-token and escrowed-value gauges are snapshots over the whole
    // token map. Recomputing them on a timer keeps mutation handlers off the
    // scrape path.
    let tokens_ref = Arc::clone(&tokens);
    let metrics_ref = Arc::clone(&node_metrics);
    let gauge_loop = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(GAUGE_REFRESH_SECS));
        loop {
            interval.tick().await;
            let hosted = tokens_ref.len();
            let escrowed: u128 = tokens_ref.iter().map(|t| t.held_value()).sum();
            metrics_ref.tokens_hosted.set(hosted as i64);
            // Escrow is u128 base units; clamp for the i64 gauge.
            metrics_ref
                .escrowed_value
                .set(escrowed.min(i64::MAX as u128) as i64);
            tracing::debug!(hosted, "gauges refreshed");
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    gauge_loop.abort();
    store.flush().context("final database flush failed")?;
    tracing::info!("keel-node stopped");
    Ok(())
}

/// Resolves the operator account used to own the broker registry on first
/// boot: the `--operator-key` flag if given, otherwise the key file written
/// by `keel-node init`.
fn resolve_operator_account(args: &cli::RunArgs) -> Result<Account> {
    if let Some(hex_seed) = &args.operator_key {
        let keypair = KeelKeypair::from_hex(hex_seed).context("invalid --operator-key")?;
        return Ok(keypair.account());
    }

    let key_path = args.data_dir.join("operator.key");
    let contents = std::fs::read_to_string(&key_path).with_context(|| {
        format!(
            "no operator key at {} (run `keel-node init` first, or pass --operator-key)",
            key_path.display()
        )
    })?;
    let keypair = KeelKeypair::from_hex(&contents)
        .with_context(|| format!("malformed operator key file: {}", key_path.display()))?;
    Ok(keypair.account())
}

/// Initializes a new node data directory and generates an operator keypair.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("keel_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), network = %args.network, "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    // Generate the operator keypair. Its account owns the broker registry.
    let keypair = KeelKeypair::generate();
    let account_hex = keypair.account().to_hex();

    // Write the secret seed to a file inside the data directory.
    let key_path = data_dir.join("operator.key");
    std::fs::write(&key_path, format!("{}\n", hex::encode(keypair.seed_bytes())))
        .with_context(|| format!("failed to write operator key to {}", key_path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(
        account = %account_hex,
        key_path = %key_path.display(),
        "operator keypair generated"
    );

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Network        : {}", args.network);
    println!("  Operator key   : {}", key_path.display());
    println!("  Account        : {}", account_hex);

    Ok(())
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let body: String = reqwest_get_stub(&url).await?;
    println!("{}", body);
    Ok(())
}

/// Minimal HTTP GET without pulling in `reqwest` as a dependency.
/// In a real deployment, swap this for a proper HTTP client.
async fn reqwest_get_stub(url: &str) -> Result<String> {
    // Use tokio's TCP stream + raw HTTP/1.1 to avoid adding reqwest.
    let parsed: url::Url = url
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid URL: {}", e))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("missing host in URL"))?;
    let port = parsed.port().unwrap_or(80);
    let path = parsed.path();

    let addr = format!("{}:{}", host, port);
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host,
    );

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Strip HTTP headers; everything after the first blank line is the body.
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

/// Prints version information to stdout.
fn print_version() {
    println!("keel-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol  {}", keel_core::config::PROTOCOL_VERSION);
    println!("rustc     {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Minimal URL parser, just enough to extract host/port/path.
/// Avoids pulling in the `url` crate for a single use.
mod url {
    pub struct Url {
        host: String,
        port: Option<u16>,
        path: String,
    }

    impl Url {
        pub fn host_str(&self) -> Option<&str> {
            Some(&self.host)
        }

        pub fn port(&self) -> Option<u16> {
            self.port
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl std::str::FromStr for Url {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            // Strip scheme.
            let rest = s
                .strip_prefix("http://")
                .or_else(|| s.strip_prefix("https://"))
                .unwrap_or(s);

            let (authority, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, "/"),
            };

            let (host, port) = match authority.rfind(':') {
                Some(i) => {
                    let p = authority[i + 1..]
                        .parse::<u16>()
                        .map_err(|e| format!("bad port: {}", e))?;
                    (authority[..i].to_string(), Some(p))
                }
                None => (authority.to_string(), None),
            };

            Ok(Url {
                host,
                port,
                path: path.to_string(),
            })
        }
    }
}
