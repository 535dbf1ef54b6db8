//! ethstream: serve Ethereum blocks and their transactions over HTTP.
//!
//! Usage:
//! ```bash
//! # Stream every new block from a local node
//! ethstream --rpc-url ws://localhost:8546 --listen 127.0.0.1:8080
//! curl -N http://127.0.0.1:8080/tx-start
//!
//! # Latest block only
//! curl http://127.0.0.1:8080/transactions
//! ```

use std::env;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use ethstream_core::Connector;
use ethstream_server::{build_router, init_tracing, AppState, EndpointConnector, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("version" | "--version" | "-V") => {
            println!("ethstream {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some("help" | "--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        _ => {}
    }

    let config = ServerConfig::load(&args, |key| env::var(key).ok())
        .context("invalid configuration")?;
    init_tracing(&config.log);

    let connector = Arc::new(EndpointConnector::new(
        config.rpc_url.clone(),
        config.ws_config(),
        config.http_config(),
    ));
    let shutdown = CancellationToken::new();
    let state = AppState::new(
        connector.clone(),
        config.pipeline_config(),
        config.snapshot_config(),
        shutdown.clone(),
    );
    let app = build_router(state);

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        listen = %addr,
        endpoint = %connector.endpoint(),
        version = env!("CARGO_PKG_VERSION"),
        "ethstream listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;

    tracing::info!("ethstream stopped");
    Ok(())
}

/// Resolves on Ctrl-C after cancelling every open stream.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested, closing open streams");
    shutdown.cancel();
}

fn print_usage() {
    println!("ethstream {}", env!("CARGO_PKG_VERSION"));
    println!("Serve Ethereum blocks and their transactions over HTTP\n");
    println!("USAGE:");
    println!("    ethstream [FLAGS]\n");
    println!("FLAGS:");
    println!("    --rpc-url <URL>     Upstream node (ws/wss for streaming, http/https for snapshots)");
    println!("    --listen <ADDR>     Listen address  [default: 0.0.0.0:8080]");
    println!("    --config <PATH>     TOML config file\n");
    println!("ENVIRONMENT:");
    println!("    ETHSTREAM_RPC_URL   Upstream node URL");
    println!("    ETHSTREAM_LISTEN    Listen address");
    println!("    ETHSTREAM_LOG       Log level / filter directives");
    println!("    LOG_JSON            Emit JSON logs when set to 1 or true\n");
    println!("ENDPOINTS:");
    println!("    GET /transactions   Latest block with its transactions");
    println!("    GET /tx-start       Chunked stream of every new block");
    println!("    GET /health         Liveness");
}
