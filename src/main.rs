#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # meshgw
//!
//! Local BLE gateway for LifeLink mesh radio nodes.
//!
//! meshgw exposes a small localhost HTTP API that the browser control UI
//! calls to scan for nodes, hold one BLE connection, and converse with the
//! connected node in its pipe-delimited command dialect (WHOAMI / STATUS /
//! NAME / SEND / HISTGET / MEMGET).
//!
//! ## API surface
//!
//! | Method | Path           | Description                                |
//! |--------|----------------|--------------------------------------------|
//! | GET    | `/health`      | Liveness, connection + busy flags          |
//! | GET    | `/devices`     | Discovery listing (`?timeout=` seconds)    |
//! | POST   | `/connect`     | Connect to `{address}`, identity warm-up   |
//! | POST   | `/disconnect`  | Tear down the link                         |
//! | POST   | `/command`     | Raw `{command}` passthrough                |
//! | GET    | `/state`       | Node state + protocol log ring             |
//! | GET    | `/messages`    | Message history (`?limit=`)                |
//! | GET    | `/members`     | Mesh member roster (`?limit=`)             |
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap CLI, router setup, graceful shutdown
//! config.rs        — TOML + env-var configuration
//! gateway.rs       — session gate, command correlator, connect state
//!                    machine, paginated fetchers
//! state.rs         — node state + notification fold, axum AppState
//! discovery.rs     — TTL'd candidate cache with connected-device pinning
//! commands.rs      — per-command (prefixes, timeout, attempts) profiles
//! records.rs       — history/roster record decoding
//! logring.rs       — newest-first protocol log ring
//! error.rs         — gateway error taxonomy
//! transport/
//!   mod.rs         — Transport/Link traits, link events
//!   ble.rs         — btleplug implementation
//! routes/          — one module per endpoint group
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use meshgw::transport::ble::BleTransport;
use meshgw::{AppState, Config, Gateway};

/// Local BLE gateway for LifeLink mesh radio nodes.
#[derive(Parser)]
#[command(name = "meshgw", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };
    run_server(config_path.as_deref()).await;
}

async fn run_server(config_path: Option<&str>) {
    let config = Config::load(config_path);

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("meshgw v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    let scan_round = Duration::from_secs(config.scan.round_secs);
    let transport = match BleTransport::new(&config.transport, scan_round).await {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("Failed to open BLE adapter: {e}");
            std::process::exit(1);
        }
    };

    let state = AppState {
        gateway: Arc::new(Gateway::new(transport, &config)),
        config: Arc::new(config),
        start_time: Instant::now(),
    };

    // The browser UI is the only intended client; everything else the CORS
    // preflight turns away.
    let cors = match state.config.server.ui_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Err(e) => {
            warn!("Invalid ui_origin, CORS disabled: {e}");
            CorsLayer::new()
        }
    };

    let app = Router::new()
        .route("/health", get(meshgw::routes::health::health))
        .route("/devices", get(meshgw::routes::devices::devices))
        .route("/connect", post(meshgw::routes::link::connect))
        .route("/disconnect", post(meshgw::routes::link::disconnect))
        .route("/command", post(meshgw::routes::command::command))
        .route("/state", get(meshgw::routes::state::state))
        .route("/messages", get(meshgw::routes::roster::messages))
        .route("/members", get(meshgw::routes::roster::members))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = TcpListener::bind(&state.config.server.listen)
        .await
        .expect("Failed to bind");

    info!("Gateway ready");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    // Leave the node's radio free for other clients.
    info!("Shutting down...");
    state.gateway.disconnect().await;
    info!("Goodbye");
}
