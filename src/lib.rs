#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::unused_async)]

//! meshgw library — exposes the gateway building blocks:
//!
//! - `gateway` — discovery, link lifecycle, command correlation, fetchers
//! - `transport` — abstract scan/connect/write/notify capability + BLE impl
//! - `discovery` — TTL'd candidate device cache
//! - `commands` — per-command correlation profiles
//! - `records` — history/roster wire-format decoding
//! - `state` — gateway-visible node state
//! - `config` — configuration loading
//! - `routes` — REST API route handlers

pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod logring;
pub mod records;
pub mod routes;
pub mod state;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use error::GatewayError;
pub use gateway::Gateway;
pub use state::{AppState, NodeState};
