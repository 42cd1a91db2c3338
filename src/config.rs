//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `MESHGW_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `meshgw.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:8765"
//! ui_origin = "http://localhost:3000"
//! log_capacity = 300
//!
//! [transport]
//! service_uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
//! command_uuid = "6e400002-b5a3-f393-e0a9-e50e24dcca9e"
//! notify_uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e"
//! connect_timeout_secs = 10
//! write_timeout_ms = 1500
//! retry_delay_ms = 100
//! settle_delay_ms = 500
//!
//! [scan]
//! ttl_secs = 180
//! round_secs = 4
//! name_prefix = "LifeLink"
//! vendor_prefixes = ["24:6F:28", "E8:6B:EA", "7C:9E:BD"]
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `127.0.0.1:8765`). Override with
    /// `MESHGW_LISTEN`.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Browser UI origin allowed by CORS (default `http://localhost:3000`).
    #[serde(default = "default_ui_origin")]
    pub ui_origin: String,
    /// Maximum lines retained in the protocol log ring (default 300).
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

/// BLE link settings: the NUS-style UART service and timing knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Advertised service UUID the node exposes.
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    /// Write-only command characteristic.
    #[serde(default = "default_command_uuid")]
    pub command_uuid: String,
    /// Notify-only response characteristic.
    #[serde(default = "default_notify_uuid")]
    pub notify_uuid: String,
    /// Overall connection-establishment deadline in seconds (default 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Deadline for a single characteristic write in milliseconds (default 1500).
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Backoff between correlator attempts in milliseconds (default 100).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Pause after a teardown before reconnecting, in milliseconds (default
    /// 500). The radio stack can reject a new connection while the old one
    /// is still releasing.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

/// Device discovery settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// How long a discovered-but-unseen device stays listed, in seconds
    /// (default 180).
    #[serde(default = "default_scan_ttl_secs")]
    pub ttl_secs: u64,
    /// Length of one discovery burst in seconds (default 4).
    #[serde(default = "default_scan_round_secs")]
    pub round_secs: u64,
    /// Display-name prefix that marks a node even when the service UUID is
    /// not in the advertisement (default `LifeLink`).
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Hardware-vendor MAC prefixes accepted as a last-resort heuristic
    /// (default: common ESP32 OUIs).
    #[serde(default = "default_vendor_prefixes")]
    pub vendor_prefixes: Vec<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "127.0.0.1:8765".to_string()
}
fn default_ui_origin() -> String {
    "http://localhost:3000".to_string()
}
fn default_log_capacity() -> usize {
    300
}
fn default_service_uuid() -> String {
    "6e400001-b5a3-f393-e0a9-e50e24dcca9e".to_string()
}
fn default_command_uuid() -> String {
    "6e400002-b5a3-f393-e0a9-e50e24dcca9e".to_string()
}
fn default_notify_uuid() -> String {
    "6e400003-b5a3-f393-e0a9-e50e24dcca9e".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_write_timeout_ms() -> u64 {
    1500
}
fn default_retry_delay_ms() -> u64 {
    100
}
fn default_settle_delay_ms() -> u64 {
    500
}
fn default_scan_ttl_secs() -> u64 {
    180
}
fn default_scan_round_secs() -> u64 {
    4
}
fn default_name_prefix() -> String {
    "LifeLink".to_string()
}
fn default_vendor_prefixes() -> Vec<String> {
    vec![
        "24:6F:28".to_string(),
        "E8:6B:EA".to_string(),
        "7C:9E:BD".to_string(),
    ]
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            ui_origin: default_ui_origin(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            command_uuid: default_command_uuid(),
            notify_uuid: default_notify_uuid(),
            connect_timeout_secs: default_connect_timeout_secs(),
            write_timeout_ms: default_write_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_scan_ttl_secs(),
            round_secs: default_scan_round_secs(),
            name_prefix: default_name_prefix(),
            vendor_prefixes: default_vendor_prefixes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            transport: TransportConfig::default(),
            scan: ScanConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise
    /// looks for `meshgw.toml` in the current directory, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("meshgw.toml").exists() {
            let content =
                std::fs::read_to_string("meshgw.toml").expect("Failed to read meshgw.toml");
            toml::from_str(&content).expect("Failed to parse meshgw.toml")
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(listen) = std::env::var("MESHGW_LISTEN") {
            config.server.listen = listen;
        }

        config
    }
}
