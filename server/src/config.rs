//! Server configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML file named
//! by `--config`, environment variables, command-line flags.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ethstream_core::pipeline::PipelineConfig;
use ethstream_core::snapshot::SnapshotConfig;
use ethstream_http::HttpClientConfig;
use ethstream_ws::WsClientConfig;

use crate::telemetry::LogConfig;

pub const ENV_RPC_URL: &str = "ETHSTREAM_RPC_URL";
pub const ENV_LISTEN: &str = "ETHSTREAM_LISTEN";
pub const ENV_LOG: &str = "ETHSTREAM_LOG";
pub const ENV_LOG_JSON: &str = "LOG_JSON";

/// Configuration failures. All of them abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no RPC endpoint configured (set rpc_url, ETHSTREAM_RPC_URL or --rpc-url)")]
    MissingRpcUrl,

    #[error("invalid listen address {0:?}")]
    InvalidListen(String),

    #[error("flag {0} expects a value")]
    MissingFlagValue(&'static str),
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Upstream node, e.g. "wss://mainnet.infura.io/ws/v3/..." (streaming needs ws/wss)
    #[serde(default)]
    pub rpc_url: String,
    /// Socket address the HTTP server binds to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Bound on each block resolution inside a stream
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Bound on each upstream call of a snapshot request
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
    /// Bound on the upstream connection handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Log the miner's balance alongside each snapshot
    #[serde(default = "bool_true")]
    pub miner_balance: bool,
    /// Header notifications buffered per subscription
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_listen() -> String { "0.0.0.0:8080".into() }
fn default_call_timeout_ms() -> u64 { 30_000 }
fn default_snapshot_timeout_ms() -> u64 { 10_000 }
fn default_connect_timeout_ms() -> u64 { 10_000 }
fn default_subscription_buffer() -> usize { 128 }
fn bool_true() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            listen: default_listen(),
            call_timeout_ms: default_call_timeout_ms(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            miner_balance: true,
            subscription_buffer: default_subscription_buffer(),
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Build the effective configuration from command-line `args` and an
    /// environment lookup.
    pub fn load(
        args: &[String],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match flag(args, "--config")? {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env);
        config.apply_flags(args)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(url) = env(ENV_RPC_URL).filter(|v| !v.is_empty()) {
            self.rpc_url = url;
        }
        if let Some(listen) = env(ENV_LISTEN).filter(|v| !v.is_empty()) {
            self.listen = listen;
        }
        if let Some(level) = env(ENV_LOG).filter(|v| !v.is_empty()) {
            self.log.level = level;
        }
        if let Some(json) = env(ENV_LOG_JSON) {
            self.log.json = matches!(json.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    fn apply_flags(&mut self, args: &[String]) -> Result<(), ConfigError> {
        if let Some(url) = flag(args, "--rpc-url")? {
            self.rpc_url = url;
        }
        if let Some(listen) = flag(args, "--listen")? {
            self.listen = listen;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::MissingRpcUrl);
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(self.listen.clone()))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            call_timeout: Some(Duration::from_millis(self.call_timeout_ms)),
        }
    }

    pub fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            miner_balance: self.miner_balance,
            call_timeout: Duration::from_millis(self.snapshot_timeout_ms),
        }
    }

    pub fn ws_config(&self) -> WsClientConfig {
        WsClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.call_timeout_ms),
            subscription_buffer: self.subscription_buffer,
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            request_timeout: Duration::from_millis(self.snapshot_timeout_ms),
        }
    }
}

/// Value following `name`, if the flag is present.
fn flag(args: &[String], name: &'static str) -> Result<Option<String>, ConfigError> {
    match args.iter().position(|a| a == name) {
        None => Ok(None),
        Some(pos) => args
            .get(pos + 1)
            .cloned()
            .map(Some)
            .ok_or(ConfigError::MissingFlagValue(name)),
    }
}
