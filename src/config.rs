//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **CLI flags** — `--transport`
//! 2. **Environment variables** — `MCP_TRANSPORT`, `MCP_HTTP_HOST`,
//!    `MCP_HTTP_PORT`, `AUTH_MODE`, plus the Datto credential variables
//!    (see [`crate::credentials`])
//! 3. **Config file** — path via `--config <path>`
//! 4. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! transport = "http"      # or "stdio"
//! host = "0.0.0.0"
//! port = 8080
//! auth_mode = "gateway"   # or "env"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Credentials are never read from the file. Unrecognized transport or auth
//! mode values fall back to the defaults rather than failing; the fallbacks
//! are kept in [`Config::warnings`] for the caller to log once tracing is up.

use std::fmt;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use thiserror::Error;

use crate::credentials::Credentials;

/// CLI arguments parsed by `clap`.
#[derive(Parser, Debug)]
#[command(name = "datto-rmm-mcp", version, about = "MCP server for Datto RMM")]
pub struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Transport to serve on (overrides MCP_TRANSPORT).
    #[arg(long, value_enum)]
    pub transport: Option<Transport>,
}

/// How the MCP protocol is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    #[default]
    Stdio,
    /// `POST /mcp` over HTTP.
    Http,
}

impl Transport {
    fn parse(value: &str) -> Option<Transport> {
        match value {
            "stdio" => Some(Transport::Stdio),
            "http" => Some(Transport::Http),
            _ => None,
        }
    }
}

/// Where per-call credentials come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Process environment, resolved once at startup.
    #[default]
    Env,
    /// `X-Datto-*` headers on every HTTP request.
    Gateway,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::Env => "env",
            AuthMode::Gateway => "gateway",
        }
    }

    fn parse(value: &str) -> Option<AuthMode> {
        match value {
            "env" => Some(AuthMode::Env),
            "gateway" => Some(AuthMode::Gateway),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Credentials from the environment, resolved once at load time.
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    /// Environment values that were ignored in favor of a default.
    #[serde(skip)]
    pub warnings: Vec<String>,
}

/// Transport and HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Transport to serve on (default `stdio`).
    #[serde(default)]
    pub transport: Transport,
    /// Address the HTTP transport binds (default `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the HTTP transport binds (default 8080).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Credential source for HTTP requests (default `env`).
    #[serde(default)]
    pub auth_mode: AuthMode,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            host: default_host(),
            port: default_port(),
            auth_mode: AuthMode::default(),
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

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Load configuration with the precedence chain: CLI > env > file > defaults.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let base = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        let mut config = base.with_env(|name| std::env::var(name).ok());
        if let Some(transport) = cli.transport {
            config.server.transport = transport;
        }
        Ok(config)
    }

    /// Read a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides through `lookup` and resolve credentials.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MCP_TRANSPORT") {
            match Transport::parse(value.trim()) {
                Some(t) => self.server.transport = t,
                None => self.warnings.push(format!(
                    "Unknown MCP_TRANSPORT {:?}, using {:?}",
                    value, self.server.transport
                )),
            }
        }
        if let Some(host) = lookup("MCP_HTTP_HOST").filter(|h| !h.is_empty()) {
            self.server.host = host;
        }
        if let Some(value) = lookup("MCP_HTTP_PORT") {
            match value.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => self.warnings.push(format!(
                    "Invalid MCP_HTTP_PORT {:?}, using {}",
                    value, self.server.port
                )),
            }
        }
        if let Some(value) = lookup("AUTH_MODE") {
            match AuthMode::parse(value.trim()) {
                Some(mode) => self.server.auth_mode = mode,
                None => self.warnings.push(format!(
                    "Unknown AUTH_MODE {:?}, using {}",
                    value, self.server.auth_mode
                )),
            }
        }
        self.credentials = Credentials::from_env_lookup(&lookup);
        self
    }

    /// `host:port` for the HTTP listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
