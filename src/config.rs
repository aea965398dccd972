//! Language server launch configuration
//!
//! `ServerConfig` describes how to start the server and how long to wait for
//! it. Values come from the builder or from environment variables:
//!
//! - `GOPLS_PATH`: server executable (default `gopls`)
//! - `LSP_SYMBOLS_REQUEST_TIMEOUT_SECS`: per-request timeout (default 30)
//! - `LSP_SYMBOLS_TRACE_IO`: `true` logs every byte exchanged at trace level

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Server executable used when none is configured
pub const DEFAULT_SERVER_COMMAND: &str = "gopls";

/// Arguments gopls is started with: a log file in the working directory,
/// verbose RPC tracing and stdio mode
pub const DEFAULT_SERVER_ARGS: [&str; 4] = ["-logfile=./gopls.log", "-rpc.trace", "-vv", "-mode=stdio"];

/// Default timeout for LSP initialization (30 seconds)
///
/// gopls loads the whole module graph before answering `initialize`.
pub const DEFAULT_INITIALIZATION_TIMEOUT_SECS: u64 = 30;

/// Default timeout for individual LSP requests (30 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum allowed timeout (5 minutes)
pub const MAX_TIMEOUT_SECS: u64 = 300;

pub const ENV_SERVER_PATH: &str = "GOPLS_PATH";
pub const ENV_REQUEST_TIMEOUT: &str = "LSP_SYMBOLS_REQUEST_TIMEOUT_SECS";
pub const ENV_TRACE_IO: &str = "LSP_SYMBOLS_TRACE_IO";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Server command must not be empty")]
    EmptyCommand,

    #[error("Invalid timeout: {timeout:?} - {reason}")]
    InvalidTimeout { timeout: Duration, reason: String },

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnvValue { name: &'static str, value: String },
}

// ============================================================================
// Core Configuration Type
// ============================================================================

/// How to launch and talk to the language server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server executable
    pub command: String,

    /// Command-line arguments
    pub args: Vec<String>,

    /// Working directory for the server process; inherited when `None`
    pub working_directory: Option<PathBuf>,

    /// Timeout for the `initialize` call
    pub initialization_timeout: Duration,

    /// Timeout for every other call
    pub request_timeout: Duration,

    /// Log raw stdio traffic at trace level
    pub trace_io: bool,

    /// Client name sent in `initialize`
    pub client_name: String,

    /// Client version sent in `initialize`
    pub client_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_SERVER_COMMAND.to_string(),
            args: DEFAULT_SERVER_ARGS.iter().map(|arg| arg.to_string()).collect(),
            working_directory: None,
            initialization_timeout: Duration::from_secs(DEFAULT_INITIALIZATION_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            trace_io: false,
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Build configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(path) = lookup(ENV_SERVER_PATH).filter(|path| !path.is_empty()) {
            builder = builder.command(path);
        }

        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT) {
            let secs = value
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidEnvValue {
                    name: ENV_REQUEST_TIMEOUT,
                    value: value.clone(),
                })?;
            builder = builder.request_timeout(Duration::from_secs(secs));
        }

        if let Some(value) = lookup(ENV_TRACE_IO) {
            builder = builder.trace_io(value == "true");
        }

        builder.build()
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for ServerConfig with validation and defaults
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    command: Option<String>,
    args: Option<Vec<String>>,
    working_directory: Option<PathBuf>,
    initialization_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    trace_io: Option<bool>,
}

impl ServerConfigBuilder {
    /// Set the server executable
    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Replace the default server arguments
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Set the working directory for the server process
    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(path.into());
        self
    }

    /// Set the LSP initialization timeout
    pub fn initialization_timeout(mut self, timeout: Duration) -> Self {
        self.initialization_timeout = Some(timeout);
        self
    }

    /// Set the LSP request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Enable logging of raw stdio traffic
    pub fn trace_io(mut self, enabled: bool) -> Self {
        self.trace_io = Some(enabled);
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let defaults = ServerConfig::default();

        let command = self.command.unwrap_or(defaults.command);
        if command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }

        let initialization_timeout = self
            .initialization_timeout
            .unwrap_or(defaults.initialization_timeout);
        let request_timeout = self.request_timeout.unwrap_or(defaults.request_timeout);
        validate_timeout(initialization_timeout)?;
        validate_timeout(request_timeout)?;

        Ok(ServerConfig {
            command,
            args: self.args.unwrap_or(defaults.args),
            working_directory: self.working_directory,
            initialization_timeout,
            request_timeout,
            trace_io: self.trace_io.unwrap_or(defaults.trace_io),
            client_name: defaults.client_name,
            client_version: defaults.client_version,
        })
    }
}

fn validate_timeout(timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::InvalidTimeout {
            timeout,
            reason: "must be greater than zero".to_string(),
        });
    }

    if timeout > Duration::from_secs(MAX_TIMEOUT_SECS) {
        return Err(ConfigError::InvalidTimeout {
            timeout,
            reason: format!("must not exceed {MAX_TIMEOUT_SECS} seconds"),
        });
    }

    Ok(())
}
