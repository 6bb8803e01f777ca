//! Configuration system for the `WireChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/wirechat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::connection::ConnectionConfig;

/// Endpoint used when nothing else is configured.
pub const DEFAULT_URL: &str = "ws://localhost:8000/ws";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The endpoint URL is not a usable WebSocket URL.
    #[error("invalid endpoint URL {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    connection: ConnectionFileConfig,
    reconnect: ReconnectFileConfig,
    history: HistoryFileConfig,
    ui: UiFileConfig,
}

/// `[connection]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConnectionFileConfig {
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

/// `[history]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HistoryFileConfig {
    enabled: Option<bool>,
    path: Option<PathBuf>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    sound: Option<bool>,
    timestamp_format: Option<String>,
    chat_event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Reconnect policy: bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Automatic reconnect attempts allowed before giving up.
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound for the doubled delay.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl ReconnectConfig {
    /// Delay scheduled after the `n`-th consecutive failure (1-based):
    /// `min(initial_delay * 2^(n-1), max_delay)`.
    #[must_use]
    pub fn delay_for_failure(&self, n: u32) -> Duration {
        2u32.checked_pow(n.saturating_sub(1))
            .map_or(self.max_delay, |factor| {
                self.initial_delay.saturating_mul(factor).min(self.max_delay)
            })
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Connection --
    /// Endpoint WebSocket URL.
    pub url: String,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Channel capacity for command/event mpsc channels.
    pub channel_capacity: usize,
    /// Reconnect backoff policy.
    pub reconnect: ReconnectConfig,

    // -- History --
    /// Whether the message log is persisted between runs.
    pub history_enabled: bool,
    /// Explicit history file; `None` means the default data directory.
    pub history_path: Option<PathBuf>,

    // -- UI --
    /// Ring the terminal bell when a reply is delivered.
    pub sound: bool,
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
    /// Buffer size for the conversation event broadcast.
    pub chat_event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
            history_enabled: true,
            history_path: None,
            sound: true,
            timestamp_format: "%H:%M".to_string(),
            chat_event_buffer: 64,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/wirechat/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or the resolved URL is not a `ws://` / `wss://` URL.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        validate_url(&config.url)?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            url: cli
                .url
                .clone()
                .or_else(|| file.connection.url.clone())
                .unwrap_or(defaults.url),
            connect_timeout: file
                .connection
                .connect_timeout_ms
                .map_or(defaults.connect_timeout, Duration::from_millis),
            channel_capacity: file
                .connection
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            reconnect: ReconnectConfig {
                max_attempts: cli
                    .max_attempts
                    .or(file.reconnect.max_attempts)
                    .unwrap_or(defaults.reconnect.max_attempts),
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
            },
            history_enabled: !cli.no_history
                && file.history.enabled.unwrap_or(defaults.history_enabled),
            history_path: cli
                .history_file
                .clone()
                .or_else(|| file.history.path.clone()),
            sound: !cli.mute && file.ui.sound.unwrap_or(defaults.sound),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
            chat_event_buffer: file
                .ui
                .chat_event_buffer
                .unwrap_or(defaults.chat_event_buffer),
        }
    }

    /// Build the [`ConnectionConfig`] for the connection manager.
    #[must_use]
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url.clone(),
            reconnect: self.reconnect,
            channel_capacity: self.channel_capacity,
        }
    }

    /// Where the message log is persisted, if history is enabled.
    ///
    /// Falls back to `<data_dir>/wirechat/history.json`; returns `None`
    /// when history is disabled or no data directory can be determined.
    #[must_use]
    pub fn resolved_history_path(&self) -> Option<PathBuf> {
        if !self.history_enabled {
            return None;
        }
        self.history_path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("wirechat").join("history.json")))
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Self-healing WebSocket chat client")]
pub struct CliArgs {
    /// WebSocket URL of the chat endpoint.
    #[arg(long, env = "WIRECHAT_URL")]
    pub url: Option<String>,

    /// Path to config file (default: `~/.config/wirechat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Automatic reconnect attempts before giving up.
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Path to the history file.
    #[arg(long)]
    pub history_file: Option<PathBuf>,

    /// Do not persist the message log.
    #[arg(long)]
    pub no_history: bool,

    /// Do not ring the bell on replies.
    #[arg(long)]
    pub mute: bool,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "WIRECHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/wirechat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Accept only absolute `ws://` or `wss://` URLs with a host.
fn validate_url(raw: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_owned(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(invalid(format!("unsupported scheme {}", parsed.scheme())));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_owned()));
    }
    Ok(())
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("wirechat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
