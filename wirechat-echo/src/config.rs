//! Configuration for the `WireChat` echo endpoint.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/wirechat-echo/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

/// Errors that can occur when loading echo endpoint configuration.
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
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct EchoConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    reply_prefix: Option<String>,
}

/// CLI arguments for the echo endpoint.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "WireChat echo endpoint")]
pub struct EchoCliArgs {
    /// Address to bind to.
    #[arg(short, long, env = "WIRECHAT_ECHO_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/wirechat-echo/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Text placed before every reply.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "WIRECHAT_ECHO_LOG")]
    pub log_level: String,
}

/// Fully resolved echo endpoint configuration.
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Address to bind the server to.
    pub bind_addr: String,
    /// Text placed before every reply.
    pub reply_prefix: String,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            reply_prefix: "echo: ".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl EchoConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &EchoCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    fn resolve(cli: &EchoCliArgs, file: &EchoConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            reply_prefix: cli
                .prefix
                .clone()
                .or_else(|| file.server.reply_prefix.clone())
                .unwrap_or(defaults.reply_prefix),
            log_level: cli.log_level.clone(),
        }
    }
}

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<EchoConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(EchoConfigFile::default());
        };
        config_dir.join("wirechat-echo").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EchoConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
