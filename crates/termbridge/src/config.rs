//! Configuration management for the termbridge session manager.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/termbridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_sessions must be between 1 and 1000, got {0}")]
    InvalidMaxSessions(usize),

    #[error("default terminal size must be non-zero, got {0}x{1}")]
    InvalidDefaultSize(u16, u16),

    #[error("kill_grace_ms must be at most 60000, got {0}")]
    InvalidKillGrace(u64),

    #[error("buffer max_bytes must be greater than 0")]
    InvalidBufferCap,

    #[error("read_chunk_bytes must be between 1 and max_bytes, got {0}")]
    InvalidReadChunk(usize),

    #[error("poll_wait_ms must be at most 1000, got {0}")]
    InvalidPollWait(u64),

    #[error("default_shell not found: {0}")]
    InvalidShellPath(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the session manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Session lifecycle configuration.
    pub session: SessionConfig,

    /// Per-session output buffer configuration.
    pub buffer: BufferConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Default shell for new sessions.
    pub default_shell: String,

    /// Terminal rows for newly created sessions.
    pub default_rows: u16,

    /// Terminal columns for newly created sessions.
    pub default_cols: u16,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,

    /// How long to wait for a graceful exit before forcing a kill, in
    /// milliseconds.
    pub kill_grace_ms: u64,
}

/// Per-session output buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    /// Cap on buffered output bytes per session. On overflow the oldest
    /// bytes are discarded and the loss is reported on the next read.
    pub max_bytes: usize,

    /// How long an empty read waits for fresh output before returning, in
    /// milliseconds. Keeps poll loops cheap without busy-spinning.
    pub poll_wait_ms: u64,

    /// Size of each read from the pty master.
    pub read_chunk_bytes: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            default_rows: 24,
            default_cols: 80,
            max_sessions: 64,
            kill_grace_ms: 2000,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_bytes: 4 * 1024 * 1024, // 4MiB
            poll_wait_ms: 10,
            read_chunk_bytes: 4096,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("termbridge")
        .join("config.toml")
}

/// Returns the default shell for the current platform.
fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - TERMBRIDGE_SHELL: Override the default shell
    /// - TERMBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(shell) = std::env::var("TERMBRIDGE_SHELL") {
            if !shell.is_empty() {
                tracing::info!("Overriding default_shell from environment: {}", shell);
                self.session.default_shell = shell;
            }
        }

        if let Ok(level) = std::env::var("TERMBRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_sessions < 1 || self.session.max_sessions > 1000 {
            return Err(ConfigError::InvalidMaxSessions(self.session.max_sessions));
        }

        if self.session.default_rows == 0 || self.session.default_cols == 0 {
            return Err(ConfigError::InvalidDefaultSize(
                self.session.default_rows,
                self.session.default_cols,
            ));
        }

        if self.session.kill_grace_ms > 60_000 {
            return Err(ConfigError::InvalidKillGrace(self.session.kill_grace_ms));
        }

        if self.buffer.max_bytes == 0 {
            return Err(ConfigError::InvalidBufferCap);
        }

        if self.buffer.read_chunk_bytes == 0
            || self.buffer.read_chunk_bytes > self.buffer.max_bytes
        {
            return Err(ConfigError::InvalidReadChunk(self.buffer.read_chunk_bytes));
        }

        if self.buffer.poll_wait_ms > 1000 {
            return Err(ConfigError::InvalidPollWait(self.buffer.poll_wait_ms));
        }

        // Validate default_shell: absolute paths must exist, bare names
        // must resolve through PATH.
        let shell_path = Path::new(&self.session.default_shell);
        if shell_path.is_absolute() {
            if !shell_path.exists() {
                return Err(ConfigError::InvalidShellPath(
                    self.session.default_shell.clone(),
                ));
            }
        } else if which::which(&self.session.default_shell).is_err() {
            return Err(ConfigError::InvalidShellPath(
                self.session.default_shell.clone(),
            ));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    ///
    /// The default path is `~/.config/termbridge/config.toml`.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Invalid TOML configuration")
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}
