//! Server configuration

use crate::hooks::HookConfig;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// SFTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port (default: 2022 for non-privileged use)
    #[serde(default = "default_port")]
    pub port: u16,

    /// SSH host key path; an ephemeral ed25519 key is generated when the
    /// file does not exist
    #[serde(default = "default_host_key_path")]
    pub host_key_path: PathBuf,

    /// JSON users file loaded into the in-memory store at startup
    #[serde(default)]
    pub users_file: Option<PathBuf>,

    /// Seconds a connection with no activity and no transfers may live,
    /// 0 disables idle eviction
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// SSH inactivity timeout in seconds
    #[serde(default = "default_ssh_timeout")]
    pub ssh_timeout_secs: u64,

    /// Failed logins tolerated per address before lockout (NIST 800-53: AC-7)
    #[serde(default = "default_max_auth_failures")]
    pub max_auth_failures: u32,

    /// Failure window in seconds (NIST 800-53: AC-7)
    #[serde(default = "default_auth_window")]
    pub auth_window_secs: u64,

    /// Lockout duration in seconds after the limit is hit (NIST 800-53: AC-7)
    #[serde(default = "default_lockout_duration")]
    pub lockout_duration_secs: u64,

    /// Action hook configuration
    #[serde(default)]
    pub actions: HookConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
///
/// NIST 800-53: AU-2 (Audit Events), AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (text or json)
    pub format: LogFormat,
    /// Optional log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            file: None,
        }
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text logging for human readability
    Text,
    /// JSON structured logging for SIEM integration
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            host_key_path: default_host_key_path(),
            users_file: None,
            idle_timeout_secs: default_idle_timeout(),
            ssh_timeout_secs: default_ssh_timeout(),
            max_auth_failures: default_max_auth_failures(),
            auth_window_secs: default_auth_window(),
            lockout_duration_secs: default_lockout_duration(),
            actions: HookConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.port == 0 {
            return Err(crate::Error::Config("port must not be 0".to_string()));
        }
        if let Some(users_file) = &self.users_file {
            if !users_file.exists() {
                return Err(crate::Error::Config(format!(
                    "users file does not exist: {:?}",
                    users_file
                )));
            }
        }
        if !self.actions.execute_on.is_empty()
            && self.actions.command.is_none()
            && self.actions.http_notification_url.is_none()
        {
            return Err(crate::Error::Config(
                "actions.execute_on is set but no command or notification URL is configured"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2022
}

fn default_host_key_path() -> PathBuf {
    PathBuf::from("/etc/driftgate/host_ed25519_key")
}

// Idle sessions are evicted after 5 minutes without activity
fn default_idle_timeout() -> u64 {
    300
}

fn default_ssh_timeout() -> u64 {
    300
}

// NIST 800-53: AC-7 (Unsuccessful Logon Attempts)
fn default_max_auth_failures() -> u32 {
    5
}

fn default_auth_window() -> u64 {
    300
}

fn default_lockout_duration() -> u64 {
    900
}
