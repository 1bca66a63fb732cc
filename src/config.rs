//! Transport configuration
//!
//! Loaded from `$XDG_CONFIG_HOME/lspwire/config.toml` (or an explicit path),
//! then overridden by `LSPWIRE_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::infra::retry::RetryConfig;
use crate::infra::transport::FrameLimits;

pub const ENV_MAX_CONCURRENT: &str = "LSPWIRE_MAX_CONCURRENT";
pub const ENV_READ_TIMEOUT: &str = "LSPWIRE_READ_TIMEOUT";
pub const ENV_LOG_WIRE: &str = "LSPWIRE_LOG_WIRE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireConfig {
    /// Largest accepted `Content-Length`.
    #[serde(default = "defaults::max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Largest accepted header block, terminator included.
    #[serde(default = "defaults::max_header_bytes")]
    pub max_header_bytes: usize,

    /// Worker limit for concurrent requests; 0 runs every handler inline.
    #[serde(default = "defaults::max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    #[serde(default = "defaults::max_consecutive_framing_errors")]
    pub max_consecutive_framing_errors: u32,

    /// Read deadline per frame; unset blocks indefinitely.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,

    /// How long a closing connection waits for running handlers before
    /// cancelling them, and again before abandoning them.
    #[serde(default = "defaults::shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub log_wire_traffic: bool,

    #[serde(default)]
    pub io_retry: RetryConfig,
}

mod defaults {
    pub fn max_frame_bytes() -> usize {
        64 * 1024 * 1024
    }
    pub fn max_header_bytes() -> usize {
        8 * 1024
    }
    pub fn max_concurrent_requests() -> usize {
        8
    }
    pub fn max_consecutive_framing_errors() -> u32 {
        3
    }
    pub fn shutdown_grace_ms() -> u64 {
        2000
    }
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: defaults::max_frame_bytes(),
            max_header_bytes: defaults::max_header_bytes(),
            max_concurrent_requests: defaults::max_concurrent_requests(),
            max_consecutive_framing_errors: defaults::max_consecutive_framing_errors(),
            read_timeout_secs: None,
            shutdown_grace_ms: defaults::shutdown_grace_ms(),
            log_wire_traffic: false,
            io_retry: RetryConfig::default(),
        }
    }
}

impl WireConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields defaults; environment overrides apply either way.
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };
        let config = Self::load_from_path(&path).await?;
        let config = apply_env_overrides(config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lspwire")
            .join("config.toml")
    }

    async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_frame_bytes == 0 {
            return Err(invalid("max_frame_bytes", "must be greater than 0"));
        }
        // Must fit at least "Content-Length: 0\r\n\r\n".
        if self.max_header_bytes < 32 {
            return Err(invalid("max_header_bytes", "must be at least 32"));
        }
        if self.max_consecutive_framing_errors == 0 {
            return Err(invalid(
                "max_consecutive_framing_errors",
                "must be greater than 0",
            ));
        }
        if self.read_timeout_secs == Some(0) {
            return Err(invalid("read_timeout_secs", "must be greater than 0 when set"));
        }
        if self.io_retry.backoff_factor < 1.0 {
            return Err(invalid("io_retry.backoff_factor", "must be at least 1.0"));
        }
        Ok(())
    }

    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_frame_bytes: self.max_frame_bytes,
            max_header_bytes: self.max_header_bytes,
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Apply `LSPWIRE_*` overrides read through `lookup`.
pub fn apply_env_overrides(
    mut config: WireConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<WireConfig, ConfigError> {
    if let Some(val) = lookup(ENV_MAX_CONCURRENT) {
        config.max_concurrent_requests = val
            .trim()
            .parse()
            .map_err(|_| invalid(ENV_MAX_CONCURRENT, &format!("not a number: {:?}", val)))?;
    }
    if let Some(val) = lookup(ENV_READ_TIMEOUT) {
        config.read_timeout_secs = match val.trim() {
            "" | "0" | "none" => None,
            secs => Some(
                secs.parse()
                    .map_err(|_| invalid(ENV_READ_TIMEOUT, &format!("not a number: {:?}", val)))?,
            ),
        };
    }
    if let Some(val) = lookup(ENV_LOG_WIRE) {
        config.log_wire_traffic = matches!(
            val.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
    Ok(config)
}
