//! Service settings read from a TOML file at start-up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;
use crate::path::SERVICE_NAME;
use crate::sink::{DeviceInfo, Sink};

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "MIRACLE_WFD_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "wfd_config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    System,
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSink {
    pub label: String,
    pub device_info: u16,
    #[serde(default)]
    pub rtsp_port: u16,
    #[serde(default)]
    pub max_throughput: u16,
}

impl StaticSink {
    pub fn to_sink(&self) -> Result<Sink> {
        Sink::new(
            self.label.clone(),
            DeviceInfo {
                device_info: self.device_info,
                rtsp_port: self.rtsp_port,
                max_throughput: self.max_throughput,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusKind,
    pub service_name: String,
    pub login_timeout_ms: u64,
    pub log_filter: String,
    pub static_sinks: Vec<StaticSink>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusKind::System,
            service_name: SERVICE_NAME.to_string(),
            login_timeout_ms: 25_000,
            log_filter: "info".to_string(),
            static_sinks: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl Config {
    /// Loads the file named by `MIRACLE_WFD_CONFIG`, or `wfd_config.toml`.
    ///
    /// A missing file is not an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }
}
