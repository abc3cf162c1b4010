//! Application configuration.
//!
//! Serialized defaults, then `config/default.toml` if present, then
//! `GATEWAY__SECTION__FIELD` environment variables.

use std::path::PathBuf;

use anyhow::{Context, Result};
use gate::{RateLimitConfig, TransportConfig};
use launcher::LauncherConfig;
use serde::{Deserialize, Serialize};
use session::SessionConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// HTTP control-plane listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl HttpConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Metadata store location. No path means sessions live in memory only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Load configuration from files and environment.
pub fn load() -> Result<Config> {
    build(
        config::File::with_name("config/default")
            .required(false)
            .format(config::FileFormat::Toml),
    )
}

fn build<S>(file: S) -> Result<Config>
where
    S: config::Source + Send + Sync + 'static,
{
    config::Config::builder()
        .add_source(config::Config::try_from(&Config::default())?)
        .add_source(file)
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("GATEWAY")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?
        .try_deserialize()
        .context("Failed to deserialize configuration")
}
