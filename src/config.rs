//! # Application Configuration
//!
//! Loaded from `~/.config/fogo360/config.toml`; a file with defaults is written
//! on first start. Broker location and credentials can be supplied from the
//! environment instead, so they never have to live in the file:
//!
//! | Variable | Overrides |
//! |---|---|
//! | `FOGO360_BROKER_URL` | `broker.url` |
//! | `FOGO360_USERNAME` | `broker.username` |
//! | `FOGO360_PASSWORD` | `broker.password` |
//!
//! Missing sections and fields fall back to their defaults, so an old or
//! partial file still loads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Level};

use crate::session::SessionConfig;
use crate::transport::rumqtt::RumqttSettings;
use crate::transport::Credentials;

const CONFIG_DIR: &str = ".config/fogo360";
const CONFIG_FILE: &str = "config.toml";

const ENV_BROKER_URL: &str = "FOGO360_BROKER_URL";
const ENV_USERNAME: &str = "FOGO360_USERNAME";
const ENV_PASSWORD: &str = "FOGO360_PASSWORD";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub requests: RequestPolicy,
    pub ui: UiConfig,
    pub log: LogConfig,
}

/// Where the broker lives and how to log in.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// Requests rumqttc may queue before rejecting new ones
    pub channel_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "tcp://broker.hivemq.com:1883".to_string(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 30,
            channel_capacity: 10,
        }
    }
}

/// Timeout policy for broker requests.
///
/// Unset by default: a request waits for its completion however long it takes.
/// There is no retry policy; a failed connect is re-triggered by the user.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct RequestPolicy {
    pub timeout_secs: Option<u64>,
}

impl RequestPolicy {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    /// Log arrived messages instead of opening a window
    pub headless: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Loads the configuration from the default location, then applies the
    /// environment overrides and validates the result.
    pub async fn load() -> Result<Self> {
        let mut config = Self::load_or_create_at(&Self::default_path()).await?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, writing a default file there first if it does not exist.
    pub async fn load_or_create_at(path: &Path) -> Result<Self> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

            return toml::from_str(&content)
                .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e));
        }

        info!("Creating default configuration at {}", path.display());
        let config = Self::default();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&config)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;

        Ok(config)
    }

    /// Applies overrides found through `lookup`; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(url) = lookup(ENV_BROKER_URL) {
            self.broker.url = url;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.broker.username = username;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.broker.password = password;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.url.trim().is_empty() {
            return Err(eyre!("broker.url must not be empty"));
        }
        if self.broker.keep_alive_secs == 0 {
            return Err(eyre!("broker.keep_alive_secs must be at least 1"));
        }
        if self.broker.channel_capacity == 0 {
            return Err(eyre!("broker.channel_capacity must be at least 1"));
        }
        if self.requests.timeout_secs == Some(0) {
            return Err(eyre!("requests.timeout_secs must be at least 1 when set"));
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<Level> {
        self.log
            .level
            .parse::<Level>()
            .map_err(|e| eyre!("Invalid log.level '{}': {}", self.log.level, e))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(
            self.broker.url.clone(),
            Credentials::new(self.broker.username.clone(), self.broker.password.clone()),
        )
        .with_request_timeout(self.requests.timeout())
    }

    pub fn rumqtt_settings(&self) -> RumqttSettings {
        RumqttSettings {
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            channel_capacity: self.broker.channel_capacity,
        }
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
