use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::relay::DEFAULT_RECENT_LIMIT;

/// Runtime configuration, read from `config.toml` with `PIPEDASH_*`
/// environment overrides on top. A missing file is not an error; the relay
/// has to come up with zero setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// TCP port pipeline processes connect to.
    pub port: u16,
    /// Largest accepted frame body in bytes.
    pub max_frame_len: u64,
    /// How many recent updates to keep for late-joining dashboards.
    pub recent_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            max_frame_len: crate::relay::frame::MAX_FRAME_LEN,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = match fs::read_to_string(path.as_ref()) {
            Ok(content) => toml::from_str(&content)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(error) => return Err(error.into()),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(port) = env_parsed("PIPEDASH_RELAY_PORT") {
            self.relay.port = port;
        }
        if let Some(max) = env_parsed("PIPEDASH_MAX_FRAME_LEN") {
            self.relay.max_frame_len = max;
        }
        if let Some(limit) = env_parsed("PIPEDASH_RECENT_LIMIT") {
            self.relay.recent_limit = limit;
        }
        if let Ok(host) = std::env::var("PIPEDASH_HTTP_HOST") {
            self.http.host = host;
        }
        if let Some(port) = env_parsed("PIPEDASH_HTTP_PORT") {
            self.http.port = port;
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}
