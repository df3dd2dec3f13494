//! Server settings, layered: built-in defaults, then `pair_chat.toml` in the
//! working directory, then environment variables (`PORT`, `CORS_ORIGIN`, ...).

use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE: &str = "pair_chat.toml";

/// Environment variables read as settings, matched case-insensitively.
const ENV_KEYS: [&str; 7] = [
    "port",
    "cors_origin",
    "auth_secret",
    "tls_cert",
    "tls_key",
    "store_timeout_ms",
    "typing_idle_ms",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(#[from] figment::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    /// `None` (or `*`) allows any origin.
    pub cors_origin: Option<String>,
    /// Secret for signing identity tokens. A random one is generated when unset,
    /// which invalidates tokens on every restart.
    pub auth_secret: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub store_timeout_ms: u64,
    /// How long a client keeps "typing" alive without a keystroke.
    pub typing_idle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 5000,
            cors_origin: None,
            auth_secret: None,
            tls_cert: None,
            tls_key: None,
            store_timeout_ms: 5_000,
            typing_idle_ms: 2_000,
        }
    }
}

impl Config {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw().only(&ENV_KEYS))
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment())
    }

    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let mut config: Config = figment.extract()?;
        config.cors_origin = config
            .cors_origin
            .filter(|origin| !origin.trim().is_empty() && origin != "*");
        config.auth_secret = config.auth_secret.filter(|secret| !secret.is_empty());
        Ok(config)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }

    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_cert.as_ref().zip(self.tls_key.as_ref())
    }
}
