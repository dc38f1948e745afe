//! Configuration for netvigil.
//!
//! One TOML file (merged with `NETVIGIL_`-prefixed environment variables)
//! carries engine tuning, credential profiles and the device inventory.
//! This crate turns it into `netvigil_core` types: [`EngineSettings`],
//! [`PoolConfig`], and an [`Inventory`] ready to seed a `MemoryStore`.
//! Secrets are resolved env var → system keyring → plaintext.
//!
//! [`EngineSettings`]: netvigil_core::EngineSettings
//! [`PoolConfig`]: netvigil_core::PoolConfig

mod inventory;
mod profiles;
mod settings;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use inventory::{ConnectionEntry, DeviceEntry, DeviceKind, Inventory};
pub use profiles::{ProfileEntry, SecretResolver, UsmEntry};
pub use settings::{EngineSection, PoolSection};

/// Keyring service name for stored secrets.
pub const KEYRING_SERVICE: &str = "netvigil";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no {secret} configured for '{owner}'")]
    NoCredentials { owner: String, secret: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Consult the system keyring when resolving secrets.
    #[serde(default = "default_true")]
    pub keyring: bool,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub pool: PoolSection,

    /// Named credential profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileEntry>,

    #[serde(default)]
    pub devices: Vec<DeviceEntry>,

    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keyring: true,
            engine: EngineSection::default(),
            pool: PoolSection::default(),
            profiles: BTreeMap::new(),
            devices: Vec::new(),
            connections: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Resolve secrets and build the inventory.
    pub fn inventory(&self) -> Result<Inventory, ConfigError> {
        let resolver = SecretResolver::new(self.keyring);
        Inventory::build(self, &resolver)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "netvigil", "netvigil").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("netvigil");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from the default path plus environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` plus environment.
///
/// A missing file yields the defaults. Environment keys nest with a
/// double underscore: `NETVIGIL_ENGINE__POLLING_INTERVAL=15`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NETVIGIL_").split("__"));

    let config: Config = figment.extract()?;
    config.engine.validate()?;
    config.pool.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
