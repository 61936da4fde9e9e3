//! Daemon configuration file.
//!
//! ```toml
//! sweep_interval = "1m"
//!
//! [[roles]]
//! name = "test"
//! policies = ["test"]
//! ttl = "1m"
//! max_ttl = "2m"
//! period = "2m"
//! tenant_id = "fcad67a6189847c4aecfa3c81a05783b"
//! auth_period = "2m"
//! auth_limit = 2
//! trusted_prefixes = ["192.168.3.0/24"]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cirrus_attest::{Role, RoleError};
use serde::Deserialize;

const CONFIG_FILENAME: &str = "config.toml";
const ATTEMPTS_DB_FILENAME: &str = "attempts.db";

/// Parsed and validated daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding the attempt counter database.
    #[serde(default)]
    data_dir: Option<PathBuf>,

    /// How often expired attempt counters are swept.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Attestation roles.
    #[serde(default)]
    pub roles: Vec<Role>,
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid role: {0}")]
    Role(#[from] RoleError),
    #[error("role {0:?} is defined more than once")]
    DuplicateRole(String),
    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,
}

impl Config {
    /// Default location: `<config dir>/cirrus/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cirrus")
            .join(CONFIG_FILENAME)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject anything that would be stored but could not be enforced.
    ///
    /// This is the write-time gate for trusted prefixes: attestation skips
    /// prefixes it cannot parse, so they must be caught here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }

        let mut seen = HashSet::new();
        for role in &self.roles {
            role.validate()?;
            if !seen.insert(role.name.as_str()) {
                return Err(ConfigError::DuplicateRole(role.name.clone()));
            }
        }
        Ok(())
    }

    /// Look up a role by name.
    pub fn role(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|role| role.name == name)
    }

    /// Directory for persistent state, `<local data dir>/cirrus` by default.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("cirrus")
        })
    }

    /// Path of the attempt counter database.
    pub fn attempts_db_path(&self) -> PathBuf {
        self.data_dir().join(ATTEMPTS_DB_FILENAME)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            sweep_interval: default_sweep_interval(),
            roles: Vec::new(),
        }
    }
}
