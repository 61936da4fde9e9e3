//! Administrator-defined attestation policy.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::attest::{PrefixError, TrustedPrefix};

/// Policy a login is evaluated against.
///
/// Durations are written in humantime form (`"2m"`, `"120s"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name; instances must carry it as the value of `metadata_key`.
    pub name: String,

    /// Policies granted on success.
    #[serde(default)]
    pub policies: BTreeSet<String>,

    /// Credential lifetime.
    #[serde(default, with = "humantime_serde")]
    pub ttl: Duration,

    /// Upper bound on credential lifetime; zero means unbounded.
    #[serde(default, with = "humantime_serde")]
    pub max_ttl: Duration,

    /// Maximum instance age accepted.
    #[serde(default = "default_period", with = "humantime_serde")]
    pub period: Duration,

    /// Metadata key whose value must equal `name`.
    #[serde(default = "default_metadata_key")]
    pub metadata_key: String,

    /// Required tenant; empty accepts any.
    #[serde(default)]
    pub tenant_id: String,

    /// Required owning user; empty skips the owner check.
    #[serde(default)]
    pub user_id: String,

    /// Lifetime of an instance's attempt counter after its latest attempt.
    #[serde(default = "default_auth_period", with = "humantime_serde")]
    pub auth_period: Duration,

    /// Attempts allowed per instance within `auth_period`.
    #[serde(default = "default_auth_limit")]
    pub auth_limit: u32,

    /// CIDR ranges trusted regardless of the instance's own addresses.
    #[serde(default)]
    pub trusted_prefixes: Vec<String>,
}

const fn default_period() -> Duration {
    Duration::from_secs(120)
}

const fn default_auth_period() -> Duration {
    Duration::from_secs(120)
}

const fn default_auth_limit() -> u32 {
    1
}

fn default_metadata_key() -> String {
    "vault-role".to_string()
}

/// Reasons a role is rejected at configuration time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RoleError {
    #[error("role name is empty")]
    EmptyName,

    #[error("role {0:?}: metadata key is empty")]
    EmptyMetadataKey(String),

    #[error("role {0:?}: auth limit must be at least 1")]
    ZeroAuthLimit(String),

    #[error("role {role:?}: ttl {ttl:?} exceeds max ttl {max_ttl:?}")]
    TtlAboveMax {
        role: String,
        ttl: Duration,
        max_ttl: Duration,
    },

    #[error("role {role:?}: {source}")]
    InvalidPrefix {
        role: String,
        #[source]
        source: PrefixError,
    },
}

impl Role {
    /// A role with defaults for everything but its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policies: BTreeSet::new(),
            ttl: Duration::ZERO,
            max_ttl: Duration::ZERO,
            period: default_period(),
            metadata_key: default_metadata_key(),
            tenant_id: String::new(),
            user_id: String::new(),
            auth_period: default_auth_period(),
            auth_limit: default_auth_limit(),
            trusted_prefixes: Vec::new(),
        }
    }

    /// Reject settings that cannot be evaluated as intended.
    ///
    /// Attestation itself tolerates malformed prefixes by never matching
    /// them; this is where they are caught before they are stored.
    ///
    /// # Errors
    ///
    /// Returns the first [`RoleError`] found.
    pub fn validate(&self) -> Result<(), RoleError> {
        if self.name.trim().is_empty() {
            return Err(RoleError::EmptyName);
        }
        if self.metadata_key.trim().is_empty() {
            return Err(RoleError::EmptyMetadataKey(self.name.clone()));
        }
        if self.auth_limit == 0 {
            return Err(RoleError::ZeroAuthLimit(self.name.clone()));
        }
        if !self.max_ttl.is_zero() && self.ttl > self.max_ttl {
            return Err(RoleError::TtlAboveMax {
                role: self.name.clone(),
                ttl: self.ttl,
                max_ttl: self.max_ttl,
            });
        }
        for prefix in &self.trusted_prefixes {
            TrustedPrefix::parse(prefix).map_err(|source| RoleError::InvalidPrefix {
                role: self.name.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
