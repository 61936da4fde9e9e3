//! Attestation error types.

use std::time::Duration;

/// Errors reported by an [`AttemptStore`](super::AttemptStore) backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The backing storage could not be read or written.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A persisted entry could not be decoded.
    #[error("corrupt attempt entry for {instance_id}: {reason}")]
    Corrupt {
        /// Key of the offending entry.
        instance_id: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Reasons an attestation is denied.
///
/// Every variant except [`AttestError::Storage`] is a policy decision and is
/// never retried by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AttestError {
    /// The role's metadata tag is absent or carries a different value.
    #[error("metadata key {key:?} does not name role {role:?}")]
    MetadataMismatch {
        /// Metadata key the role requires.
        key: String,
        /// Role name the tag must equal.
        role: String,
    },

    /// The instance is not in the single accepted lifecycle state.
    #[error("instance status {0:?} is not ACTIVE")]
    InvalidStatus(String),

    /// No request address matched a trusted address or prefix.
    #[error("no request address matches the instance")]
    AddressMismatch,

    /// The instance belongs to another tenant.
    #[error("tenant id mismatch")]
    TenantMismatch,

    /// The instance belongs to another user.
    #[error("user id mismatch")]
    OwnerMismatch,

    /// The instance was created too long ago.
    #[error("instance is too old: age {age:?} is not below {period:?}")]
    TooOld {
        /// Age of the instance at evaluation time.
        age: Duration,
        /// Freshness window of the role.
        period: Duration,
    },

    /// The instance exhausted its authentication attempts for the window.
    #[error("authentication limit exceeded: attempt {count} of {limit}")]
    AuthLimitExceeded {
        /// Post-increment attempt count.
        count: u32,
        /// Maximum attempts allowed by the role.
        limit: u32,
    },

    /// The replay counter could not be updated.
    #[error("replay counter storage failed: {0}")]
    Storage(#[from] StoreError),
}

impl AttestError {
    /// Returns true when the denial is a policy decision rather than an
    /// infrastructure failure.
    #[must_use]
    pub fn is_policy_denial(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}
