//! Bounded re-authentication.
//!
//! Every attempt for an instance increments a persisted counter. Once the
//! counter passes the role's limit within the window, further attempts are
//! denied until the entry expires.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instance::InstanceId;

use super::error::{AttestError, StoreError};

/// Persisted attempt counter of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthAttempt {
    /// Attempts recorded in the current window.
    pub count: u32,
    /// After this instant the entry is treated as absent and may be swept.
    pub expires_at: DateTime<Utc>,
}

impl AuthAttempt {
    /// Whether the entry no longer counts at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Storage for attempt counters.
///
/// # Atomicity
///
/// [`increment`](Self::increment) **MUST be atomic per instance id**: two
/// concurrent callers for the same id must never both read the same count.
/// Implementations hold a per-key lock across read-modify-write, or use a
/// single conditional write. Calls for different ids must not block each
/// other beyond what the backend inherently serializes.
///
/// # Expiry
///
/// An entry whose `expires_at` is at or before `now` is absent for every
/// operation: `increment` restarts it from zero and `get` returns `None`.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Increment the counter of `instance_id` and set its expiry to `deadline`.
    ///
    /// Returns the entry as persisted after the increment.
    async fn increment(
        &self,
        instance_id: &InstanceId,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AuthAttempt, StoreError>;

    /// Read the live counter of `instance_id`, if any.
    async fn get(
        &self,
        instance_id: &InstanceId,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthAttempt>, StoreError>;

    /// Delete every entry expired at `now` and return how many were removed.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[async_trait]
impl<T: AttemptStore + ?Sized> AttemptStore for Arc<T> {
    async fn increment(
        &self,
        instance_id: &InstanceId,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AuthAttempt, StoreError> {
        (**self).increment(instance_id, deadline, now).await
    }

    async fn get(
        &self,
        instance_id: &InstanceId,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthAttempt>, StoreError> {
        (**self).get(instance_id, now).await
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        (**self).sweep(now).await
    }
}

/// Record one authentication attempt and enforce `limit`.
///
/// The increment is persisted even when the limit is exceeded, so abuse
/// stays visible and keeps the instance locked out for the whole window.
/// Returns the post-increment count.
///
/// # Errors
///
/// - [`AttestError::AuthLimitExceeded`] when the new count is above `limit`
/// - [`AttestError::Storage`] when the store fails
pub async fn record_attempt(
    store: &(impl AttemptStore + ?Sized),
    instance_id: &InstanceId,
    limit: u32,
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<u32, AttestError> {
    let attempt = store.increment(instance_id, deadline, now).await?;
    if attempt.count > limit {
        return Err(AttestError::AuthLimitExceeded {
            count: attempt.count,
            limit,
        });
    }
    Ok(attempt.count)
}
