//! In-process attempt counter store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::instance::InstanceId;

use super::error::StoreError;
use super::replay::{AttemptStore, AuthAttempt};

/// Attempt counters held in a sharded concurrent map.
///
/// # Concurrency
///
/// - Increment holds the shard lock of its key for the whole
///   read-modify-write, so concurrent attempts for one instance serialize
/// - Instances on different shards never contend
/// - Sweep walks shard by shard and may run alongside increments
///
/// Counters live only as long as the process. Hosts that need counters to
/// survive restarts plug in a persistent [`AttemptStore`].
///
/// # Usage
///
/// ```
/// use cirrus_attest::attest::MemoryAttemptStore;
///
/// let store = MemoryAttemptStore::new();
/// assert!(store.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    entries: DashMap<InstanceId, AuthAttempt>,
}

impl MemoryAttemptStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw entry for `instance_id`, ignoring expiry.
    #[must_use]
    pub fn peek(&self, instance_id: &InstanceId) -> Option<AuthAttempt> {
        self.entries.get(instance_id).map(|entry| *entry)
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn increment(
        &self,
        instance_id: &InstanceId,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<AuthAttempt, StoreError> {
        // Entry API keeps the shard locked between read and write
        let attempt = match self.entries.entry(instance_id.clone()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get_mut();
                let count = if current.is_expired(now) {
                    1
                } else {
                    current.count.saturating_add(1)
                };
                *current = AuthAttempt {
                    count,
                    expires_at: deadline,
                };
                *current
            }
            Entry::Vacant(entry) => {
                let attempt = AuthAttempt {
                    count: 1,
                    expires_at: deadline,
                };
                entry.insert(attempt);
                attempt
            }
        };

        Ok(attempt)
    }

    async fn get(
        &self,
        instance_id: &InstanceId,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthAttempt>, StoreError> {
        Ok(self
            .entries
            .get(instance_id)
            .map(|entry| *entry)
            .filter(|attempt| !attempt.is_expired(now)))
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0;
        self.entries.retain(|_, attempt| {
            let keep = !attempt.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
