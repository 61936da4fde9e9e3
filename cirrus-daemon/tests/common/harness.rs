//! Test harness for attestation E2E tests.
//!
//! Runs the attestor against the SQLite attempt store with a manual clock,
//! so counter windows can be stepped through without sleeping.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cirrus_attest::{Attestor, Instance, InstanceId, ManualClock, Role};
use cirrus_daemon::SqliteAttemptStore;
use sqlx::sqlite::SqlitePoolOptions;

pub const TENANT_ID: &str = "fcad67a6189847c4aecfa3c81a05783b";
pub const USER_ID: &str = "9349aff8be7545ac9d2f1d00999a23cd";

/// Fixed starting point for the manual clock.
pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp")
}

/// Attestor wired to a SQLite store and a manual clock.
pub struct TestDaemon {
    pub store: SqliteAttemptStore,
    pub clock: Arc<ManualClock>,
    pub attestor: Attestor<SqliteAttemptStore, Arc<ManualClock>>,
}

impl TestDaemon {
    /// Create a test daemon with in-memory SQLite.
    pub async fn new() -> Self {
        // Single connection: every connection to sqlite::memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        let store = SqliteAttemptStore::new(pool)
            .await
            .expect("Failed to initialize attempt store");
        Self::with_store(store, epoch())
    }

    /// Create a test daemon backed by a database file.
    pub async fn open(path: &Path, now: DateTime<Utc>) -> Self {
        let store = SqliteAttemptStore::open(path)
            .await
            .expect("Failed to open attempt database");
        Self::with_store(store, now)
    }

    fn with_store(store: SqliteAttemptStore, now: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let attestor = Attestor::with_clock(store.clone(), Arc::clone(&clock));
        Self {
            store,
            clock,
            attestor,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use cirrus_attest::Clock;
        self.clock.now()
    }
}

/// Role used across scenarios: two logins per two-minute window.
pub fn test_role() -> Role {
    Role {
        name: "test".to_string(),
        policies: BTreeSet::from(["test".to_string()]),
        ttl: Duration::from_secs(60),
        max_ttl: Duration::from_secs(120),
        period: Duration::from_secs(120),
        metadata_key: "vault-role".to_string(),
        tenant_id: TENANT_ID.to_string(),
        user_id: String::new(),
        auth_period: Duration::from_secs(120),
        auth_limit: 2,
        trusted_prefixes: Vec::new(),
    }
}

/// Active instance tagged for `test_role`, reachable at 192.168.1.1.
pub fn test_instance(id: &str, created: DateTime<Utc>) -> Instance {
    Instance {
        id: InstanceId::new(id),
        status: "ACTIVE".to_string(),
        access_ipv4: "192.168.1.1".to_string(),
        access_ipv6: String::new(),
        address_groups: BTreeMap::new(),
        metadata: HashMap::from([("vault-role".to_string(), "test".to_string())]),
        tenant_id: TENANT_ID.to_string(),
        user_id: USER_ID.to_string(),
        created,
    }
}
