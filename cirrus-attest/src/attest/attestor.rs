//! Composition of all checks into one login decision.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::{add_duration, Clock, SystemClock};
use crate::instance::{Instance, InstanceId};
use crate::role::Role;

use super::address::match_addresses;
use super::checks::{check_metadata, check_owner, check_status, check_tenant};
use super::error::AttestError;
use super::freshness::verify_age;
use super::replay::{record_attempt, AttemptStore};

/// Result of a successful attestation.
///
/// Carries what the host needs to issue a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    instance_id: InstanceId,
    role: String,
    policies: BTreeSet<String>,
    ttl: Duration,
    max_ttl: Duration,
    age: Duration,
    attempt: u32,
}

impl Attestation {
    /// The attested instance.
    #[must_use]
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Name of the role the instance authenticated as.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Policies to grant.
    #[must_use]
    pub fn policies(&self) -> &BTreeSet<String> {
        &self.policies
    }

    /// Credential lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Credential lifetime upper bound; zero means unbounded.
    #[must_use]
    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }

    /// Instance age when attested.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.age
    }

    /// Attempt count after this login, at most the role's limit.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Evaluates login attempts against roles.
///
/// Holds the replay counter store and the clock; everything else is passed
/// per call.
///
/// # Example
///
/// ```ignore
/// let attestor = Attestor::new(MemoryAttemptStore::new());
/// let attestation = attestor.attest(&instance, &role, &["192.168.1.1"]).await?;
/// ```
#[derive(Debug)]
pub struct Attestor<S, C = SystemClock> {
    store: S,
    clock: C,
}

impl<S: AttemptStore> Attestor<S> {
    /// Create an attestor on the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: AttemptStore, C: Clock> Attestor<S, C> {
    /// Create an attestor with an explicit clock.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self { store, clock }
    }

    /// The replay counter store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Decide whether `instance` may log in as `role` from `request_addrs`.
    ///
    /// Checks run in a fixed order and the first failure is returned as is:
    ///
    /// 1. metadata tag names the role
    /// 2. status is `ACTIVE`
    /// 3. a request address matches (role prefixes included)
    /// 4. tenant
    /// 5. owning user, only when the role names one
    /// 6. instance age below `role.period`
    /// 7. replay counter within `role.auth_limit`
    ///
    /// Only step 7 writes state, so a login rejected earlier does not use up
    /// an attempt. The counter deadline is `now + role.auth_period`.
    ///
    /// # Errors
    ///
    /// Returns the [`AttestError`] of the first failing check.
    pub async fn attest<A: AsRef<str>>(
        &self,
        instance: &Instance,
        role: &Role,
        request_addrs: &[A],
    ) -> Result<Attestation, AttestError> {
        check_metadata(instance, &role.metadata_key, &role.name)?;
        check_status(instance)?;
        match_addresses(instance, request_addrs, role.trusted_prefixes.as_slice())?;
        check_tenant(instance, &role.tenant_id)?;
        if !role.user_id.is_empty() {
            check_owner(instance, &role.user_id)?;
        }

        let now = self.clock.now();
        let age = verify_age(instance, role.period, now)?;
        let deadline = add_duration(now, role.auth_period);
        let attempt =
            record_attempt(&self.store, &instance.id, role.auth_limit, deadline, now).await?;

        Ok(Attestation {
            instance_id: instance.id.clone(),
            role: role.name.clone(),
            policies: role.policies.clone(),
            ttl: role.ttl,
            max_ttl: role.max_ttl,
            age,
            attempt,
        })
    }

    /// Freshness check against the attestor's clock.
    ///
    /// # Errors
    ///
    /// Returns [`AttestError::TooOld`] when the instance age reaches `period`.
    pub fn verify_age(
        &self,
        instance: &Instance,
        period: Duration,
    ) -> Result<Duration, AttestError> {
        verify_age(instance, period, self.clock.now())
    }

    /// Record an attempt for `instance_id` outside the composed pass.
    ///
    /// # Errors
    ///
    /// See [`record_attempt`].
    pub async fn record_attempt(
        &self,
        instance_id: &InstanceId,
        limit: u32,
        deadline: DateTime<Utc>,
    ) -> Result<u32, AttestError> {
        record_attempt(&self.store, instance_id, limit, deadline, self.clock.now()).await
    }

    /// Remove expired attempt counters.
    ///
    /// Meant to be driven by the host's scheduler; the attestor never sweeps
    /// on its own.
    ///
    /// # Errors
    ///
    /// Returns [`AttestError::Storage`] if the store fails.
    pub async fn sweep(&self) -> Result<usize, AttestError> {
        Ok(self.store.sweep(self.clock.now()).await?)
    }
}
