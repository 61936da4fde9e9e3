//! Attestation engine for cloud compute instances.
//!
//! Given an instance record resolved by the compute provider, a role and the
//! addresses a login request came from, decides whether the instance may
//! authenticate.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//! - No logging
//!
//! Dependencies are injected via traits:
//! - [`attest::AttemptStore`] - Persistent replay counters
//! - [`clock::Clock`] - Wall-clock time
//!
//! # Example
//!
//! ```ignore
//! use cirrus_attest::{Attestor, MemoryAttemptStore};
//!
//! let attestor = Attestor::new(MemoryAttemptStore::new());
//! let attestation = attestor.attest(&instance, &role, &request_addrs).await?;
//! ```

pub mod attest;
pub mod clock;
pub mod instance;
pub mod role;

pub use attest::{
    AttemptStore, Attestation, AttestError, Attestor, AuthAttempt, MemoryAttemptStore,
    StoreError, TrustedPrefix,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use instance::{AddressEntry, Instance, InstanceId, ACTIVE_STATUS};
pub use role::{Role, RoleError};
