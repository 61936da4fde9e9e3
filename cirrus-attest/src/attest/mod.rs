//! Instance attestation checks and their composition.

mod address;
mod attestor;
mod checks;
mod error;
mod freshness;
mod memory_store;
mod replay;

pub use address::{match_addresses, PrefixError, TrustedPrefix};
pub use attestor::{Attestation, Attestor};
pub use checks::{check_metadata, check_owner, check_status, check_tenant};
pub use error::{AttestError, StoreError};
pub use freshness::{instance_age, verify_age};
pub use memory_store::MemoryAttemptStore;
pub use replay::{record_attempt, AttemptStore, AuthAttempt};
