//! Instance age window.
//!
//! An instance identity can be copied, so it is only accepted while the
//! instance is young: legitimate first-boot logins happen shortly after
//! creation.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::instance::Instance;

use super::error::AttestError;

/// Age of `instance` at `now`.
///
/// A creation time ahead of `now` counts as age zero.
#[must_use]
pub fn instance_age(instance: &Instance, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(instance.created)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Accept the instance only while its age is strictly below `period`.
///
/// Returns the age on success.
///
/// # Errors
///
/// Returns [`AttestError::TooOld`] when `age >= period`.
pub fn verify_age(
    instance: &Instance,
    period: Duration,
    now: DateTime<Utc>,
) -> Result<Duration, AttestError> {
    let age = instance_age(instance, now);
    if age < period {
        Ok(age)
    } else {
        Err(AttestError::TooOld { age, period })
    }
}
