//! Identity predicates over an instance record.

use crate::instance::{Instance, ACTIVE_STATUS};

use super::error::AttestError;

/// Require the instance to carry `metadata_key` tagged with the role's name.
///
/// The tag is set when the instance is provisioned and binds that instance
/// to exactly one role.
///
/// # Errors
///
/// Returns [`AttestError::MetadataMismatch`] if the key is absent or holds
/// any other value.
pub fn check_metadata(
    instance: &Instance,
    metadata_key: &str,
    role_name: &str,
) -> Result<(), AttestError> {
    match instance.metadata.get(metadata_key) {
        Some(value) if value == role_name => Ok(()),
        _ => Err(AttestError::MetadataMismatch {
            key: metadata_key.to_string(),
            role: role_name.to_string(),
        }),
    }
}

/// Require the instance to be running.
///
/// # Errors
///
/// Returns [`AttestError::InvalidStatus`] unless the status is exactly
/// `ACTIVE`.
pub fn check_status(instance: &Instance) -> Result<(), AttestError> {
    if instance.status == ACTIVE_STATUS {
        Ok(())
    } else {
        Err(AttestError::InvalidStatus(instance.status.clone()))
    }
}

/// Require the instance to belong to `tenant_id`; empty means any tenant.
///
/// # Errors
///
/// Returns [`AttestError::TenantMismatch`] on a differing tenant.
pub fn check_tenant(instance: &Instance, tenant_id: &str) -> Result<(), AttestError> {
    if tenant_id.is_empty() || tenant_id == instance.tenant_id {
        Ok(())
    } else {
        Err(AttestError::TenantMismatch)
    }
}

/// Require the instance to be owned by `user_id`; empty means any user.
///
/// # Errors
///
/// Returns [`AttestError::OwnerMismatch`] on a differing owner.
pub fn check_owner(instance: &Instance, user_id: &str) -> Result<(), AttestError> {
    if user_id.is_empty() || user_id == instance.user_id {
        Ok(())
    } else {
        Err(AttestError::OwnerMismatch)
    }
}
