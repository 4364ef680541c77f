//! Key encoding utilities for `RocksDB`.
//!
//! Both record kinds are keyed by the raw 16 bytes of their UUID, each in its own
//! column family.

use quota_core::{PrincipalId, ResourceId};

use crate::error::{Result, StoreError};

/// Length of every record key.
pub const KEY_LEN: usize = 16;

/// Create a quota record key from a principal ID.
#[must_use]
pub fn quota_key(principal_id: &PrincipalId) -> Vec<u8> {
    principal_id.as_bytes().to_vec()
}

/// Create a cooldown record key from a resource ID.
#[must_use]
pub fn cooldown_key(resource_id: &ResourceId) -> Vec<u8> {
    resource_id.as_bytes().to_vec()
}

/// Decode a principal ID from a quota record key.
///
/// # Errors
///
/// Returns `StoreError::Serialization` if the key is not 16 bytes long.
pub fn principal_from_key(key: &[u8]) -> Result<PrincipalId> {
    let bytes: [u8; KEY_LEN] = key
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("bad quota key length: {}", key.len())))?;
    Ok(PrincipalId::from_bytes(bytes))
}
