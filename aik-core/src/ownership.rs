//! Ownership Task (C4): the TPM owner-secret decision table (§4.4).
//!
//! The TA never attempts to change a non-empty password; this is by design
//! to avoid requiring the old password.

use crate::error::ProvisioningError;
use crate::secret::OwnerSecret;
use crate::tpm::TpmProvider;

/// Brings the TPM into a state owned with `owner_secret`, taking ownership
/// only when the TPM is currently unowned or owned with an empty secret.
/// Fails with `OwnershipBlocked` if the TPM is owned with a different,
/// non-empty secret.
pub fn ensure_owner(tpm: &mut impl TpmProvider, owner_secret: &OwnerSecret) -> Result<(), ProvisioningError> {
    if tpm.is_owned_with_auth(owner_secret)? {
        return Ok(());
    }

    if tpm.is_owned_with_auth(&OwnerSecret::empty())? {
        if owner_secret.is_empty() {
            return Ok(());
        }
        return tpm.take_ownership(owner_secret);
    }

    if owner_secret.is_empty() {
        // Unowned and caller wants no secret: nothing to do.
        return Ok(());
    }

    tpm.take_ownership(owner_secret)
}
