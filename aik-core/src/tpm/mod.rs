//! TPM Provider (C1): the capability set the provisioning core consumes from
//! the TPM, independent of whether a real device or a fake backs it (§4.1, §9).

#[cfg(feature = "tpm-hardware")]
pub mod esapi;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

use crate::error::ProvisioningError;
use crate::secret::{AikSecret, OwnerSecret};

/// Persistent TPM handle the AIK is created/evicted under (§6).
pub const TPM_HANDLE_AIK: u32 = 0x8101_0001;

/// NV index holding the EK certificate DER (§6).
pub const NV_IDX_ENDORSEMENT_KEY: u32 = 0x0101_0001;

/// The TPM2 name of the AIK: a hash-algorithm-prefixed digest over its public area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AikName(pub Vec<u8>);

/// A scoped TPM handle. Implementors close the underlying context in `Drop`
/// so every exit path — success, error, or panic/unwind — releases the TPM
/// (§5, §9). Call sites never hold a handle across a suspension point that
/// outlives this borrow.
pub trait TpmProvider {
    fn is_owned_with_auth(&mut self, owner_secret: &OwnerSecret) -> Result<bool, ProvisioningError>;

    fn take_ownership(&mut self, owner_secret: &OwnerSecret) -> Result<(), ProvisioningError>;

    /// Creates (or, if one already exists under the same `aik_secret`, leaves
    /// alone) the persistent AIK at [`TPM_HANDLE_AIK`]. Fails with `AikExists`
    /// if a different `aik_secret` was used previously.
    fn create_aik(
        &mut self,
        owner_secret: &OwnerSecret,
        aik_secret: &AikSecret,
    ) -> Result<(), ProvisioningError>;

    fn nv_read(&mut self, owner_secret: &OwnerSecret, index: u32) -> Result<Vec<u8>, ProvisioningError>;

    /// Public-area bytes of the AIK, in the modulus form HVS expects.
    fn get_aik_bytes(&mut self) -> Result<Vec<u8>, ProvisioningError>;

    fn get_aik_name(&mut self) -> Result<AikName, ProvisioningError>;

    /// Unwraps `credential`/`secret` against the AIK/EK binding, yielding the
    /// symmetric key HVS used to wrap its challenge nonce. Fails with
    /// `AttestationMismatch` if the EK does not match.
    fn activate_credential(
        &mut self,
        owner_secret: &OwnerSecret,
        aik_secret: &AikSecret,
        credential: &[u8],
        secret: &[u8],
    ) -> Result<Vec<u8>, ProvisioningError>;
}

/// Produces a scoped [`TpmProvider`] per call site, serializing access to the
/// singleton TPM resource behind a process-wide lock (§5).
pub trait TpmProviderFactory {
    type Provider<'a>: TpmProvider
    where
        Self: 'a;

    fn scoped(&self) -> Result<Self::Provider<'_>, ProvisioningError>;
}
