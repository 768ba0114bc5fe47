//! The closed error-kind taxonomy surfaced across provisioning step boundaries.
//!
//! Individual steps use `anyhow::Result` internally for convenient `?`-propagation
//! of heterogeneous sources (`tss-esapi`, `reqwest`, I/O, ASN.1 parsing); each step
//! converts its outcome to a `ProvisioningError` variant before returning, so callers
//! only ever match against this fixed set.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("cannot open TPM: {0}")]
    TpmUnavailable(String),

    #[error("TPM owned with a password that does not match the supplied owner secret")]
    OwnershipBlocked,

    #[error("AIK already exists under a different aik secret")]
    AikExists,

    #[error("TPM operation exceeded its timeout ceiling")]
    TpmTimeout,

    #[error("cryptographic failure: {0}")]
    CryptoFailure(String),

    #[error("HVS protocol violation: {0}")]
    ProtocolError(String),

    #[error("HVS unreachable: {0}")]
    HvsUnreachable(String),

    #[error("AIK has not been provisioned yet")]
    NotProvisioned,

    #[error("AIK certificate artifact is corrupt: {0}")]
    CorruptArtifact(String),

    #[error("ActivateCredential rejected the proof: EK/AIK binding mismatch")]
    AttestationMismatch,
}

impl ProvisioningError {
    /// One-sentence, stack-free message suitable for the stdout path (§7).
    /// Full detail (the `anyhow` chain that produced this variant) belongs in the
    /// structured log, not here.
    pub fn operator_message(&self) -> String {
        format!("provisioning failed [{}]: {}", self.kind_name(), self)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "ConfigInvalid",
            Self::TpmUnavailable(_) => "TpmUnavailable",
            Self::OwnershipBlocked => "OwnershipBlocked",
            Self::AikExists => "AikExists",
            Self::TpmTimeout => "TpmTimeout",
            Self::CryptoFailure(_) => "CryptoFailure",
            Self::ProtocolError(_) => "ProtocolError",
            Self::HvsUnreachable(_) => "HvsUnreachable",
            Self::NotProvisioned => "NotProvisioned",
            Self::CorruptArtifact(_) => "CorruptArtifact",
            Self::AttestationMismatch => "AttestationMismatch",
        }
    }

    /// Exit code convention for the `aik-provision` CLI: 0 reserved for success,
    /// each kind maps to a distinct non-zero code so scripts can branch on it.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigInvalid(_) => 1,
            Self::TpmUnavailable(_) => 2,
            Self::OwnershipBlocked => 3,
            Self::AikExists => 4,
            Self::TpmTimeout => 5,
            Self::CryptoFailure(_) => 6,
            Self::ProtocolError(_) => 7,
            Self::HvsUnreachable(_) => 8,
            Self::NotProvisioned => 9,
            Self::CorruptArtifact(_) => 10,
            Self::AttestationMismatch => 11,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisioningError>;
