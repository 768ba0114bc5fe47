//! Core library for Attestation Identity Key provisioning against a TPM 2.0
//! and a Host Verification Service privacy CA (see `SPEC_FULL.md`).
//!
//! Module map:
//! - [`tpm`] — C1, the TPM capability trait plus hardware (`tss-esapi`) and
//!   in-memory fake backends.
//! - [`envelope`] — C2, the legacy binary wire codec used to wrap payloads
//!   for HVS and to unwrap its symmetric-key blob.
//! - [`hvs`] — C3, the two-call HVS HTTP client.
//! - [`ownership`] — C4, the TPM owner-secret decision table.
//! - [`provisioning`] — C5, the end-to-end state machine tying the above
//!   together.
//! - [`publisher`] — C6, read-only access to the persisted AIK certificate.
//! - [`privacyca`] — C7, the Privacy-CA trust store.
//! - [`config`], [`secret`], [`error`], [`pem`] — ambient support: on-disk
//!   configuration, secret hygiene, the error taxonomy, and PEM armor.

pub mod config;
pub mod envelope;
pub mod error;
pub mod hvs;
pub mod ownership;
pub mod pem;
pub mod privacyca;
pub mod provisioning;
pub mod publisher;
pub mod secret;
pub mod tpm;

pub use error::ProvisioningError;
