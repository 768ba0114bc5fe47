//! Provisioning State Machine (C5): the end-to-end AIK provisioning run
//! (§4.5). States and transitions:
//!
//! ```text
//!   [START] → ensure-owner → create-aik → build-request → post-challenge
//!     → activate-credential → post-response → persist-aik → [DONE]
//! ```
//!
//! Failure recovery: none intra-run. The first error stops the run; no
//! partial success is claimed (§7 propagation policy).

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use rsa::RsaPublicKey;

use crate::config::AgentConfig;
use crate::envelope;
use crate::error::ProvisioningError;
use crate::hvs::{HvsClient, IdentityChallengeRequest, IdentityChallengeResponse, IdentityRequest};
use crate::ownership;
use crate::secret::{AikSecret, OwnerSecret};
use crate::tpm::{NV_IDX_ENDORSEMENT_KEY, TPM_HANDLE_AIK, TpmProvider};

/// Minimal-length big-endian encoding with no leading zero byte, matching
/// the Go source's `big.Int.Bytes()` semantics (§9 open question decision).
fn handle_to_minimal_be(handle: u32) -> Vec<u8> {
    let full = handle.to_be_bytes();
    let first_nonzero = full.iter().position(|&b| b != 0);
    match first_nonzero {
        Some(i) => full[i..].to_vec(),
        None => Vec::new(),
    }
}

fn protocol_err(e: ProvisioningError) -> ProvisioningError {
    match e {
        ProvisioningError::CryptoFailure(msg) => ProvisioningError::ProtocolError(msg),
        other => other,
    }
}

/// Runs the full provisioning state machine against a scoped TPM handle,
/// mutating and saving `config` as needed (new `AikSecret`), and leaves an
/// AIK certificate PEM at `config.aik_cert_path` on success.
///
/// `privacy_ca_pub` is loaded by the caller (C7, [`crate::privacyca`]) and
/// passed in rather than read from `config` here, so this state machine
/// stays decoupled from trust-store I/O and easy to drive with an in-memory
/// keypair under test.
pub fn provision(
    tpm: &mut impl TpmProvider,
    config: &mut AgentConfig,
    owner_secret: &OwnerSecret,
    hvs: &HvsClient,
    privacy_ca_pub: &RsaPublicKey,
) -> Result<(), ProvisioningError> {
    // ensure-owner
    ownership::ensure_owner(tpm, owner_secret)?;

    // create-aik: persist a freshly generated secret *before* touching the
    // TPM, so a retry after a crash reuses the same secret.
    let aik_secret = match config.aik_secret() {
        Some(existing) => existing,
        None => {
            let generated = AikSecret::generate();
            config.set_aik_secret_and_save(&generated)?;
            generated
        }
    };
    tpm.create_aik(owner_secret, &aik_secret)?;

    // build-request: the EK certificate is X.509 DER (§3, §6) and is wrapped
    // verbatim into `endorsement_certificate` for HVS to validate; this core
    // does not parse it (§9 — the derived RSA key has no use here).
    let ek_der = tpm.nv_read(owner_secret, NV_IDX_ENDORSEMENT_KEY)?;

    let aik_modulus = tpm.get_aik_bytes()?;
    let aik_name = tpm.get_aik_name()?;
    let aik_blob = handle_to_minimal_be(TPM_HANDLE_AIK);

    let endorsement_certificate = envelope::encrypt_outer(&ek_der, privacy_ca_pub)?;

    let identity_request = IdentityRequest {
        identity_request_block: aik_modulus.clone(),
        aik_modulus,
        tpm_version: "2.0".to_string(),
        aik_blob,
        aik_name: aik_name.0,
    };
    let challenge_request = IdentityChallengeRequest {
        identity_request,
        endorsement_certificate,
    };

    // post-challenge
    let proof = hvs.submit_challenge(&challenge_request)?;

    // activate-credential: validate the TCG size prefixes before the TPM is
    // touched at all (§8 property 4), then hand the original marshaled
    // buffers to the TPM provider unchanged — their TPM2B framing is what
    // the TPM-side unmarshaling expects.
    envelope::parse_tcg_field(&proof.secret).map_err(protocol_err)?;
    envelope::parse_tcg_field(&proof.credential).map_err(protocol_err)?;
    let symmetric_key = tpm.activate_credential(owner_secret, &aik_secret, &proof.credential, &proof.secret)?;

    let parsed_sym_blob = envelope::parse_sym_blob(&proof.sym_blob).map_err(protocol_err)?;
    let nonce = envelope::decrypt_sym_blob(&parsed_sym_blob, &symmetric_key)?;

    let response_to_challenge = envelope::encrypt_outer(&nonce, privacy_ca_pub)?;
    let challenge_response = IdentityChallengeResponse { response_to_challenge };

    // post-response
    let cert_pem = hvs.submit_challenge_response(&challenge_response)?;

    // persist-aik
    persist_aik_certificate(&config.aik_cert_path, &cert_pem)
}

/// Atomic temp-file-then-rename write with mode 0640, mirroring the
/// discipline used for the configuration file in §4.7.
fn persist_aik_certificate(path: &Path, pem_bytes: &[u8]) -> Result<(), ProvisioningError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| ProvisioningError::ConfigInvalid(format!("failed to create {}: {e}", dir.display())))?;

    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("aik-cert.pem")
    ));

    {
        let mut tmp = fs::File::create(&tmp_path)
            .map_err(|e| ProvisioningError::ConfigInvalid(format!("failed to create temp cert file: {e}")))?;
        tmp.write_all(pem_bytes)
            .map_err(|e| ProvisioningError::ConfigInvalid(format!("failed to write temp cert file: {e}")))?;
        tmp.set_permissions(fs::Permissions::from_mode(0o640))
            .map_err(|e| ProvisioningError::ConfigInvalid(format!("failed to set cert file permissions: {e}")))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| ProvisioningError::ConfigInvalid(format!("failed to rename cert file into place: {e}")))
}
