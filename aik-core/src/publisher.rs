//! AIK Publisher (C6): exposes the persisted AIK certificate on demand
//! (§4.6).

use std::path::Path;

use crate::error::ProvisioningError;
use crate::pem;

/// Reads the persisted AIK certificate PEM and returns its DER bytes.
pub fn read_aik_certificate_der(aik_cert_path: &Path) -> Result<Vec<u8>, ProvisioningError> {
    let text = std::fs::read_to_string(aik_cert_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProvisioningError::NotProvisioned
        } else {
            ProvisioningError::ConfigInvalid(format!("cannot read {}: {e}", aik_cert_path.display()))
        }
    })?;
    let (_label, der) = pem::decode_first_block(&text)?;
    Ok(der)
}
