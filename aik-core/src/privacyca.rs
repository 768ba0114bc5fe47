//! Privacy-CA Trust Store (C7): loads HVS's Privacy-CA X.509 certificate
//! from disk and exposes the RSA public key used to wrap transport keys
//! in the crypto envelope (§3, §4.2).

use std::path::Path;

use picky_asn1::wrapper::IntegerAsn1;
use picky_asn1_x509::{PublicKey, SubjectPublicKeyInfo};
use rsa::BigUint;
use rsa::RsaPublicKey;
use rsa::traits::PublicKeyParts;

use crate::error::ProvisioningError;
use crate::pem;

/// Reads a PEM-encoded SubjectPublicKeyInfo block and extracts the RSA
/// public key it carries.
///
/// HVS's Privacy-CA key is a static, operator-provisioned input — this
/// store never writes the file, only reads it. The file is the standard
/// `openssl rsa -pubout` PUBLIC KEY armor rather than a full wrapping X.509
/// certificate: the corpus builds and serializes bare `SubjectPublicKeyInfo`
/// values (see the TPM EK-handling code this crate is grounded on) but never
/// a complete `TbsCertificate`, so this store stays on the shape the corpus
/// actually demonstrates.
pub fn load_privacy_ca_public_key(path: &Path) -> Result<RsaPublicKey, ProvisioningError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ProvisioningError::ConfigInvalid(format!("cannot read Privacy-CA cert {}: {e}", path.display())))?;
    let (label, der) = pem::decode_first_block(&text)?;
    if label != "PUBLIC KEY" {
        return Err(ProvisioningError::CorruptArtifact(format!(
            "Privacy-CA file contains a {label} block, not a PUBLIC KEY"
        )));
    }

    rsa_public_key_from_spki_der(&der)
}

/// Extracts the RSA public key from a raw `SubjectPublicKeyInfo`, DER-encoded
/// (no PEM armor). Shared with the EK-certificate sanity check in the
/// provisioning state machine (§9 open question on the EK's dead-code RSA
/// path).
pub fn rsa_public_key_from_spki_der(der: &[u8]) -> Result<RsaPublicKey, ProvisioningError> {
    let spki: SubjectPublicKeyInfo = picky_asn1_der::from_bytes(der)
        .map_err(|e| ProvisioningError::CryptoFailure(format!("cannot parse SubjectPublicKeyInfo DER: {e}")))?;

    let PublicKey::Rsa(rsa_pk) = spki.subject_public_key.0 else {
        return Err(ProvisioningError::CryptoFailure(
            "key material does not carry an RSA public key".into(),
        ));
    };

    let modulus = BigUint::from_bytes_be(rsa_pk.0.modulus.as_unsigned_bytes_be());
    let exponent = BigUint::from_bytes_be(rsa_pk.0.public_exponent.as_unsigned_bytes_be());

    RsaPublicKey::new(modulus, exponent)
        .map_err(|e| ProvisioningError::CryptoFailure(format!("RSA parameters invalid: {e}")))
}

/// DER-encodes an RSA public key as a `SubjectPublicKeyInfo`, the inverse of
/// [`rsa_public_key_from_spki_der`]. Used by the test fixtures that stand in
/// for the Privacy-CA key and the TPM's EK certificate.
pub fn rsa_public_key_to_spki_der(pub_key: &RsaPublicKey) -> Vec<u8> {
    let modulus = IntegerAsn1::from(pub_key.n().to_bytes_be());
    let exponent = IntegerAsn1::from(pub_key.e().to_bytes_be());
    let spki = SubjectPublicKeyInfo::new_rsa_key(modulus, exponent);
    picky_asn1_der::to_vec(&spki).expect("SubjectPublicKeyInfo always serializes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_file_with_no_pem_markers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("privacyca.pem");
        std::fs::write(&path, "not a pem file").unwrap();

        let err = load_privacy_ca_public_key(&path).unwrap_err();
        assert!(matches!(err, ProvisioningError::CorruptArtifact(_)));
    }

    #[test]
    fn rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.pem");

        let err = load_privacy_ca_public_key(&path).unwrap_err();
        assert!(matches!(err, ProvisioningError::ConfigInvalid(_)));
    }

    #[test]
    fn rejects_wrong_pem_label() {
        use base64::Engine as _;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        let body = base64::engine::general_purpose::STANDARD.encode(b"not-a-key");
        std::fs::write(
            &path,
            format!("-----BEGIN CERTIFICATE-----\n{body}\n-----END CERTIFICATE-----\n"),
        )
        .unwrap();

        let err = load_privacy_ca_public_key(&path).unwrap_err();
        assert!(matches!(err, ProvisioningError::CorruptArtifact(_)));
    }

    #[test]
    fn loads_a_well_formed_spki_public_key() {
        use base64::Engine as _;
        use rsa::RsaPrivateKey;

        let priv_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let pub_key = RsaPublicKey::from(&priv_key);
        let der = rsa_public_key_to_spki_der(&pub_key);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("privacyca.pem");
        let body = base64::engine::general_purpose::STANDARD.encode(&der);
        std::fs::write(
            &path,
            format!("-----BEGIN PUBLIC KEY-----\n{body}\n-----END PUBLIC KEY-----\n"),
        )
        .unwrap();

        let loaded = load_privacy_ca_public_key(&path).unwrap();
        assert_eq!(loaded.n(), pub_key.n());
        assert_eq!(loaded.e(), pub_key.e());
    }
}
