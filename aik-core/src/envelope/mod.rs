//! Crypto Envelope Codec (C2): the NIARL binary wire format HVS expects for
//! the identity-request envelope and the sym_blob inside an identity proof
//! (§4.2, §9). Every field here is fixed by a parser we do not control, so
//! the layout is written and read through [`writer::ByteWriter`] /
//! [`writer::ByteReader`] rather than any host-native struct layout.

pub mod writer;

use aes::Aes128;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

use crate::error::ProvisioningError;
use writer::{ByteReader, ByteWriter};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

const TPM_ALG_RSA: u32 = 1;
const TPM_ALG_AES: u32 = 6;
const TPM_ES_RSAESOAEP_SHA1_MGF1: u16 = 3;
const TPM_ES_SYM_CBC_PKCS5PAD: u16 = 0xff;
const TPM_SS_NONE: u16 = 1;

const RSA_SUBPARAMS_LEN: u32 = 12;
const RSA_KEY_LENGTH_BITS: u32 = 2048;
const RSA_NUM_PRIMES: u32 = 2;
const RSA_EXPONENT_SIZE: u32 = 0;

const AES_SUBPARAMS_LEN: u32 = 28;
const AES_KEY_LENGTH_BITS: u32 = 128;
const AES_BLOCK_SIZE_BITS: u32 = 128;
const AES_IV_LEN: u32 = 16;

const AES_KEY_BYTES: usize = 16;
const AES_IV_BYTES: usize = 16;

/// §4.2.4 — `secret`/`credential` in `IdentityProofRequest` are
/// `uint16 len || payload`; a violation of `0 < len <= remaining` is a
/// parser-fatal error rather than a panic or silent truncation.
pub fn parse_tcg_field(bytes: &[u8]) -> Result<&[u8], ProvisioningError> {
    let mut r = ByteReader::new(bytes);
    read_tcg_sized(&mut r)
}

fn read_tcg_sized<'a>(r: &mut ByteReader<'a>) -> Result<&'a [u8], ProvisioningError> {
    let len = r.read_u16()? as usize;
    if len == 0 || len > r.remaining() {
        return Err(ProvisioningError::CryptoFailure(format!(
            "TCG size-prefixed field has invalid length {len} (remaining {})",
            r.remaining()
        )));
    }
    r.read_bytes(len)
}

/// Always applies PKCS#5/PKCS#7 padding, including a full padding block when
/// `plaintext` is already block-aligned (§4.2.1, §8 property 3).
fn aes_cbc_encrypt(key: &[u8; AES_KEY_BYTES], iv: &[u8; AES_IV_BYTES], plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

fn aes_cbc_decrypt(
    key: &[u8; AES_KEY_BYTES],
    iv: &[u8; AES_IV_BYTES],
    ciphertext: &[u8],
) -> Result<Vec<u8>, ProvisioningError> {
    Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|e| ProvisioningError::CryptoFailure(format!("AES-CBC padding invalid: {e}")))
}

/// §4.2.2 — the inner wrapper RSA-OAEP-encrypted under the Privacy CA key;
/// carries only the transport AES key, not the full `SymKeyParams` block
/// that appears alongside it in the outer envelope.
fn build_inner_sym_wrapper(sym_key: &[u8; AES_KEY_BYTES]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_u32(TPM_ALG_AES);
    w.write_u16(TPM_ES_SYM_CBC_PKCS5PAD);
    w.write_u16(sym_key.len() as u16);
    w.write_bytes(sym_key);
    w.into_vec()
}

struct InnerSymWrapper {
    sym_key: Vec<u8>,
}

fn parse_inner_sym_wrapper(bytes: &[u8]) -> Result<InnerSymWrapper, ProvisioningError> {
    let mut r = ByteReader::new(bytes);
    let alg_id = r.read_u32()?;
    if alg_id != TPM_ALG_AES {
        return Err(ProvisioningError::CryptoFailure(format!(
            "unexpected symmetric algoId {alg_id}, want TPM_ALG_AES"
        )));
    }
    let _enc_scheme = r.read_u16()?;
    let key_blob_len = r.read_u16()? as usize;
    let sym_key = r.read_bytes(key_blob_len)?.to_vec();
    Ok(InnerSymWrapper { sym_key })
}

/// §4.2.1 — builds the outer identity-request envelope: a fixed
/// `AsymKeyParams`/`SymKeyParams` header followed by the raw IV, `C_asym`
/// (RSA-OAEP of the transport key) and `C_sym` (AES-CBC of `plaintext`),
/// each explicit-length rather than TCG size-prefixed.
pub fn encrypt_outer(plaintext: &[u8], privacy_ca_pub: &RsaPublicKey) -> Result<Vec<u8>, ProvisioningError> {
    let mut sym_key = [0u8; AES_KEY_BYTES];
    let mut iv = [0u8; AES_IV_BYTES];
    OsRng.fill_bytes(&mut sym_key);
    OsRng.fill_bytes(&mut iv);

    let c_sym = aes_cbc_encrypt(&sym_key, &iv, plaintext);

    let inner = build_inner_sym_wrapper(&sym_key);
    let padding = Oaep::new::<Sha1>();
    let c_asym = privacy_ca_pub
        .encrypt(&mut OsRng, padding, &inner)
        .map_err(|e| ProvisioningError::CryptoFailure(format!("RSA-OAEP encrypt failed: {e}")))?;

    let mut w = ByteWriter::new();
    w.write_u32(c_asym.len() as u32);
    w.write_u32(c_sym.len() as u32);

    // AsymKeyParams
    w.write_u32(TPM_ALG_RSA);
    w.write_u16(TPM_ES_RSAESOAEP_SHA1_MGF1);
    w.write_u16(TPM_SS_NONE);
    w.write_u32(RSA_SUBPARAMS_LEN);
    w.write_u32(RSA_KEY_LENGTH_BITS);
    w.write_u32(RSA_NUM_PRIMES);
    w.write_u32(RSA_EXPONENT_SIZE);

    // SymKeyParams
    w.write_u32(TPM_ALG_AES);
    w.write_u16(TPM_ES_SYM_CBC_PKCS5PAD);
    w.write_u16(TPM_SS_NONE);
    w.write_u32(AES_SUBPARAMS_LEN);
    w.write_u32(AES_KEY_LENGTH_BITS);
    w.write_u32(AES_BLOCK_SIZE_BITS);
    w.write_u32(AES_IV_LEN);

    w.write_bytes(&iv);
    w.write_bytes(&c_asym);
    w.write_bytes(&c_sym);

    Ok(w.into_vec())
}

/// Test-only inverse of [`encrypt_outer`]: HVS, not this agent, holds the
/// Privacy CA private key in production, so decryption is exercised only to
/// validate the round-trip property of the codec itself (§8 property 1).
#[cfg(test)]
fn decrypt_outer(envelope: &[u8], privacy_ca_priv: &RsaPrivateKey) -> Result<Vec<u8>, ProvisioningError> {
    let mut r = ByteReader::new(envelope);

    let c_asym_len = r.read_u32()? as usize;
    let c_sym_len = r.read_u32()? as usize;

    let alg_id = r.read_u32()?;
    if alg_id != TPM_ALG_RSA {
        return Err(ProvisioningError::CryptoFailure(format!(
            "unexpected asymmetric algoId {alg_id}, want TPM_ALG_RSA"
        )));
    }
    let _enc_scheme = r.read_u16()?;
    let _sig_scheme = r.read_u16()?;
    let _sub_params_len = r.read_u32()?;
    let _key_length = r.read_u32()?;
    let _num_primes = r.read_u32()?;
    let _exponent_size = r.read_u32()?;

    let alg_id = r.read_u32()?;
    if alg_id != TPM_ALG_AES {
        return Err(ProvisioningError::CryptoFailure(format!(
            "unexpected symmetric algoId {alg_id}, want TPM_ALG_AES"
        )));
    }
    let _enc_scheme = r.read_u16()?;
    let _sig_scheme = r.read_u16()?;
    let _sub_params_len = r.read_u32()?;
    let _key_length = r.read_u32()?;
    let _block_size = r.read_u32()?;
    let _iv_len = r.read_u32()?;

    let iv: [u8; AES_IV_BYTES] = r
        .read_bytes(AES_IV_BYTES)?
        .try_into()
        .map_err(|_| ProvisioningError::CryptoFailure("short IV".into()))?;
    let c_asym = r.read_bytes(c_asym_len)?;
    let c_sym = r.read_bytes(c_sym_len)?;
    if c_sym.len() % 16 != 0 {
        return Err(ProvisioningError::CryptoFailure(
            "C_sym length is not an AES block multiple".into(),
        ));
    }

    let padding = Oaep::new::<Sha1>();
    let inner = privacy_ca_priv
        .decrypt(padding, c_asym)
        .map_err(|e| ProvisioningError::CryptoFailure(format!("RSA-OAEP decrypt failed: {e}")))?;
    let wrapper = parse_inner_sym_wrapper(&inner)?;
    let sym_key: [u8; AES_KEY_BYTES] = wrapper
        .sym_key
        .as_slice()
        .try_into()
        .map_err(|_| ProvisioningError::CryptoFailure("symmetric key is not 16 bytes".into()))?;

    aes_cbc_decrypt(&sym_key, &iv, c_sym)
}

/// A parsed `sym_blob` from an `IdentityProofRequest` (§4.2.3): the IV and
/// ciphertext HVS used to wrap its challenge nonce, ready to decrypt once
/// [`crate::tpm::TpmProvider::activate_credential`] has recovered the
/// symmetric key.
pub struct ParsedSymBlob<'a> {
    pub iv: [u8; AES_IV_BYTES],
    pub ciphertext: &'a [u8],
}

pub fn parse_sym_blob(sym_blob: &[u8]) -> Result<ParsedSymBlob<'_>, ProvisioningError> {
    let mut r = ByteReader::new(sym_blob);

    let encrypted_blob_len = r.read_i32()?;
    if encrypted_blob_len < AES_IV_BYTES as i32 {
        return Err(ProvisioningError::CryptoFailure(format!(
            "sym_blob encryptedBlobLen {encrypted_blob_len} is smaller than the IV"
        )));
    }
    let ciphertext_len = encrypted_blob_len as usize - AES_IV_BYTES;
    if ciphertext_len > r.remaining() {
        return Err(ProvisioningError::CryptoFailure(format!(
            "sym_blob encryptedBlobLen {encrypted_blob_len} exceeds body length"
        )));
    }

    let alg_id = r.read_i32()?;
    if alg_id != TPM_ALG_AES as i32 {
        return Err(ProvisioningError::CryptoFailure(format!(
            "unexpected sym_blob algoId {alg_id}, want TPM_ALG_AES"
        )));
    }
    let _enc_scheme = r.read_i16()?;
    let _sig_scheme = r.read_i16()?;
    let _sub_params_len = r.read_i32()?;

    let iv: [u8; AES_IV_BYTES] = r
        .read_bytes(AES_IV_BYTES)?
        .try_into()
        .map_err(|_| ProvisioningError::CryptoFailure("short IV in sym_blob".into()))?;
    let ciphertext = r.read_bytes(ciphertext_len)?;

    Ok(ParsedSymBlob { iv, ciphertext })
}

/// Decrypts a parsed sym_blob body once `symmetric_key` has been recovered
/// from `ActivateCredential`.
pub fn decrypt_sym_blob(blob: &ParsedSymBlob<'_>, symmetric_key: &[u8]) -> Result<Vec<u8>, ProvisioningError> {
    let key: [u8; AES_KEY_BYTES] = symmetric_key
        .try_into()
        .map_err(|_| ProvisioningError::CryptoFailure("symmetric key is not 16 bytes".into()))?;
    aes_cbc_decrypt(&key, &blob.iv, blob.ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let priv_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("rsa keygen");
        let pub_key = RsaPublicKey::from(&priv_key);
        (priv_key, pub_key)
    }

    #[test]
    fn envelope_round_trips() {
        let (priv_key, pub_key) = test_keypair();
        let plaintext = b"identity request payload, not block-aligned";

        let envelope = encrypt_outer(plaintext, &pub_key).unwrap();
        let recovered = decrypt_outer(&envelope, &priv_key).unwrap();

        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn fixed_header_fields_land_at_documented_offsets() {
        let (_priv_key, pub_key) = test_keypair();
        let envelope = encrypt_outer(b"x", &pub_key).unwrap();

        let mut r = ByteReader::new(&envelope);
        let c_asym_len = r.read_u32().unwrap() as usize;
        let c_sym_len = r.read_u32().unwrap() as usize;
        assert_eq!(c_asym_len, pub_key.size());
        assert_eq!(c_sym_len % 16, 0);

        assert_eq!(r.read_u32().unwrap(), TPM_ALG_RSA);
        assert_eq!(r.read_u16().unwrap(), TPM_ES_RSAESOAEP_SHA1_MGF1);
        assert_eq!(r.read_u16().unwrap(), TPM_SS_NONE);
        assert_eq!(r.read_u32().unwrap(), RSA_SUBPARAMS_LEN);
        assert_eq!(r.read_u32().unwrap(), RSA_KEY_LENGTH_BITS);
        assert_eq!(r.read_u32().unwrap(), RSA_NUM_PRIMES);
        assert_eq!(r.read_u32().unwrap(), RSA_EXPONENT_SIZE);

        assert_eq!(r.read_u32().unwrap(), TPM_ALG_AES);
        assert_eq!(r.read_u16().unwrap(), TPM_ES_SYM_CBC_PKCS5PAD);
        assert_eq!(r.read_u16().unwrap(), TPM_SS_NONE);
        assert_eq!(r.read_u32().unwrap(), AES_SUBPARAMS_LEN);
        assert_eq!(r.read_u32().unwrap(), AES_KEY_LENGTH_BITS);
        assert_eq!(r.read_u32().unwrap(), AES_BLOCK_SIZE_BITS);
        assert_eq!(r.read_u32().unwrap(), AES_IV_LEN);

        let _iv = r.read_bytes(AES_IV_BYTES).unwrap();
        let _c_asym = r.read_bytes(c_asym_len).unwrap();
        let _c_sym = r.read_bytes(c_sym_len).unwrap();
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn inner_wrapper_fields_land_at_documented_offsets() {
        let sym_key = [7u8; AES_KEY_BYTES];
        let inner = build_inner_sym_wrapper(&sym_key);

        let mut r = ByteReader::new(&inner);
        assert_eq!(r.read_u32().unwrap(), TPM_ALG_AES);
        assert_eq!(r.read_u16().unwrap(), TPM_ES_SYM_CBC_PKCS5PAD);
        assert_eq!(r.read_u16().unwrap(), sym_key.len() as u16);
        assert_eq!(r.read_bytes(sym_key.len()).unwrap(), &sym_key);
        assert_eq!(r.remaining(), 0);

        let parsed = parse_inner_sym_wrapper(&inner).unwrap();
        assert_eq!(parsed.sym_key, sym_key);
    }

    #[test]
    fn pkcs5_pads_even_on_block_boundary() {
        let key = [1u8; AES_KEY_BYTES];
        let iv = [2u8; AES_IV_BYTES];
        let aligned = [0u8; 32];

        let ciphertext = aes_cbc_encrypt(&key, &iv, &aligned);
        assert_eq!(ciphertext.len(), 48, "a full padding block must be appended");

        let recovered = aes_cbc_decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(recovered, aligned);
    }

    fn build_sym_blob(key: &[u8; AES_KEY_BYTES], iv: &[u8; AES_IV_BYTES], plaintext: &[u8]) -> Vec<u8> {
        let ciphertext = aes_cbc_encrypt(key, iv, plaintext);
        let mut w = ByteWriter::new();
        w.write_i32((AES_IV_BYTES + ciphertext.len()) as i32);
        w.write_i32(TPM_ALG_AES as i32);
        w.write_i16(TPM_ES_SYM_CBC_PKCS5PAD as i16);
        w.write_i16(TPM_SS_NONE as i16);
        w.write_i32(0);
        w.write_bytes(iv);
        w.write_bytes(&ciphertext);
        w.into_vec()
    }

    #[test]
    fn sym_blob_round_trips() {
        let key = [9u8; AES_KEY_BYTES];
        let iv = [3u8; AES_IV_BYTES];
        let plaintext = b"hvs challenge nonce";

        let sym_blob = build_sym_blob(&key, &iv, plaintext);
        let parsed = parse_sym_blob(&sym_blob).unwrap();
        let recovered = decrypt_sym_blob(&parsed, &key).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn sym_blob_rejects_encrypted_blob_len_larger_than_body() {
        let key = [9u8; AES_KEY_BYTES];
        let iv = [3u8; AES_IV_BYTES];
        let mut sym_blob = build_sym_blob(&key, &iv, b"hvs challenge nonce");

        // Corrupt encryptedBlobLen (first 4 bytes, big-endian) to exceed the body.
        let bogus_len: i32 = 10_000;
        sym_blob[0..4].copy_from_slice(&bogus_len.to_be_bytes());

        let err = parse_sym_blob(&sym_blob).unwrap_err();
        assert!(matches!(err, ProvisioningError::CryptoFailure(_)));
    }

    #[test]
    fn tcg_field_rejects_overrun() {
        let mut w = ByteWriter::new();
        w.write_u16(200);
        w.write_bytes(&[0u8; 4]);
        let bytes = w.into_vec();

        let err = parse_tcg_field(&bytes).unwrap_err();
        assert!(matches!(err, ProvisioningError::CryptoFailure(_)));
    }

    #[test]
    fn tcg_field_rejects_zero_length() {
        let mut w = ByteWriter::new();
        w.write_u16(0);
        let bytes = w.into_vec();

        let err = parse_tcg_field(&bytes).unwrap_err();
        assert!(matches!(err, ProvisioningError::CryptoFailure(_)));
    }

    #[test]
    fn tcg_field_round_trips_payload() {
        let mut w = ByteWriter::new();
        w.write_u16(3);
        w.write_bytes(&[9, 8, 7]);
        let bytes = w.into_vec();

        assert_eq!(parse_tcg_field(&bytes).unwrap(), &[9, 8, 7]);
    }
}
