//! Opaque, zeroizing wrappers for the two TPM-authenticating secrets (§3, §9).
//!
//! Neither type implements `Debug`/`Display` with its contents; both are zeroized
//! on drop so a secret does not linger in process memory past its last use.

use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct OwnerSecret(Vec<u8>);

impl OwnerSecret {
    pub fn from_str(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn matches(&self, other: &OwnerSecret) -> bool {
        // Constant-time-ish comparison is not load-bearing here: the TPM itself
        // is the authority on whether a secret authenticates (IsOwnedWithAuth);
        // this is only used to short-circuit identical in-memory values.
        self.0 == other.0
    }
}

impl std::fmt::Debug for OwnerSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OwnerSecret(<redacted, {} bytes>)", self.0.len())
    }
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AikSecret(String);

impl AikSecret {
    /// 20 random bytes, hex-encoded (40 hex characters), per §3/§4.5.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 20];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for AikSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AikSecret(<redacted, {} hex chars>)", self.0.len())
    }
}
