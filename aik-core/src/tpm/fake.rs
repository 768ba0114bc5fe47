//! In-memory fake TPM, used to drive the test suite without hardware (§4.1, §9).

use std::sync::{Arc, Mutex};

use super::{AikName, TpmProvider, TpmProviderFactory, TPM_HANDLE_AIK};
use crate::error::ProvisioningError;
use crate::secret::{AikSecret, OwnerSecret};

struct FakeTpmState {
    owner_secret: OwnerSecret,
    aik_secret: Option<AikSecret>,
    ek_cert: Vec<u8>,
    aik_public: Vec<u8>,
    aik_name: Vec<u8>,
    /// (expected credential, expected secret, symmetric key to return)
    activate_fixture: (Vec<u8>, Vec<u8>, Vec<u8>),
}

impl Default for FakeTpmState {
    fn default() -> Self {
        Self {
            owner_secret: OwnerSecret::empty(),
            aik_secret: None,
            ek_cert: Vec::new(),
            aik_public: b"fake-aik-public-area".to_vec(),
            aik_name: b"fake-aik-name".to_vec(),
            activate_fixture: (Vec::new(), Vec::new(), Vec::new()),
        }
    }
}

#[derive(Clone)]
pub struct FakeTpmFactory {
    state: Arc<Mutex<FakeTpmState>>,
}

impl Default for FakeTpmFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTpmFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeTpmState::default())),
        }
    }

    /// Preconfigures the TPM as already owned with `secret`.
    pub fn owned_with(self, secret: &str) -> Self {
        self.state.lock().unwrap().owner_secret = OwnerSecret::from_str(secret);
        self
    }

    pub fn with_ek_cert(self, der: Vec<u8>) -> Self {
        self.state.lock().unwrap().ek_cert = der;
        self
    }

    pub fn with_existing_aik(self, secret: &AikSecret) -> Self {
        self.state.lock().unwrap().aik_secret = Some(secret.clone());
        self
    }

    /// Configures the exact (credential, secret) pair `ActivateCredential`
    /// must receive to succeed, and the symmetric key it then returns.
    pub fn with_activate_fixture(self, credential: Vec<u8>, secret: Vec<u8>, sym_key: Vec<u8>) -> Self {
        self.state.lock().unwrap().activate_fixture = (credential, secret, sym_key);
        self
    }
}

impl TpmProviderFactory for FakeTpmFactory {
    type Provider<'a>
        = FakeTpmHandle
    where
        Self: 'a;

    fn scoped(&self) -> Result<Self::Provider<'_>, ProvisioningError> {
        Ok(FakeTpmHandle {
            state: self.state.clone(),
        })
    }
}

pub struct FakeTpmHandle {
    state: Arc<Mutex<FakeTpmState>>,
}

impl TpmProvider for FakeTpmHandle {
    fn is_owned_with_auth(&mut self, owner_secret: &OwnerSecret) -> Result<bool, ProvisioningError> {
        let state = self.state.lock().unwrap();
        Ok(state.owner_secret.matches(owner_secret))
    }

    fn take_ownership(&mut self, owner_secret: &OwnerSecret) -> Result<(), ProvisioningError> {
        let mut state = self.state.lock().unwrap();
        if !state.owner_secret.is_empty() {
            return Err(ProvisioningError::OwnershipBlocked);
        }
        state.owner_secret = owner_secret.clone();
        Ok(())
    }

    fn create_aik(
        &mut self,
        _owner_secret: &OwnerSecret,
        aik_secret: &AikSecret,
    ) -> Result<(), ProvisioningError> {
        let mut state = self.state.lock().unwrap();
        match &state.aik_secret {
            Some(existing) if existing.as_hex() == aik_secret.as_hex() => Ok(()),
            Some(_) => Err(ProvisioningError::AikExists),
            None => {
                state.aik_secret = Some(aik_secret.clone());
                Ok(())
            }
        }
    }

    fn nv_read(&mut self, _owner_secret: &OwnerSecret, index: u32) -> Result<Vec<u8>, ProvisioningError> {
        let state = self.state.lock().unwrap();
        if index != super::NV_IDX_ENDORSEMENT_KEY {
            return Err(ProvisioningError::TpmUnavailable(format!(
                "no NV data at index {index:#x}"
            )));
        }
        if state.ek_cert.is_empty() {
            return Err(ProvisioningError::TpmUnavailable(
                "no EK certificate provisioned in NV".into(),
            ));
        }
        Ok(state.ek_cert.clone())
    }

    fn get_aik_bytes(&mut self) -> Result<Vec<u8>, ProvisioningError> {
        let state = self.state.lock().unwrap();
        if state.aik_secret.is_none() {
            return Err(ProvisioningError::TpmUnavailable(format!(
                "no AIK at handle {TPM_HANDLE_AIK:#x}"
            )));
        }
        Ok(state.aik_public.clone())
    }

    fn get_aik_name(&mut self) -> Result<AikName, ProvisioningError> {
        let state = self.state.lock().unwrap();
        Ok(AikName(state.aik_name.clone()))
    }

    fn activate_credential(
        &mut self,
        _owner_secret: &OwnerSecret,
        aik_secret: &AikSecret,
        credential: &[u8],
        secret: &[u8],
    ) -> Result<Vec<u8>, ProvisioningError> {
        let state = self.state.lock().unwrap();
        match &state.aik_secret {
            Some(existing) if existing.as_hex() == aik_secret.as_hex() => {}
            _ => return Err(ProvisioningError::AttestationMismatch),
        }
        let (expected_cred, expected_secret, sym_key) = &state.activate_fixture;
        if credential == expected_cred.as_slice() && secret == expected_secret.as_slice() {
            Ok(sym_key.clone())
        } else {
            Err(ProvisioningError::AttestationMismatch)
        }
    }
}
