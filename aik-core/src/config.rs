//! Layered configuration (C8, ambient): a TOML file overlaid with the environment
//! variables enumerated in §6, mirroring the source's YAML-plus-env layering
//! (`config.TrustAgentConfiguration` / `LoadEnvironmentVariables`).

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ProvisioningError;
use crate::secret::{AikSecret, OwnerSecret};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/aik-agent/config.toml";

const ENV_HVS_URL: &str = "HVS_URL";
const ENV_OWNER_SECRET: &str = "TPM_OWNER_SECRET";
const ENV_AIK_SECRET: &str = "AIK_SECRET";
const ENV_PRIVACY_CA_CERT_PATH: &str = "PRIVACY_CA_CERT_PATH";
const ENV_AIK_CERT_PATH: &str = "AIK_CERT_PATH";
const ENV_CONFIG_PATH: &str = "AIK_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TpmSection {
    #[serde(default)]
    pub aik_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HvsSection {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(skip)]
    config_file: PathBuf,

    #[serde(default)]
    pub hvs: HvsSection,

    #[serde(default)]
    pub tpm: TpmSection,

    #[serde(default)]
    pub logging: LoggingSection,

    #[serde(default)]
    pub privacy_ca_cert_path: PathBuf,

    #[serde(default)]
    pub aik_cert_path: PathBuf,
}

impl AgentConfig {
    /// Loads `path`, or synthesizes a blank default config if it does not exist yet
    /// (matching the source's "file doesn't exist, create a new blank one").
    pub fn load(path: &Path) -> Result<Self, ProvisioningError> {
        let mut cfg: AgentConfig = match fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw).map_err(|e| {
                ProvisioningError::ConfigInvalid(format!(
                    "failed to parse {}: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AgentConfig::default(),
            Err(e) => {
                return Err(ProvisioningError::ConfigInvalid(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        cfg.config_file = path.to_path_buf();
        Ok(cfg)
    }

    /// Loads from `AIK_CONFIG_PATH`, falling back to [`DEFAULT_CONFIG_PATH`].
    pub fn load_default() -> Result<Self, ProvisioningError> {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path))
    }

    /// Overlays the environment variables enumerated in §6. Does not touch
    /// `TPM_OWNER_SECRET` — that secret is never persisted (§4.7); fetch it
    /// separately with [`owner_secret_from_env`].
    pub fn apply_environment_overlay(&mut self) {
        if let Ok(v) = std::env::var(ENV_HVS_URL) {
            if !v.is_empty() {
                self.hvs.url = v;
            }
        }
        if let Ok(v) = std::env::var(ENV_AIK_SECRET) {
            if !v.is_empty() {
                self.tpm.aik_secret = v;
            }
        }
        if let Ok(v) = std::env::var(ENV_PRIVACY_CA_CERT_PATH) {
            if !v.is_empty() {
                self.privacy_ca_cert_path = PathBuf::from(v);
            }
        }
        if let Ok(v) = std::env::var(ENV_AIK_CERT_PATH) {
            if !v.is_empty() {
                self.aik_cert_path = PathBuf::from(v);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ProvisioningError> {
        if self.hvs.url.is_empty() {
            return Err(ProvisioningError::ConfigInvalid(
                "HVS_URL is not configured".into(),
            ));
        }
        if self.privacy_ca_cert_path.as_os_str().is_empty() {
            return Err(ProvisioningError::ConfigInvalid(
                "PRIVACY_CA_CERT_PATH is not configured".into(),
            ));
        }
        if self.aik_cert_path.as_os_str().is_empty() {
            return Err(ProvisioningError::ConfigInvalid(
                "AIK_CERT_PATH is not configured".into(),
            ));
        }
        Ok(())
    }

    pub fn aik_secret(&self) -> Option<AikSecret> {
        if self.tpm.aik_secret.is_empty() {
            None
        } else {
            Some(AikSecret::from_hex(self.tpm.aik_secret.clone()))
        }
    }

    /// Persists `secret` into the `tpm` section and writes the file atomically
    /// (temp file in the same directory, then rename) with mode 0640 — the same
    /// write discipline used for the AIK certificate in §4.5.
    pub fn set_aik_secret_and_save(&mut self, secret: &AikSecret) -> Result<(), ProvisioningError> {
        self.tpm.aik_secret = secret.as_hex().to_string();
        self.save()
    }

    pub fn save(&self) -> Result<(), ProvisioningError> {
        if self.config_file.as_os_str().is_empty() {
            return Err(ProvisioningError::ConfigInvalid(
                "no config file path set; load() must be called before save()".into(),
            ));
        }

        let serialized = toml::to_string_pretty(self).map_err(|e| {
            ProvisioningError::ConfigInvalid(format!("failed to serialize config: {e}"))
        })?;

        let dir = self
            .config_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| {
            ProvisioningError::ConfigInvalid(format!("failed to create {}: {e}", dir.display()))
        })?;

        let tmp_path = dir.join(format!(
            ".{}.tmp",
            self.config_file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("config.toml")
        ));

        {
            let mut tmp = fs::File::create(&tmp_path).map_err(|e| {
                ProvisioningError::ConfigInvalid(format!(
                    "failed to create temp config file {}: {e}",
                    tmp_path.display()
                ))
            })?;
            tmp.write_all(serialized.as_bytes()).map_err(|e| {
                ProvisioningError::ConfigInvalid(format!("failed to write temp config file: {e}"))
            })?;
            tmp.set_permissions(fs::Permissions::from_mode(0o640))
                .map_err(|e| {
                    ProvisioningError::ConfigInvalid(format!(
                        "failed to set permissions on temp config file: {e}"
                    ))
                })?;
        }

        fs::rename(&tmp_path, &self.config_file).map_err(|e| {
            ProvisioningError::ConfigInvalid(format!(
                "failed to rename temp config file into place: {e}"
            ))
        })?;

        Ok(())
    }
}

/// `TPM_OWNER_SECRET` is read fresh on every invocation and never persisted
/// (§3, §4.7): an empty or absent value is the empty owner secret.
pub fn owner_secret_from_env() -> OwnerSecret {
    match std::env::var(ENV_OWNER_SECRET) {
        Ok(v) => OwnerSecret::from_str(&v),
        Err(_) => OwnerSecret::empty(),
    }
}
