//! CLI entrypoint (C10, ambient): runs the provisioning state machine once
//! against a real TPM and HVS, mapping the terminal error kind to a process
//! exit code (§4.9, §7).

use aik_core::config::{AgentConfig, owner_secret_from_env};
use aik_core::hvs::HvsClient;
use aik_core::privacyca;
use aik_core::provisioning::provision;
use aik_core::tpm::TpmProviderFactory;
use aik_core::tpm::esapi::EsapiTpmProviderFactory;

fn run() -> Result<(), aik_core::ProvisioningError> {
    let mut config = AgentConfig::load_default()?;
    config.apply_environment_overlay();
    config.validate()?;

    let owner_secret = owner_secret_from_env();
    let privacy_ca_pub = privacyca::load_privacy_ca_public_key(&config.privacy_ca_cert_path)?;
    let hvs = HvsClient::new(config.hvs.url.clone(), std::env::var("HVS_BEARER_TOKEN").unwrap_or_default())?;

    let tpm_factory = EsapiTpmProviderFactory::default();
    let mut tpm = tpm_factory.scoped()?;

    provision(&mut tpm, &mut config, &owner_secret, &hvs, &privacy_ca_pub)
}

fn main() {
    env_logger::init();

    match run() {
        Ok(()) => {
            log::info!("AIK provisioning complete");
        }
        Err(e) => {
            log::error!("{e:#}");
            println!("{}", e.operator_message());
            std::process::exit(e.exit_code());
        }
    }
}
