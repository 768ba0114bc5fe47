//! HVS Protocol Client (C3): the two-call identity-challenge protocol
//! against the Host Verification Service (§4.3, §6).

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::error::ProvisioningError;

const HVS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HVS_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// `identity_request_block == aik_modulus` (§3 invariant); both are kept as
/// distinct fields because that is the wire shape HVS expects.
pub struct IdentityRequest {
    pub identity_request_block: Vec<u8>,
    pub aik_modulus: Vec<u8>,
    pub tpm_version: String,
    pub aik_blob: Vec<u8>,
    pub aik_name: Vec<u8>,
}

pub struct IdentityChallengeRequest {
    pub identity_request: IdentityRequest,
    pub endorsement_certificate: Vec<u8>,
}

pub struct IdentityProofRequest {
    pub secret: Vec<u8>,
    pub credential: Vec<u8>,
    pub sym_blob: Vec<u8>,
    pub endorsement_cert_blob: Vec<u8>,
}

pub struct IdentityChallengeResponse {
    pub response_to_challenge: Vec<u8>,
}

#[derive(Serialize)]
struct IdentityRequestWire {
    identity_request_block: String,
    aik_modulus: String,
    tpm_version: String,
    aik_blob: String,
    aik_name: String,
}

#[derive(Serialize)]
struct IdentityChallengeRequestWire {
    identity_request: IdentityRequestWire,
    endorsement_certificate: String,
}

#[derive(Deserialize)]
struct IdentityProofRequestWire {
    secret: String,
    credential: String,
    sym_blob: String,
    endorsement_cert_blob: String,
}

#[derive(Serialize)]
struct IdentityChallengeResponseWire {
    response_to_challenge: String,
}

fn b64_decode(field: &str, name: &str) -> Result<Vec<u8>, ProvisioningError> {
    B64.decode(field)
        .map_err(|e| ProvisioningError::ProtocolError(format!("{name} is not valid base64: {e}")))
}

impl From<&IdentityChallengeRequest> for IdentityChallengeRequestWire {
    fn from(req: &IdentityChallengeRequest) -> Self {
        let ir = &req.identity_request;
        IdentityChallengeRequestWire {
            identity_request: IdentityRequestWire {
                identity_request_block: B64.encode(&ir.identity_request_block),
                aik_modulus: B64.encode(&ir.aik_modulus),
                tpm_version: ir.tpm_version.clone(),
                aik_blob: B64.encode(&ir.aik_blob),
                aik_name: B64.encode(&ir.aik_name),
            },
            endorsement_certificate: B64.encode(&req.endorsement_certificate),
        }
    }
}

impl TryFrom<IdentityProofRequestWire> for IdentityProofRequest {
    type Error = ProvisioningError;

    fn try_from(wire: IdentityProofRequestWire) -> Result<Self, ProvisioningError> {
        Ok(IdentityProofRequest {
            secret: b64_decode(&wire.secret, "secret")?,
            credential: b64_decode(&wire.credential, "credential")?,
            sym_blob: b64_decode(&wire.sym_blob, "sym_blob")?,
            endorsement_cert_blob: b64_decode(&wire.endorsement_cert_blob, "endorsement_cert_blob")?,
        })
    }
}

/// Blocking client: the provisioning core runs single-threaded cooperative
/// (§5), so no async runtime is pulled in for this path.
pub struct HvsClient {
    client: Client,
    base_url: String,
    bearer_token: String,
}

impl HvsClient {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> Result<Self, ProvisioningError> {
        let client = Client::builder()
            .connect_timeout(HVS_CONNECT_TIMEOUT)
            .timeout(HVS_READ_TIMEOUT)
            .build()
            .map_err(|e| ProvisioningError::ConfigInvalid(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            bearer_token: bearer_token.into(),
        })
    }

    fn map_transport_err(e: reqwest::Error) -> ProvisioningError {
        if e.is_timeout() || e.is_connect() {
            ProvisioningError::HvsUnreachable(e.to_string())
        } else {
            ProvisioningError::ProtocolError(e.to_string())
        }
    }

    /// `POST {base}/privacyca/identity-challenge-request`.
    pub fn submit_challenge(
        &self,
        req: &IdentityChallengeRequest,
    ) -> Result<IdentityProofRequest, ProvisioningError> {
        let wire: IdentityChallengeRequestWire = req.into();
        let resp = self
            .client
            .post(format!("{}/privacyca/identity-challenge-request", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(&wire)
            .send()
            .map_err(Self::map_transport_err)?;

        if !resp.status().is_success() {
            return Err(ProvisioningError::HvsUnreachable(format!(
                "identity-challenge-request rejected with status {}",
                resp.status()
            )));
        }

        let proof: IdentityProofRequestWire = resp
            .json()
            .map_err(|e| ProvisioningError::ProtocolError(format!("malformed IdentityProofRequest: {e}")))?;
        proof.try_into()
    }

    /// `POST {base}/privacyca/identity-challenge-response`, returning the
    /// PEM certificate bytes on success.
    pub fn submit_challenge_response(
        &self,
        resp: &IdentityChallengeResponse,
    ) -> Result<Vec<u8>, ProvisioningError> {
        let wire = IdentityChallengeResponseWire {
            response_to_challenge: B64.encode(&resp.response_to_challenge),
        };
        let http_resp = self
            .client
            .post(format!("{}/privacyca/identity-challenge-response", self.base_url))
            .bearer_auth(&self.bearer_token)
            .json(&wire)
            .send()
            .map_err(Self::map_transport_err)?;

        if !http_resp.status().is_success() {
            return Err(ProvisioningError::HvsUnreachable(format!(
                "identity-challenge-response rejected with status {}",
                http_resp.status()
            )));
        }

        let body = http_resp
            .bytes()
            .map_err(|e| ProvisioningError::ProtocolError(format!("failed reading certificate body: {e}")))?;
        if !body.windows(27).any(|w| w == b"-----BEGIN CERTIFICATE-----") {
            return Err(ProvisioningError::ProtocolError(
                "identity-challenge-response body is not a PEM certificate".into(),
            ));
        }
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_challenge() -> IdentityChallengeRequest {
        IdentityChallengeRequest {
            identity_request: IdentityRequest {
                identity_request_block: vec![1, 2, 3],
                aik_modulus: vec![1, 2, 3],
                tpm_version: "2.0".into(),
                aik_blob: vec![0x81, 0x01, 0x00, 0x01],
                aik_name: vec![9, 9, 9],
            },
            endorsement_certificate: vec![4, 5, 6],
        }
    }

    // `wiremock` is async-only while `HvsClient` is built on
    // `reqwest::blocking`; tests run under `#[tokio::test]` to drive the mock
    // server, pushing the blocking calls onto a worker thread with
    // `spawn_blocking` so they don't stall the runtime's own reactor.

    #[tokio::test]
    async fn submit_challenge_parses_proof_request() {
        let server = MockServer::start().await;
        let proof_body = serde_json::json!({
            "secret": B64.encode(b"secret-bytes"),
            "credential": B64.encode(b"credential-bytes"),
            "sym_blob": B64.encode(b"sym-blob-bytes"),
            "endorsement_cert_blob": B64.encode(b"ek-cert-bytes"),
        });
        Mock::given(method("POST"))
            .and(path("/privacyca/identity-challenge-request"))
            .and(bearer_token("tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(proof_body))
            .mount(&server)
            .await;

        let base_url = server.uri();
        let proof = tokio::task::spawn_blocking(move || {
            let client = HvsClient::new(base_url, "tok").unwrap();
            client.submit_challenge(&sample_challenge())
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(proof.secret, b"secret-bytes");
        assert_eq!(proof.credential, b"credential-bytes");
    }

    #[tokio::test]
    async fn submit_challenge_maps_non_2xx_to_hvs_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/privacyca/identity-challenge-request"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let base_url = server.uri();
        let err = tokio::task::spawn_blocking(move || {
            let client = HvsClient::new(base_url, "tok").unwrap();
            client.submit_challenge(&sample_challenge())
        })
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(err, ProvisioningError::HvsUnreachable(_)));
    }

    #[tokio::test]
    async fn submit_challenge_response_requires_pem_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/privacyca/identity-challenge-response"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not a certificate"))
            .mount(&server)
            .await;

        let base_url = server.uri();
        let err = tokio::task::spawn_blocking(move || {
            let client = HvsClient::new(base_url, "tok").unwrap();
            let resp = IdentityChallengeResponse {
                response_to_challenge: vec![1, 2, 3],
            };
            client.submit_challenge_response(&resp)
        })
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(err, ProvisioningError::ProtocolError(_)));
    }
}
