//! Minimal PEM armor handling shared by the AIK publisher (C6) and the
//! Privacy-CA trust store (C7). The corpus has no dedicated `pem` crate in
//! its dependency graph, so the armor strip is hand-rolled on top of the
//! already-present `base64` crate rather than pulling one in for a handful
//! of lines.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

use crate::error::ProvisioningError;

/// Decodes the first `-----BEGIN <label>----- ... -----END <label>-----`
/// block found in `text`, returning the label and its decoded DER body.
pub fn decode_first_block(text: &str) -> Result<(String, Vec<u8>), ProvisioningError> {
    let begin_marker = "-----BEGIN ";
    let start = text
        .find(begin_marker)
        .ok_or_else(|| ProvisioningError::CorruptArtifact("no PEM BEGIN marker found".into()))?;
    let after_begin = &text[start + begin_marker.len()..];
    let label_end = after_begin
        .find("-----")
        .ok_or_else(|| ProvisioningError::CorruptArtifact("malformed PEM BEGIN marker".into()))?;
    let label = &after_begin[..label_end];

    let end_marker = format!("-----END {label}-----");
    let body_start = start + begin_marker.len() + label_end + "-----".len();
    let body_and_rest = &text[body_start..];
    let end_offset = body_and_rest
        .find(&end_marker)
        .ok_or_else(|| ProvisioningError::CorruptArtifact(format!("no matching END marker for {label}")))?;
    let body = &body_and_rest[..end_offset];

    let stripped: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let der = B64
        .decode(stripped)
        .map_err(|e| ProvisioningError::CorruptArtifact(format!("PEM body is not valid base64: {e}")))?;

    Ok((label.to_string(), der))
}
