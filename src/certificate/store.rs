// Persisted certificate artifacts: one pretty-printed JSON record per
// operation, loadable for independent verification.

use crate::crypto::SignedCertificate;
use crate::CoreResult;
use std::path::Path;
use tracing::info;

/// Write the signed record to `path` as pretty-printed JSON.
pub fn save_certificate(certificate: &SignedCertificate, path: &Path) -> CoreResult<()> {
    let json = serde_json::to_string_pretty(certificate)?;
    std::fs::write(path, json)?;
    info!(path = %path.display(), "certificate written");
    Ok(())
}

/// Load a signed record previously written by [`save_certificate`].
pub fn load_certificate(path: &Path) -> CoreResult<SignedCertificate> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
