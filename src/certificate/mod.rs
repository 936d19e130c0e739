// Certificate assembly.
//
// Builds the NIST-required record from device facts, the decision, and a
// completed operation snapshot. Fields that cannot be sourced are recorded
// as explicit placeholders and flagged in verificationDetails; nothing is
// ever silently omitted.

pub mod store;

use crate::decision::{Decision, Method, Technique};
use crate::operation::{OperationSnapshot, OperationState};
use crate::{
    tool_identifier, CoreError, CoreResult, DeviceFacts, OperatorIdentity, VerificationStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Placeholder recorded when a source field is unavailable.
pub const UNKNOWN: &str = "Unknown";

/// Vendors recognized when deriving the manufacturer from a model string.
const KNOWN_MANUFACTURERS: &[&str] = &[
    "Samsung",
    "Intel",
    "Western Digital",
    "Seagate",
    "Crucial",
    "Kingston",
    "SanDisk",
    "Micron",
    "Toshiba",
    "Hitachi",
];

/// The sanitization certificate, pre-signature.
///
/// Serializes to exactly the required artifact field set (camelCase). The
/// signature is added by the signer, never here; an instance of this type
/// is by construction an unsigned record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub media_type: String,
    pub sanitization_method: Method,
    pub sanitization_technique: Technique,
    pub tool_identifier: String,
    pub verification_method: String,
    pub operator_name: String,
    pub operator_title: String,
    pub date: DateTime<Utc>,
    pub device_path: String,
    pub device_size_bytes: u64,
    pub verification_status: VerificationStatus,
    pub verification_details: Vec<String>,
    pub completion_time_utc: DateTime<Utc>,
    pub certificate_id: String,
    pub compliance_statement: String,
}

/// The NIST-required fields that must be non-empty before signing. Used by
/// the builder, the signer (again, independently), and the verifier.
pub fn required_field_gaps(certificate: &Certificate) -> Vec<&'static str> {
    let mut gaps = Vec::new();
    let string_fields: [(&'static str, &str); 9] = [
        ("manufacturer", &certificate.manufacturer),
        ("model", &certificate.model),
        ("serialNumber", &certificate.serial_number),
        ("mediaType", &certificate.media_type),
        ("toolIdentifier", &certificate.tool_identifier),
        ("verificationMethod", &certificate.verification_method),
        ("operatorName", &certificate.operator_name),
        ("operatorTitle", &certificate.operator_title),
        ("devicePath", &certificate.device_path),
    ];
    for (name, value) in string_fields {
        if value.trim().is_empty() {
            gaps.push(name);
        }
    }
    if certificate.certificate_id.trim().is_empty() {
        gaps.push("certificateId");
    }
    if certificate.compliance_statement.trim().is_empty() {
        gaps.push("complianceStatement");
    }
    gaps
}

/// Derive a manufacturer from a model string against the known-vendor list.
pub fn extract_manufacturer(model: &str) -> Option<String> {
    let lowered = model.to_lowercase();
    KNOWN_MANUFACTURERS
        .iter()
        .find(|vendor| lowered.contains(&vendor.to_lowercase()))
        .map(|vendor| vendor.to_string())
}

/// Assembles certificates from completed operations.
pub struct CertificateBuilder {
    tool: String,
}

impl CertificateBuilder {
    pub fn new() -> Self {
        Self {
            tool: tool_identifier(),
        }
    }

    /// Build the certificate record for a completed operation.
    ///
    /// Fails with [`CoreError::IncompleteOperation`] for anything but a
    /// `Completed` snapshot: no certificate is ever emitted for a failed or
    /// cancelled run. Decision warnings and placeholder substitutions are
    /// folded into `verificationDetails` so the record documents its own
    /// reduced assurance.
    pub fn build(
        &self,
        facts: &DeviceFacts,
        decision: &Decision,
        operation: &OperationSnapshot,
        operator: &OperatorIdentity,
    ) -> CoreResult<Certificate> {
        if operation.state != OperationState::Completed {
            return Err(CoreError::IncompleteOperation(format!(
                "cannot certify operation in state {:?}",
                operation.state
            )));
        }
        let completed_at = operation.completed_at.ok_or_else(|| {
            CoreError::IncompleteOperation(
                "completed operation is missing its completion time".to_string(),
            )
        })?;

        let mut details = operation.verification_details.clone();
        for warning in &decision.warnings {
            details.push(warning.message().to_string());
        }

        let model = if facts.model.trim().is_empty() {
            details.push("model unavailable; placeholder recorded".to_string());
            UNKNOWN.to_string()
        } else {
            facts.model.clone()
        };

        let manufacturer = if facts.manufacturer.trim().is_empty() {
            match extract_manufacturer(&model) {
                Some(vendor) => vendor,
                None => {
                    details.push("manufacturer unavailable; placeholder recorded".to_string());
                    UNKNOWN.to_string()
                }
            }
        } else {
            facts.manufacturer.clone()
        };

        let serial_number = if facts.serial_number.trim().is_empty() {
            details.push("serial number unavailable; placeholder recorded".to_string());
            format!("UNKNOWN-{}", sanitize_path_tag(&facts.device_path))
        } else {
            facts.serial_number.clone()
        };

        // Build time is monotonic with operation completion.
        let date = Utc::now().max(completed_at);

        let certificate = Certificate {
            manufacturer,
            model,
            serial_number,
            media_type: facts.media_type.to_string(),
            sanitization_method: decision.method,
            sanitization_technique: decision.technique,
            tool_identifier: self.tool.clone(),
            verification_method: "post-sanitization completion check".to_string(),
            operator_name: operator.name.clone(),
            operator_title: operator.title.clone(),
            date,
            device_path: facts.device_path.clone(),
            device_size_bytes: facts.size_bytes,
            verification_status: operation.verification_status,
            verification_details: details,
            completion_time_utc: completed_at,
            certificate_id: Uuid::new_v4().to_string(),
            compliance_statement: "Sanitized in accordance with NIST SP 800-88 Rev. 2"
                .to_string(),
        };

        debug!(
            certificate_id = %certificate.certificate_id,
            device = %certificate.device_path,
            "certificate assembled"
        );
        Ok(certificate)
    }
}

impl Default for CertificateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Last path component, for placeholder serial numbers.
fn sanitize_path_tag(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
