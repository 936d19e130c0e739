pub mod certificate;
pub mod crypto;
pub mod decision;
pub mod devices;
pub mod operation;
pub mod ui;

// Re-export the main pipeline entry points for convenience
pub use certificate::{Certificate, CertificateBuilder};
pub use crypto::{verify_certificate, SignedCertificate, Signer};
pub use decision::{decide, Decision, Method, Technique, WarningCode};
pub use operation::{OperationHandle, OperationRegistry, OperationSnapshot};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy for the sanitization pipeline.
///
/// Every failure carries a machine-readable kind plus a human-readable
/// detail string. Warnings are not errors; they travel on the `Decision`
/// and never block progress.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("conflicting operation already active on {0}")]
    Conflict(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("operation is not complete: {0}")]
    IncompleteOperation(String),

    #[error("certificate is missing required fields: {0}")]
    IncompleteCertificate(String),

    #[error("certificate verification failed: {0}")]
    VerificationFailed(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Process exit code for the CLI surface. Zero is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Configuration(_) => 2,
            CoreError::Conflict(_) => 3,
            CoreError::IncompleteOperation(_) => 4,
            CoreError::IncompleteCertificate(_) => 5,
            CoreError::VerificationFailed(_) => 6,
            CoreError::DeviceNotFound(_) => 7,
            CoreError::Signing(_) | CoreError::Io(_) | CoreError::Serialization(_) => 1,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// How a device is attached. `File` covers sandbox images and loopback-style
/// virtual media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    File,
    Ata,
    Nvme,
    Scsi,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Magnetic,
    Flash,
    Virtual,
    Unknown,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Magnetic => write!(f, "magnetic"),
            MediaType::Flash => write!(f, "flash"),
            MediaType::Virtual => write!(f, "virtual"),
            MediaType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Immutable device descriptor supplied once per operation.
///
/// Nothing in the pipeline mutates these; they are read-only inputs to the
/// decision engine, the state machine, and the certificate builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFacts {
    pub device_path: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub size_bytes: u64,
    pub transport: Transport,
    pub media_type: MediaType,
    pub is_encrypted: bool,
    /// Operator attestation that the device has been encrypted since first
    /// use. Never auto-detected; cryptographic erase is only trustworthy
    /// when this holds.
    pub encryption_always_on: bool,
}

/// Data sensitivity tiers from the NIST SP 800-88 decision flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Moderate,
    High,
}

/// Operator-supplied policy answers. Immutable once an operation starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyAnswers {
    pub will_be_reused: bool,
    pub sensitivity: Sensitivity,
    pub leaves_physical_control: bool,
}

/// Operator identity recorded on the certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorIdentity {
    pub name: String,
    pub title: String,
}

/// Outcome of the post-sanitization verification check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Passed,
    Failed,
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationStatus::Pending => write!(f, "pending"),
            VerificationStatus::Passed => write!(f, "passed"),
            VerificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Name and version reported in the certificate's `toolIdentifier` field.
pub fn tool_identifier() -> String {
    format!("veriwipe v{}", env!("CARGO_PKG_VERSION"))
}
