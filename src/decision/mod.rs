// Decision engine - maps device facts and policy answers to a NIST SP 800-88
// sanitization method and technique.
//
// The rule cascade is fixed precedence, first match wins. Pure and
// deterministic: no I/O, no clock, no randomness.

use crate::{CoreError, CoreResult, DeviceFacts, MediaType, PolicyAnswers, Sensitivity};
use serde::{Deserialize, Serialize};

/// NIST SP 800-88 sanitization assurance tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Clear,
    Purge,
    Destroy,
}

impl Method {
    /// The valid method/technique pairings. The verifier re-checks these on
    /// signed certificates, so a structurally valid signature over a bogus
    /// pairing still fails verification.
    pub fn permits(&self, technique: Technique) -> bool {
        match self {
            Method::Clear => matches!(technique, Technique::SinglePassOverwrite),
            Method::Purge => matches!(
                technique,
                Technique::SinglePassOverwrite
                    | Technique::SsdSecureErase
                    | Technique::CryptographicErase
            ),
            Method::Destroy => matches!(technique, Technique::PhysicalDestructionGuidanceOnly),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Clear => write!(f, "Clear"),
            Method::Purge => write!(f, "Purge"),
            Method::Destroy => write!(f, "Destroy"),
        }
    }
}

/// Concrete mechanism implementing a sanitization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Technique {
    SinglePassOverwrite,
    SsdSecureErase,
    CryptographicErase,
    /// Advisory only. No executable action is ever dispatched for this
    /// technique; the operator receives destruction guidance out of band.
    PhysicalDestructionGuidanceOnly,
}

impl Technique {
    /// Whether the state machine dispatches an executor for this technique.
    pub fn is_executable(&self) -> bool {
        !matches!(self, Technique::PhysicalDestructionGuidanceOnly)
    }

    /// Overwrite passes the technique performs. Hardware-delegated
    /// techniques count as one logical pass for progress accounting.
    pub fn pass_count(&self) -> u32 {
        match self {
            Technique::SinglePassOverwrite
            | Technique::SsdSecureErase
            | Technique::CryptographicErase => 1,
            Technique::PhysicalDestructionGuidanceOnly => 0,
        }
    }
}

impl std::fmt::Display for Technique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Technique::SinglePassOverwrite => write!(f, "Single Pass Overwrite"),
            Technique::SsdSecureErase => write!(f, "SSD Secure Erase"),
            Technique::CryptographicErase => write!(f, "Cryptographic Erase"),
            Technique::PhysicalDestructionGuidanceOnly => {
                write!(f, "Physical Destruction (guidance only)")
            }
        }
    }
}

/// Informational findings attached to a decision. Warnings document reduced
/// assurance; they never block the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    /// Purge requested on magnetic media but only a software overwrite is
    /// available; Purge-grade assurance may not be achievable.
    PurgeOverwriteOnMagnetic,
    /// Clear on flash media cannot address spare or over-provisioned cells.
    ClearSpareAreaUnaddressed,
    /// Encryption is attested always-on but the media type is not known to
    /// be flash, so cryptographic erase was downgraded.
    CryptoEraseRequiresKnownFlash,
    /// The policy inputs did not match any classification rule; the engine
    /// fell back to Purge. Reachable only through contradictory inputs.
    UnclassifiedPolicyFallback,
    /// High-sensitivity data noted on a device routed to destruction.
    HighSensitivityDestructionNote,
    /// Device leaves physical control; noted for the destruction record.
    ControlLossDestructionNote,
}

impl WarningCode {
    /// Human-readable form recorded on certificates.
    pub fn message(&self) -> &'static str {
        match self {
            WarningCode::PurgeOverwriteOnMagnetic => {
                "Purge downgraded to software overwrite; lab-grade recovery resistance is not guaranteed on this media"
            }
            WarningCode::ClearSpareAreaUnaddressed => {
                "Clear on flash media may leave spare or over-provisioned cells unaddressed"
            }
            WarningCode::CryptoEraseRequiresKnownFlash => {
                "encryption attested always-on but media type is not flash; cryptographic erase downgraded"
            }
            WarningCode::UnclassifiedPolicyFallback => {
                "policy inputs did not match any classification rule; defaulted to Purge for safety"
            }
            WarningCode::HighSensitivityDestructionNote => {
                "high-sensitivity data; retain the destruction record with the asset inventory"
            }
            WarningCode::ControlLossDestructionNote => {
                "device leaves physical control; destruction should be performed before transfer"
            }
        }
    }
}

/// Output of the decision engine. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub method: Method,
    pub technique: Technique,
    pub warnings: Vec<WarningCode>,
}

/// Run the NIST SP 800-88 decision flow over device facts and operator
/// policy answers.
///
/// Precedence, first match wins:
/// 1. device will not be reused -> Destroy (guidance only)
/// 2. leaves physical control, or moderate/high sensitivity -> Purge
/// 3. low sensitivity staying in control -> Clear
/// 4. defensive fallback -> Purge with an observable warning
///
/// Contradictory facts are rejected up front with
/// [`CoreError::Configuration`], never silently coerced.
pub fn decide(facts: &DeviceFacts, answers: &PolicyAnswers) -> CoreResult<Decision> {
    if facts.encryption_always_on && !facts.is_encrypted {
        return Err(CoreError::Configuration(format!(
            "device {} reports encryption always-on but is not encrypted",
            facts.device_path
        )));
    }

    if !answers.will_be_reused {
        let mut warnings = Vec::new();
        if answers.sensitivity == Sensitivity::High {
            warnings.push(WarningCode::HighSensitivityDestructionNote);
        }
        if answers.leaves_physical_control {
            warnings.push(WarningCode::ControlLossDestructionNote);
        }
        return Ok(Decision {
            method: Method::Destroy,
            technique: Technique::PhysicalDestructionGuidanceOnly,
            warnings,
        });
    }

    if answers.leaves_physical_control
        || matches!(answers.sensitivity, Sensitivity::Moderate | Sensitivity::High)
    {
        let mut warnings = Vec::new();
        let technique = purge_technique(facts, &mut warnings);
        return Ok(Decision {
            method: Method::Purge,
            technique,
            warnings,
        });
    }

    if answers.sensitivity == Sensitivity::Low && !answers.leaves_physical_control {
        let mut warnings = Vec::new();
        if facts.media_type == MediaType::Flash {
            warnings.push(WarningCode::ClearSpareAreaUnaddressed);
        }
        return Ok(Decision {
            method: Method::Clear,
            technique: Technique::SinglePassOverwrite,
            warnings,
        });
    }

    // Unreachable given the rules above are exhaustive over the policy
    // inputs, but kept observable: a caller auditing decisions must be able
    // to see that the fallback fired rather than a rule.
    tracing::warn!(
        device = %facts.device_path,
        "policy inputs escaped the classification rules; falling back to Purge"
    );
    Ok(Decision {
        method: Method::Purge,
        technique: Technique::SinglePassOverwrite,
        warnings: vec![WarningCode::UnclassifiedPolicyFallback],
    })
}

/// Purge technique selection. Cryptographic erase requires attested
/// always-on encryption on known flash media; anything else downgrades with
/// a warning rather than erroring, since Purge must still proceed.
fn purge_technique(facts: &DeviceFacts, warnings: &mut Vec<WarningCode>) -> Technique {
    if facts.encryption_always_on {
        if facts.media_type == MediaType::Flash {
            return Technique::CryptographicErase;
        }
        warnings.push(WarningCode::CryptoEraseRequiresKnownFlash);
    }

    match facts.media_type {
        MediaType::Flash => Technique::SsdSecureErase,
        MediaType::Magnetic | MediaType::Virtual | MediaType::Unknown => {
            warnings.push(WarningCode::PurgeOverwriteOnMagnetic);
            Technique::SinglePassOverwrite
        }
    }
}
