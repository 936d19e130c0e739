// Certificate signing and verification.
//
// RSA-PSS over SHA-256 via ring, minimum 2048-bit modulus. ring provides
// the signing primitive but no RSA key generation; keys are provisioned
// externally as unencrypted PKCS#8 v1 DER (e.g. `openssl genpkey -algorithm
// RSA -pkeyopt rsa_keygen_bits:2048 | openssl pkcs8 -topk8 -nocrypt`).

use crate::certificate::{required_field_gaps, Certificate};
use crate::crypto::canonical::canonical_bytes;
use crate::{CoreError, CoreResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, UnparsedPublicKey, RSA_PSS_2048_8192_SHA256, RSA_PSS_SHA256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// A certificate plus its detached signature, flattened into one JSON
/// record. Immutable once produced: any field edit after signing makes
/// verification fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedCertificate {
    #[serde(flatten)]
    pub certificate: Certificate,
    /// Base64 RSA-PSS-SHA256 signature over the canonical certificate bytes.
    pub signature: String,
}

/// Outcome of independent certificate verification. Each of the four
/// checks reports its own reason line; `valid` is their conjunction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub reasons: Vec<String>,
}

/// Signs certificates with an RSA private key.
pub struct Signer {
    key_pair: RsaKeyPair,
    rng: SystemRandom,
}

impl Signer {
    /// Load an RSA key pair from unencrypted PKCS#8 v1 DER.
    ///
    /// Keys with a modulus under 2048 bits are rejected outright.
    pub fn from_pkcs8_der(pkcs8_der: &[u8]) -> CoreResult<Self> {
        let key_pair = RsaKeyPair::from_pkcs8(pkcs8_der)
            .map_err(|e| CoreError::Signing(format!("RSA key rejected: {e}")))?;
        if key_pair.public().modulus_len() < 256 {
            return Err(CoreError::Signing(format!(
                "RSA modulus is {} bits; 2048 is the minimum",
                key_pair.public().modulus_len() * 8
            )));
        }
        Ok(Self {
            key_pair,
            rng: SystemRandom::new(),
        })
    }

    /// The matching public key as DER-encoded `RSAPublicKey` (PKCS#1),
    /// the format [`verify_certificate`] consumes.
    pub fn public_key_der(&self) -> Vec<u8> {
        self.key_pair.public().as_ref().to_vec()
    }

    /// Sign the canonical encoding of `certificate`.
    ///
    /// The NIST-required field set is re-checked here, independent of the
    /// builder: an incomplete certificate fails with
    /// [`CoreError::IncompleteCertificate`] and nothing is signed.
    pub fn sign(&self, certificate: &Certificate) -> CoreResult<SignedCertificate> {
        let gaps = required_field_gaps(certificate);
        if !gaps.is_empty() {
            return Err(CoreError::IncompleteCertificate(gaps.join(", ")));
        }

        let message = canonical_bytes(certificate)?;
        let mut signature = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(&RSA_PSS_SHA256, &self.rng, &message, &mut signature)
            .map_err(|_| CoreError::Signing("RSA-PSS signing failed".to_string()))?;

        debug!(
            certificate_id = %certificate.certificate_id,
            key = %public_key_fingerprint(&self.public_key_der()),
            "certificate signed"
        );
        Ok(SignedCertificate {
            certificate: certificate.clone(),
            signature: BASE64.encode(signature),
        })
    }
}

/// Independently verify a signed certificate against a public key
/// (DER-encoded `RSAPublicKey`).
///
/// Four checks, each reported individually so a failing record explains
/// itself: canonical re-encoding, signature over the canonical bytes,
/// required-field completeness, and method/technique pairing validity. A
/// structurally valid signature over an invalid pairing still fails.
pub fn verify_certificate(signed: &SignedCertificate, public_key_der: &[u8]) -> VerificationReport {
    let mut reasons = Vec::new();
    let mut valid = true;

    let message = match canonical_bytes(&signed.certificate) {
        Ok(message) => {
            reasons.push("canonical encoding: recomputed from received fields".to_string());
            Some(message)
        }
        Err(e) => {
            valid = false;
            reasons.push(format!("canonical encoding: failed to recompute: {e}"));
            None
        }
    };

    match (message, BASE64.decode(&signed.signature)) {
        (Some(message), Ok(signature)) => {
            let key = UnparsedPublicKey::new(&RSA_PSS_2048_8192_SHA256, public_key_der);
            match key.verify(&message, &signature) {
                Ok(()) => {
                    reasons.push("signature: valid over the canonical certificate bytes".to_string());
                }
                Err(_) => {
                    valid = false;
                    reasons.push(
                        "signature: mismatch; fields were altered after signing or the key does not match"
                            .to_string(),
                    );
                }
            }
        }
        (_, Err(e)) => {
            valid = false;
            reasons.push(format!("signature: base64 decoding failed: {e}"));
        }
        (None, Ok(_)) => {
            valid = false;
            reasons.push("signature: not checked; canonical encoding unavailable".to_string());
        }
    }

    let gaps = required_field_gaps(&signed.certificate);
    if gaps.is_empty() {
        reasons.push("required fields: all populated".to_string());
    } else {
        valid = false;
        reasons.push(format!("required fields: missing {}", gaps.join(", ")));
    }

    let method = signed.certificate.sanitization_method;
    let technique = signed.certificate.sanitization_technique;
    if method.permits(technique) {
        reasons.push(format!("method pairing: {method:?}/{technique:?} is valid"));
    } else {
        valid = false;
        reasons.push(format!(
            "method pairing: {method:?} does not permit {technique:?}"
        ));
    }

    VerificationReport { valid, reasons }
}

/// Short SHA-256 fingerprint of a public key, for logs and CLI output.
pub fn public_key_fingerprint(public_key_der: &[u8]) -> String {
    let digest = Sha256::digest(public_key_der);
    hex::encode(digest)[..16].to_string()
}
