pub mod canonical;
pub mod signing;

pub use canonical::canonical_bytes;
pub use signing::{
    public_key_fingerprint, verify_certificate, SignedCertificate, Signer, VerificationReport,
};
