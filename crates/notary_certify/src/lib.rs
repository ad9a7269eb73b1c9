//! Evidence certification for NOTARY.
//!
//! Turns content plus metadata into a certificate that binds a canonical
//! digest to a quorum-agreed time, signed twice: once with Ed25519 and once
//! with a Kyber768-derived HMAC seal. Verification re-derives every claim
//! against keys the verifier trusts.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod encoding;

pub mod certificate;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod seal;
pub mod signature;
pub mod verifier;

pub use certificate::{Certificate, CertificateError};
pub use config::{ConfigError, EngineConfig, VerifierConfig};
pub use engine::CertificationEngine;
pub use error::{CertifyError, CertifyResult};
pub use keys::{signing_payload, HybridKeyManager, HybridSignature, KeyError, PublicKeys};
pub use seal::{PqAuditKey, PqCiphertext, PqKeyPair, PqPublicKey, PqSeal, PqTag, SealError};
pub use signature::{ClassicalSignature, PublicKeyBytes, SignatureError, Signer};
pub use verifier::{FailureReason, TrustAnchor, VerificationFailure, VerificationReport, Verifier};
