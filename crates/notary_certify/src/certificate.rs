//! Certificate binding evidence to a trusted time and a hybrid signature.

use crate::keys::{signing_payload, PublicKeys};
use crate::seal::{PqCiphertext, PqPublicKey, PqTag};
use crate::signature::{ClassicalSignature, PublicKeyBytes};
use notary_core::{CanonicalDigest, Version};
use notary_time::ConsensusTimestamp;
use serde::{Deserialize, Serialize};

/// An immutable certificate of evidence
///
/// Fields are private and there are no setters; the only ways to obtain a
/// certificate are the engine and deserialization. Deserialized copies are
/// untrusted until a verifier has checked them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    version: Version,
    content_digest: CanonicalDigest,
    metadata_digest_inputs: String,
    timestamp: ConsensusTimestamp,
    key_id: String,
    classical_public_key: PublicKeyBytes,
    classical_signature: ClassicalSignature,
    pq_public_key: PqPublicKey,
    pq_ciphertext: PqCiphertext,
    pq_tag: PqTag,
}

impl Certificate {
    pub(crate) fn new(
        content_digest: CanonicalDigest,
        metadata_digest_inputs: String,
        timestamp: ConsensusTimestamp,
        keys: PublicKeys,
        classical_signature: ClassicalSignature,
        pq_ciphertext: PqCiphertext,
        pq_tag: PqTag,
    ) -> Self {
        Self {
            version: Version::CERTIFICATE,
            content_digest,
            metadata_digest_inputs,
            timestamp,
            key_id: keys.key_id(),
            classical_public_key: keys.classical,
            classical_signature,
            pq_public_key: keys.pq,
            pq_ciphertext,
            pq_tag,
        }
    }

    /// Schema version
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Digest of the canonical metadata and content
    #[must_use]
    pub fn content_digest(&self) -> &CanonicalDigest {
        &self.content_digest
    }

    /// Canonical metadata text the digest was computed over
    #[must_use]
    pub fn metadata_digest_inputs(&self) -> &str {
        &self.metadata_digest_inputs
    }

    /// Consensus timestamp with its quorum record
    #[must_use]
    pub fn timestamp(&self) -> &ConsensusTimestamp {
        &self.timestamp
    }

    /// Identifier of the signing keys
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Embedded Ed25519 public key
    #[must_use]
    pub fn classical_public_key(&self) -> &PublicKeyBytes {
        &self.classical_public_key
    }

    /// Ed25519 signature over the signing payload
    #[must_use]
    pub fn classical_signature(&self) -> &ClassicalSignature {
        &self.classical_signature
    }

    /// Embedded Kyber768 public key
    #[must_use]
    pub fn pq_public_key(&self) -> &PqPublicKey {
        &self.pq_public_key
    }

    /// KEM ciphertext of the seal
    #[must_use]
    pub fn pq_ciphertext(&self) -> &PqCiphertext {
        &self.pq_ciphertext
    }

    /// HMAC tag of the seal
    #[must_use]
    pub fn pq_tag(&self) -> &PqTag {
        &self.pq_tag
    }

    /// Both embedded public keys
    #[must_use]
    pub fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            classical: self.classical_public_key,
            pq: self.pq_public_key.clone(),
        }
    }

    /// Bytes both signatures must cover
    #[must_use]
    pub fn signing_payload(&self) -> Vec<u8> {
        signing_payload(&self.content_digest, &self.timestamp)
    }

    /// Serialize to compact JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, CertificateError> {
        serde_json::to_string(self).map_err(|e| CertificateError::Serialization(e.to_string()))
    }

    /// Serialize to indented JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json_pretty(&self) -> Result<String, CertificateError> {
        serde_json::to_string_pretty(self).map_err(|e| CertificateError::Serialization(e.to_string()))
    }

    /// Parse a certificate from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or written by an unreadable schema version
    pub fn from_json(json: &str) -> Result<Self, CertificateError> {
        let cert: Self = serde_json::from_str(json).map_err(|e| CertificateError::Parse(e.to_string()))?;
        if !Version::CERTIFICATE.can_read(&cert.version) {
            return Err(CertificateError::UnsupportedVersion(cert.version));
        }
        Ok(cert)
    }
}

/// Certificate-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Parse error
    #[error("parse error: {0}")]
    Parse(String),
    /// Schema version newer than this build understands
    #[error("unsupported certificate version {0}")]
    UnsupportedVersion(Version),
    /// File could not be read or written
    #[error("certificate I/O error: {0}")]
    Io(String),
}
