//! Hybrid classical + post-quantum key management.

use crate::seal::{PqAuditKey, PqKeyPair, PqPublicKey, PqSeal, SealError};
use crate::signature::{ClassicalSignature, PublicKeyBytes, Signer};
use notary_core::{CanonicalDigest, Version};
use notary_time::ConsensusTimestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bytes covered by both signatures: the digest followed by the timestamp
#[must_use]
pub fn signing_payload(digest: &CanonicalDigest, timestamp: &ConsensusTimestamp) -> Vec<u8> {
    let ts = timestamp.canonical_bytes();
    let mut payload = Vec::with_capacity(CanonicalDigest::LEN + ts.len());
    payload.extend_from_slice(digest.as_bytes());
    payload.extend_from_slice(&ts);
    payload
}

/// Public halves of a hybrid keypair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeys {
    /// Ed25519 verifying key
    pub classical: PublicKeyBytes,
    /// Kyber768 public key
    pub pq: PqPublicKey,
}

impl PublicKeys {
    /// Stable identifier: first 16 hex chars of BLAKE3 over both keys
    #[must_use]
    pub fn key_id(&self) -> String {
        let digest = CanonicalDigest::compute_parts(&[self.classical.as_bytes(), self.pq.as_bytes()]);
        digest.to_hex()[..16].to_string()
    }
}

/// Both signature artifacts for one payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridSignature {
    /// Ed25519 signature
    pub classical: ClassicalSignature,
    /// Kyber-derived HMAC seal
    pub pq_seal: PqSeal,
}

/// Holds an Ed25519 signing key and a Kyber768 keypair
///
/// Instances are passed explicitly to the engine; several independent
/// signers can coexist in one process.
pub struct HybridKeyManager {
    classical: Signer,
    pq: PqKeyPair,
}

impl HybridKeyManager {
    /// Generate both keypairs
    #[must_use]
    pub fn generate() -> Self {
        let manager = Self {
            classical: Signer::generate(),
            pq: PqKeyPair::generate(),
        };
        info!(key_id = %manager.key_id(), "generated hybrid keypair");
        manager
    }

    /// Assemble a manager from existing keypairs
    #[must_use]
    pub fn from_parts(classical: Signer, pq: PqKeyPair) -> Self {
        Self { classical, pq }
    }

    /// Both public keys
    #[must_use]
    pub fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            classical: self.classical.public_key(),
            pq: self.pq.public_key().clone(),
        }
    }

    /// Identifier of this signer
    #[must_use]
    pub fn key_id(&self) -> String {
        self.public_keys().key_id()
    }

    /// Kyber key material for auditors
    #[must_use]
    pub fn audit_key(&self) -> PqAuditKey {
        self.pq.audit_key()
    }

    /// Sign a digest bound to a consensus timestamp with both primitives
    ///
    /// Nothing is returned unless both artifacts were produced.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::KeyUnavailable`] if the post-quantum key cannot be used
    pub fn sign(&self, digest: &CanonicalDigest, timestamp: &ConsensusTimestamp) -> Result<HybridSignature, KeyError> {
        let payload = signing_payload(digest, timestamp);
        let pq_seal = self.pq.seal(&payload).map_err(|e| KeyError::KeyUnavailable {
            reason: format!("post-quantum key unusable: {e}"),
        })?;
        let classical = self.classical.sign(&payload);
        debug!(digest = %digest.short(), payload_len = payload.len(), "hybrid signature produced");
        Ok(HybridSignature { classical, pq_seal })
    }

    /// Write both keypairs to a JSON key file
    ///
    /// On Unix the file is created with mode 0600.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeyError> {
        let path = path.as_ref();
        let file = KeyFile {
            version: Version::CERTIFICATE.to_string(),
            key_id: self.key_id(),
            classical_public: self.classical.public_key().to_hex(),
            classical_secret: hex::encode(&self.classical.secret_bytes()[..]),
            pq_public: hex::encode(self.pq.public_key().as_bytes()),
            pq_secret: hex::encode(&*self.pq.secret_bytes()),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| KeyError::Io(e.to_string()))?;
        write_private(path, json.as_bytes()).map_err(|e| KeyError::Io(format!("{}: {e}", path.display())))?;
        info!(key_id = %file.key_id, path = %path.display(), "saved key file");
        Ok(())
    }

    /// Load both keypairs from a JSON key file
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::KeyUnavailable`] if the file is missing, either
    /// key is absent or corrupt, or the stored public keys do not match
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let unavailable = |reason: String| KeyError::KeyUnavailable {
            reason: format!("{}: {reason}", path.display()),
        };

        let json = std::fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
        let file: KeyFile = serde_json::from_str(&json).map_err(|e| unavailable(e.to_string()))?;

        let classical_secret = zeroize::Zeroizing::new(
            hex::decode(&file.classical_secret).map_err(|_| unavailable("classical secret is not hex".to_string()))?,
        );
        let classical =
            Signer::from_secret(&classical_secret).map_err(|e| unavailable(format!("classical key: {e}")))?;
        if classical.public_key().to_hex() != file.classical_public {
            return Err(unavailable("classical public key does not match secret".to_string()));
        }

        let pq_public = hex::decode(&file.pq_public).map_err(|_| unavailable("pq public key is not hex".to_string()))?;
        let pq_secret = zeroize::Zeroizing::new(
            hex::decode(&file.pq_secret).map_err(|_| unavailable("pq secret is not hex".to_string()))?,
        );
        let pq = PqKeyPair::from_bytes(&pq_public, &pq_secret)
            .map_err(|e: SealError| unavailable(format!("post-quantum key: {e}")))?;

        let manager = Self::from_parts(classical, pq);
        if manager.key_id() != file.key_id {
            return Err(unavailable("key id does not match stored keys".to_string()));
        }
        info!(key_id = %file.key_id, path = %path.display(), "loaded key file");
        Ok(manager)
    }
}

impl fmt::Debug for HybridKeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HybridKeyManager")
            .field("key_id", &self.key_id())
            .field("classical", &self.classical)
            .field("pq", &self.pq)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct KeyFile {
    version: String,
    key_id: String,
    classical_public: String,
    classical_secret: String,
    pq_public: String,
    pq_secret: String,
}

#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

/// Key management errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// A private key is missing or corrupt; no signature is produced
    #[error("key unavailable: {reason}")]
    KeyUnavailable {
        /// What went wrong
        reason: String,
    },

    /// Key file could not be written
    #[error("key file I/O error: {0}")]
    Io(String),
}
