//! Ed25519 signatures over certificate payloads.

use crate::encoding::hex_array;
use ed25519_dalek::Signer as DalekSigner;
use ed25519_dalek::{Signature as DalekSignature, SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

/// An Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassicalSignature(#[serde(with = "hex_array")] [u8; 64]);

impl ClassicalSignature {
    /// Wrap raw signature bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the signature bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for ClassicalSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassicalSignature({}..)", hex::encode(&self.0[..8]))
    }
}

/// Creates Ed25519 signatures
pub struct Signer {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Signer {
    /// Create a signer with a fresh random key
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut bytes[..]);
        let signing_key = SigningKey::from_bytes(&bytes);
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create a signer from a 32-byte secret key
    ///
    /// # Errors
    ///
    /// Returns error if the secret key is not 32 bytes
    pub fn from_secret(secret: &[u8]) -> Result<Self, SignatureError> {
        let bytes: Zeroizing<[u8; 32]> =
            Zeroizing::new(secret.try_into().map_err(|_| SignatureError::InvalidSecretKey)?);
        let signing_key = SigningKey::from_bytes(&bytes);
        let verifying_key = VerifyingKey::from(&signing_key);
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Copy of the secret key, wiped when dropped
    #[must_use]
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    /// Get the public key
    #[must_use]
    pub fn public_key(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.verifying_key.to_bytes())
    }

    /// Sign a message
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> ClassicalSignature {
        ClassicalSignature(self.signing_key.sign(message).to_bytes())
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("public_key", &self.public_key())
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

/// Ed25519 public key bytes
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeyBytes(#[serde(with = "hex_array")] [u8; 32]);

impl PublicKeyBytes {
    /// Create from bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the underlying bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    ///
    /// # Errors
    ///
    /// Returns error if hex is invalid or not 32 bytes
    pub fn from_hex(hex: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(hex).map_err(|_| SignatureError::InvalidHex)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyBytes({})", self.to_hex())
    }
}

impl fmt::Display for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Checks Ed25519 signatures against one public key
pub struct Verifier {
    verifying_key: VerifyingKey,
}

impl Verifier {
    /// Create a verifier from a public key
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid curve point
    pub fn new(public_key: &PublicKeyBytes) -> Result<Self, SignatureError> {
        let verifying_key =
            VerifyingKey::from_bytes(&public_key.0).map_err(|_| SignatureError::InvalidPublicKey)?;
        Ok(Self { verifying_key })
    }

    /// Verify a signature on a message
    ///
    /// Uses strict verification, so weak keys and malleated signatures fail.
    #[must_use]
    pub fn verify(&self, message: &[u8], signature: &ClassicalSignature) -> bool {
        let sig = DalekSignature::from_bytes(&signature.0);
        self.verifying_key.verify_strict(message, &sig).is_ok()
    }
}

/// Signature-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// Invalid secret key
    #[error("invalid secret key")]
    InvalidSecretKey,
    /// Invalid public key
    #[error("invalid public key")]
    InvalidPublicKey,
    /// Invalid hex encoding
    #[error("invalid hex encoding")]
    InvalidHex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signer_generate() {
        let signer = Signer::generate();
        assert_ne!(signer.public_key().as_bytes(), &[0u8; 32]);
        assert_ne!(Signer::generate().public_key(), signer.public_key());
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = Signer::generate();
        let signature = signer.sign(b"payload");

        let verifier = Verifier::new(&signer.public_key()).unwrap();
        assert!(verifier.verify(b"payload", &signature));
        assert!(!verifier.verify(b"payload!", &signature));
    }

    #[test]
    fn test_signatures_are_deterministic() {
        let signer = Signer::generate();
        assert_eq!(signer.sign(b"same"), signer.sign(b"same"));
    }

    #[test]
    fn test_from_secret_restores_key() {
        let signer = Signer::generate();
        let restored = Signer::from_secret(&signer.secret_bytes()[..]).unwrap();
        assert_eq!(restored.public_key(), signer.public_key());
        assert!(matches!(
            Signer::from_secret(&[1u8; 31]),
            Err(SignatureError::InvalidSecretKey)
        ));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let signature = Signer::generate().sign(b"payload");
        let verifier = Verifier::new(&Signer::generate().public_key()).unwrap();
        assert!(!verifier.verify(b"payload", &signature));
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let key = Signer::generate().public_key();
        assert_eq!(PublicKeyBytes::from_hex(&key.to_hex()).unwrap(), key);
        assert!(matches!(PublicKeyBytes::from_hex("abcd"), Err(SignatureError::InvalidPublicKey)));
        assert!(matches!(PublicKeyBytes::from_hex("zz"), Err(SignatureError::InvalidHex)));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let signer = Signer::generate();
        let secret = hex::encode(*signer.secret_bytes());
        let debug = format!("{signer:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&secret));
    }

    #[test]
    fn test_signature_serde_length_checked() {
        let signature = Signer::generate().sign(b"x");
        let json = serde_json::to_string(&signature).unwrap();
        assert_eq!(json.len(), 128 + 2);
        assert_eq!(serde_json::from_str::<ClassicalSignature>(&json).unwrap(), signature);
        assert!(serde_json::from_str::<ClassicalSignature>("\"abcd\"").is_err());
    }
}
