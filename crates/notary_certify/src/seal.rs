//! Post-quantum seal built from Kyber768 key encapsulation.
//!
//! Kyber is a KEM, not a signature scheme, so the seal authenticates a
//! payload indirectly:
//!
//! 1. encapsulate a fresh shared secret against the signer's own Kyber
//!    public key, giving a ciphertext and a shared secret
//! 2. derive an HMAC key from the shared secret with HKDF-SHA256
//! 3. tag the payload with HMAC-SHA256 under that key
//!
//! The ciphertext and tag travel with the certificate. Anyone holding the
//! Kyber secret key can decapsulate the ciphertext, re-derive the key and
//! recompute the tag. This is not a standard signature construction and
//! needs formal review before production use.

use crate::encoding::{hex_array, hex_vec};
use hmac::{Hmac, Mac};
use pqcrypto_kyber::kyber768;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

type HmacSha256 = Hmac<Sha256>;

/// HKDF salt binding derived keys to this construction
const SEAL_SALT: &[u8] = b"notary/pq-seal/v1";

/// HKDF info for the tag key
const SEAL_INFO: &[u8] = b"authentication-key";

/// Length of the HMAC-SHA256 tag
pub const TAG_LEN: usize = 32;

/// Offset of the embedded public key inside a Kyber768 secret key
const SECRET_KEY_PUBLIC_OFFSET: usize = 1152;

/// Kyber768 public key
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PqPublicKey(#[serde(with = "hex_vec")] Vec<u8>);

impl PqPublicKey {
    /// Wrap raw key bytes, checking the length
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a Kyber768 public key
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SealError> {
        kyber768::PublicKey::from_bytes(bytes).map_err(|_| SealError::InvalidPublicKey)?;
        Ok(Self(bytes.to_vec()))
    }

    /// Get the key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short fingerprint for logs
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(&blake3::hash(&self.0).as_bytes()[..8])
    }
}

impl fmt::Debug for PqPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PqPublicKey({})", self.fingerprint())
    }
}

/// KEM ciphertext carried in a certificate
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PqCiphertext(#[serde(with = "hex_vec")] Vec<u8>);

impl PqCiphertext {
    /// Get the ciphertext bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PqCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PqCiphertext({} bytes)", self.0.len())
    }
}

/// HMAC-SHA256 tag over a signing payload
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PqTag(#[serde(with = "hex_array")] [u8; TAG_LEN]);

impl PqTag {
    /// Get the tag bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; TAG_LEN] {
        &self.0
    }
}

impl fmt::Debug for PqTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PqTag({}..)", hex::encode(&self.0[..8]))
    }
}

/// Ciphertext and tag produced by [`PqKeyPair::seal`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PqSeal {
    /// Encapsulated shared secret
    pub ciphertext: PqCiphertext,
    /// Tag over the payload
    pub tag: PqTag,
}

/// Kyber768 keypair owned by a signer
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PqKeyPair {
    #[zeroize(skip)]
    public: PqPublicKey,
    secret: Vec<u8>,
}

impl PqKeyPair {
    /// Generate a fresh keypair
    #[must_use]
    pub fn generate() -> Self {
        let (pk, sk) = kyber768::keypair();
        Self {
            public: PqPublicKey(pk.as_bytes().to_vec()),
            secret: sk.as_bytes().to_vec(),
        }
    }

    /// Restore a keypair from raw key bytes
    ///
    /// # Errors
    ///
    /// Returns error if either key has the wrong length, or
    /// [`SealError::KeyMismatch`] if the public key is not the one embedded
    /// in the secret key
    pub fn from_bytes(public: &[u8], secret: &[u8]) -> Result<Self, SealError> {
        let public = PqPublicKey::from_bytes(public)?;
        kyber768::SecretKey::from_bytes(secret).map_err(|_| SealError::InvalidSecretKey)?;
        let embedded = secret
            .get(SECRET_KEY_PUBLIC_OFFSET..SECRET_KEY_PUBLIC_OFFSET + public.0.len())
            .ok_or(SealError::InvalidSecretKey)?;
        if embedded != public.as_bytes() {
            return Err(SealError::KeyMismatch);
        }
        Ok(Self {
            public,
            secret: secret.to_vec(),
        })
    }

    /// Public half
    #[must_use]
    pub fn public_key(&self) -> &PqPublicKey {
        &self.public
    }

    /// Copy of the secret key, wiped when dropped
    #[must_use]
    pub fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.secret.clone())
    }

    /// Seal a payload against our own public key
    ///
    /// # Errors
    ///
    /// Returns error if the stored public key is unusable
    pub fn seal(&self, payload: &[u8]) -> Result<PqSeal, SealError> {
        let pk = kyber768::PublicKey::from_bytes(&self.public.0).map_err(|_| SealError::InvalidPublicKey)?;
        let (shared, ciphertext) = kyber768::encapsulate(&pk);
        let key = derive_tag_key(shared.as_bytes())?;
        let tag = compute_tag(&key, payload)?;
        Ok(PqSeal {
            ciphertext: PqCiphertext(ciphertext.as_bytes().to_vec()),
            tag: PqTag(tag),
        })
    }

    /// Key material an auditor needs to check seals made by this keypair
    #[must_use]
    pub fn audit_key(&self) -> PqAuditKey {
        PqAuditKey {
            public: self.public.clone(),
            secret: self.secret.clone(),
        }
    }
}

impl fmt::Debug for PqKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PqKeyPair")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Kyber key material that can re-derive and check seal tags
///
/// Checking a seal requires decapsulation, and decapsulation requires the
/// Kyber secret key, so this is the post-quantum half of a trust anchor.
/// It must be distributed only to parties trusted to verify, never
/// published.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(try_from = "AuditKeyRepr")]
pub struct PqAuditKey {
    #[zeroize(skip)]
    public: PqPublicKey,
    #[serde(with = "hex_vec")]
    secret: Vec<u8>,
}

#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
struct AuditKeyRepr {
    #[serde(with = "hex_vec")]
    public: Vec<u8>,
    #[serde(with = "hex_vec")]
    secret: Vec<u8>,
}

impl TryFrom<AuditKeyRepr> for PqAuditKey {
    type Error = SealError;

    fn try_from(repr: AuditKeyRepr) -> Result<Self, Self::Error> {
        Self::from_bytes(&repr.public, &repr.secret)
    }
}

impl PqAuditKey {
    /// Restore an audit key from raw key bytes
    ///
    /// # Errors
    ///
    /// Same checks as [`PqKeyPair::from_bytes`]
    pub fn from_bytes(public: &[u8], secret: &[u8]) -> Result<Self, SealError> {
        let pair = PqKeyPair::from_bytes(public, secret)?;
        Ok(pair.audit_key())
    }

    /// Public key whose seals this key checks
    #[must_use]
    pub fn public_key(&self) -> &PqPublicKey {
        &self.public
    }

    /// Check a seal over `payload`
    ///
    /// The tag comparison runs in constant time.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::TagMismatch`] if the tag does not verify, or a
    /// format error if the ciphertext or key is malformed
    pub fn verify(&self, payload: &[u8], ciphertext: &PqCiphertext, tag: &PqTag) -> Result<(), SealError> {
        let sk = kyber768::SecretKey::from_bytes(&self.secret).map_err(|_| SealError::InvalidSecretKey)?;
        let ct = kyber768::Ciphertext::from_bytes(&ciphertext.0).map_err(|_| SealError::InvalidCiphertext)?;
        let shared = kyber768::decapsulate(&ct, &sk);
        let key = derive_tag_key(shared.as_bytes())?;

        let mut mac = HmacSha256::new_from_slice(&key[..]).map_err(|_| SealError::KeyDerivation)?;
        mac.update(payload);
        mac.verify_slice(&tag.0).map_err(|_| SealError::TagMismatch)
    }
}

impl fmt::Debug for PqAuditKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PqAuditKey")
            .field("public", &self.public)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// HKDF-SHA256 (RFC 5869) producing one 32-byte block
fn derive_tag_key(shared_secret: &[u8]) -> Result<Zeroizing<[u8; 32]>, SealError> {
    let mut extract = HmacSha256::new_from_slice(SEAL_SALT).map_err(|_| SealError::KeyDerivation)?;
    extract.update(shared_secret);
    let prk = Zeroizing::new(<[u8; 32]>::from(extract.finalize().into_bytes()));

    let mut expand = HmacSha256::new_from_slice(&prk[..]).map_err(|_| SealError::KeyDerivation)?;
    expand.update(SEAL_INFO);
    expand.update(&[1u8]);
    Ok(Zeroizing::new(<[u8; 32]>::from(expand.finalize().into_bytes())))
}

fn compute_tag(key: &[u8; 32], payload: &[u8]) -> Result<[u8; TAG_LEN], SealError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SealError::KeyDerivation)?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().into())
}

/// Seal-related errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SealError {
    /// Public key bytes are not a Kyber768 key
    #[error("invalid Kyber768 public key")]
    InvalidPublicKey,
    /// Secret key bytes are not a Kyber768 key
    #[error("invalid Kyber768 secret key")]
    InvalidSecretKey,
    /// Ciphertext bytes are not a Kyber768 ciphertext
    #[error("invalid Kyber768 ciphertext")]
    InvalidCiphertext,
    /// Public key does not belong to the secret key
    #[error("Kyber768 public key does not match secret key")]
    KeyMismatch,
    /// HMAC key setup failed
    #[error("key derivation failed")]
    KeyDerivation,
    /// Tag does not match the payload
    #[error("seal tag mismatch")]
    TagMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_verify() {
        let pair = PqKeyPair::generate();
        let seal = pair.seal(b"payload").unwrap();
        assert_eq!(pair.audit_key().verify(b"payload", &seal.ciphertext, &seal.tag), Ok(()));
    }

    #[test]
    fn test_verify_rejects_other_payload() {
        let pair = PqKeyPair::generate();
        let seal = pair.seal(b"payload").unwrap();
        assert_eq!(
            pair.audit_key().verify(b"payload?", &seal.ciphertext, &seal.tag),
            Err(SealError::TagMismatch)
        );
    }

    #[test]
    fn test_verify_rejects_other_keypair() {
        let seal = PqKeyPair::generate().seal(b"payload").unwrap();
        let stranger = PqKeyPair::generate().audit_key();
        assert_eq!(
            stranger.verify(b"payload", &seal.ciphertext, &seal.tag),
            Err(SealError::TagMismatch)
        );
    }

    #[test]
    fn test_verify_rejects_tampered_tag_and_ciphertext() {
        let pair = PqKeyPair::generate();
        let audit = pair.audit_key();
        let seal = pair.seal(b"payload").unwrap();

        let mut tag = seal.tag;
        tag.0[0] ^= 1;
        assert_eq!(audit.verify(b"payload", &seal.ciphertext, &tag), Err(SealError::TagMismatch));

        let mut ciphertext = seal.ciphertext.clone();
        ciphertext.0[0] ^= 1;
        assert_eq!(audit.verify(b"payload", &ciphertext, &seal.tag), Err(SealError::TagMismatch));

        let short = PqCiphertext(vec![0u8; 16]);
        assert_eq!(audit.verify(b"payload", &short, &seal.tag), Err(SealError::InvalidCiphertext));
    }

    #[test]
    fn test_each_seal_uses_fresh_encapsulation() {
        let pair = PqKeyPair::generate();
        let a = pair.seal(b"payload").unwrap();
        let b = pair.seal(b"payload").unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.tag, b.tag);
    }

    #[test]
    fn test_from_bytes_checks_lengths() {
        let pair = PqKeyPair::generate();
        let restored = PqKeyPair::from_bytes(pair.public_key().as_bytes(), &pair.secret_bytes()).unwrap();
        assert_eq!(restored.public_key(), pair.public_key());

        assert!(matches!(
            PqKeyPair::from_bytes(&[0u8; 10], &pair.secret_bytes()),
            Err(SealError::InvalidPublicKey)
        ));
        assert!(matches!(
            PqKeyPair::from_bytes(pair.public_key().as_bytes(), &[0u8; 10]),
            Err(SealError::InvalidSecretKey)
        ));
    }

    #[test]
    fn test_from_bytes_rejects_foreign_public_key() {
        let pair = PqKeyPair::generate();
        let other = PqKeyPair::generate();
        assert!(matches!(
            PqKeyPair::from_bytes(other.public_key().as_bytes(), &pair.secret_bytes()),
            Err(SealError::KeyMismatch)
        ));
        assert!(matches!(
            PqAuditKey::from_bytes(other.public_key().as_bytes(), &pair.secret_bytes()),
            Err(SealError::KeyMismatch)
        ));
    }

    #[test]
    fn test_audit_key_deserialize_rejects_foreign_public_key() {
        let audit = PqKeyPair::generate().audit_key();
        let mut value = serde_json::to_value(&audit).unwrap();
        value["public"] = serde_json::to_value(PqKeyPair::generate().public_key()).unwrap();
        assert!(serde_json::from_value::<PqAuditKey>(value).is_err());
    }

    #[test]
    fn test_audit_key_serde_and_debug() {
        let audit = PqKeyPair::generate().audit_key();
        let json = serde_json::to_string(&audit).unwrap();
        let back: PqAuditKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back.public_key(), audit.public_key());
        assert!(format!("{audit:?}").contains("<redacted>"));
    }
}
