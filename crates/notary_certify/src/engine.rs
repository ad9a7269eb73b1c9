//! Certification engine.

use crate::certificate::{Certificate, CertificateError};
use crate::config::{EngineConfig, VerifierConfig};
use crate::error::CertifyError;
use crate::keys::HybridKeyManager;
use crate::verifier::{TrustAnchor, VerificationReport, Verifier};
use notary_core::{CanonicalEncoder, Metadata};
use notary_time::TimeConsensus;
use std::path::Path;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Orchestrates digest, time consensus and hybrid signing
///
/// Any failing step aborts the whole certification; there is no partially
/// signed certificate.
pub struct CertificationEngine {
    consensus: TimeConsensus,
    keys: HybridKeyManager,
    verifier: Verifier,
}

impl CertificationEngine {
    /// Create an engine from its collaborators
    #[must_use]
    pub fn new(consensus: TimeConsensus, keys: HybridKeyManager) -> Self {
        Self {
            consensus,
            keys,
            verifier: Verifier::default(),
        }
    }

    /// Create an engine querying the SNTP servers named in `config`
    ///
    /// # Errors
    ///
    /// Returns error if the consensus settings can never reach quorum
    pub fn from_config(config: &EngineConfig, keys: HybridKeyManager) -> Result<Self, CertifyError> {
        let consensus = TimeConsensus::from_config(config.consensus.clone())?;
        Ok(Self::new(consensus, keys).with_verifier_config(config.verifier.clone()))
    }

    /// Use different verification limits
    #[must_use]
    pub fn with_verifier_config(mut self, config: VerifierConfig) -> Self {
        self.verifier = Verifier::new(config);
        self
    }

    /// Signing keys
    #[must_use]
    pub fn keys(&self) -> &HybridKeyManager {
        &self.keys
    }

    /// Anchor that accepts this engine's certificates
    #[must_use]
    pub fn trust_anchor(&self) -> TrustAnchor {
        TrustAnchor::for_manager(&self.keys)
    }

    /// Certify content and metadata
    ///
    /// # Errors
    ///
    /// Returns [`CertifyError::Encoding`] for uncanonical metadata,
    /// [`CertifyError::Consensus`] when too few time sources agree, and
    /// [`CertifyError::Key`] when a signing key is unusable
    pub async fn certify(&self, content: &[u8], metadata: &Metadata) -> Result<Certificate, CertifyError> {
        self.certify_until(content, metadata, None).await
    }

    /// Certify, giving up on time consensus at `deadline`
    ///
    /// # Errors
    ///
    /// Same as [`certify`](Self::certify); an expired deadline surfaces as
    /// insufficient quorum
    #[instrument(skip_all, fields(content_len = content.len(), entries = metadata.len(), key_id = %self.keys.key_id()))]
    pub async fn certify_until(
        &self,
        content: &[u8],
        metadata: &Metadata,
        deadline: Option<Instant>,
    ) -> Result<Certificate, CertifyError> {
        let canonical = CanonicalEncoder::encode_metadata(metadata).inspect_err(|e| {
            warn!(path = e.path(), error = %e, "metadata rejected");
        })?;
        let digest = CanonicalEncoder::digest_encoded(&canonical, content);
        debug!(digest = %digest.short(), "content digest computed");

        let timestamp = self.consensus.consensus_until(deadline).await?;
        let signature = self.keys.sign(&digest, &timestamp)?;

        let certificate = Certificate::new(
            digest,
            // Canonical metadata is always UTF-8
            String::from_utf8_lossy(&canonical).into_owned(),
            timestamp,
            self.keys.public_keys(),
            signature.classical,
            signature.pq_seal.ciphertext,
            signature.pq_seal.tag,
        );

        info!(
            digest = %certificate.content_digest().short(),
            instant = %certificate.timestamp().instant(),
            agreeing = certificate.timestamp().agreeing_count(),
            queried = certificate.timestamp().sources_queried(),
            "certificate issued"
        );
        Ok(certificate)
    }

    /// Certify several items one after another
    ///
    /// Each item gets its own consensus round; a failure does not stop the
    /// remaining items.
    pub async fn certify_batch<'a, I>(&self, items: I) -> Vec<Result<Certificate, CertifyError>>
    where
        I: IntoIterator<Item = (&'a [u8], &'a Metadata)>,
    {
        let mut results = Vec::new();
        for (content, metadata) in items {
            results.push(self.certify(content, metadata).await);
        }
        let issued = results.iter().filter(|r| r.is_ok()).count();
        info!(issued, failed = results.len() - issued, "batch certification finished");
        results
    }

    /// Verify a certificate against this engine's own keys
    #[must_use]
    pub fn verify(&self, content: &[u8], metadata: &Metadata, certificate: &Certificate) -> VerificationReport {
        self.verifier.verify(content, metadata, certificate, &self.trust_anchor())
    }

    /// Verify a certificate against an externally supplied anchor
    #[must_use]
    pub fn verify_with_anchor(
        &self,
        content: &[u8],
        metadata: &Metadata,
        certificate: &Certificate,
        anchor: &TrustAnchor,
    ) -> VerificationReport {
        self.verifier.verify(content, metadata, certificate, anchor)
    }

    /// Write a certificate to a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails
    pub fn export_certificate(&self, certificate: &Certificate, path: impl AsRef<Path>) -> Result<(), CertifyError> {
        let path = path.as_ref();
        let json = certificate.to_json_pretty()?;
        std::fs::write(path, json).map_err(|e| CertificateError::Io(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "certificate exported");
        Ok(())
    }

    /// Read a certificate from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn import_certificate(&self, path: impl AsRef<Path>) -> Result<Certificate, CertifyError> {
        let path = path.as_ref();
        let json =
            std::fs::read_to_string(path).map_err(|e| CertificateError::Io(format!("{}: {e}", path.display())))?;
        Ok(Certificate::from_json(&json)?)
    }
}
