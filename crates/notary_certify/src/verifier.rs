//! Independent verification of certificates.
//!
//! Every claim a certificate makes is re-derived: the digest from the
//! caller's content and metadata, the quorum from the recorded counts, and
//! both signatures from key material the caller trusts. The only keys used
//! are the ones in the [`TrustAnchor`]; a certificate never vouches for
//! itself unless the caller builds an anchor from it on purpose.

use crate::certificate::Certificate;
use crate::config::VerifierConfig;
use crate::keys::HybridKeyManager;
use crate::seal::{PqAuditKey, SealError};
use crate::signature::{PublicKeyBytes, Verifier as SignatureVerifier};
use notary_core::{CanonicalEncoder, Metadata, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Keys the verifier trusts, obtained out of band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustAnchor {
    classical: PublicKeyBytes,
    pq: PqAuditKey,
}

impl TrustAnchor {
    /// Anchor from independently obtained keys
    #[must_use]
    pub fn new(classical: PublicKeyBytes, pq: PqAuditKey) -> Self {
        Self { classical, pq }
    }

    /// Anchor for certificates issued by `manager`
    #[must_use]
    pub fn for_manager(manager: &HybridKeyManager) -> Self {
        Self {
            classical: manager.public_keys().classical,
            pq: manager.audit_key(),
        }
    }

    /// Trust the Ed25519 key embedded in the certificate itself
    ///
    /// Only proves the certificate is internally consistent; anybody can
    /// mint a certificate that passes with its own embedded key.
    #[must_use]
    pub fn embedded(certificate: &Certificate, pq: PqAuditKey) -> Self {
        Self {
            classical: *certificate.classical_public_key(),
            pq,
        }
    }

    /// Trusted Ed25519 key
    #[must_use]
    pub fn classical_key(&self) -> &PublicKeyBytes {
        &self.classical
    }

    /// Trusted Kyber audit key
    #[must_use]
    pub fn pq_key(&self) -> &PqAuditKey {
        &self.pq
    }

    fn matches(&self, certificate: &Certificate) -> bool {
        self.classical == *certificate.classical_public_key() && self.pq.public_key() == certificate.pq_public_key()
    }
}

/// Why a check failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Recomputed digest differs from the certified one
    DigestMismatch,
    /// Supplied metadata cannot be canonicalized
    MetadataNotCanonical,
    /// Certificate schema is not readable by this build
    UnsupportedVersion,
    /// Recorded agreeing count is below the recorded quorum
    QuorumInsufficientAtIssuance,
    /// Instant lies too far ahead of the verifier's clock
    TimestampInFuture,
    /// Instant is older than the configured maximum age
    TimestampTooOld,
    /// Ed25519 signature does not verify under the trusted key
    ClassicalSignatureInvalid,
    /// Seal tag does not verify under the trusted audit key
    PqTagInvalid,
    /// Trusted keys differ from the keys embedded in the certificate
    TrustAnchorMismatch,
}

impl FailureReason {
    /// Stable machine-readable code
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::DigestMismatch => "digest-mismatch",
            Self::MetadataNotCanonical => "metadata-not-canonical",
            Self::UnsupportedVersion => "unsupported-version",
            Self::QuorumInsufficientAtIssuance => "quorum-insufficient-at-issuance",
            Self::TimestampInFuture => "timestamp-in-future",
            Self::TimestampTooOld => "timestamp-too-old",
            Self::ClassicalSignatureInvalid => "classical-signature-invalid",
            Self::PqTagInvalid => "pq-tag-invalid",
            Self::TrustAnchorMismatch => "trust-anchor-mismatch",
        }
    }

    /// True when the failure points at the verifying environment (for
    /// example the wrong trust anchor) rather than at the certificate
    #[must_use]
    pub const fn is_environment_problem(self) -> bool {
        matches!(self, Self::TrustAnchorMismatch | Self::TimestampInFuture)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of one verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Content and metadata reproduce the certified digest
    pub integrity: bool,
    /// Quorum was met at issuance and the instant is plausible now
    pub time_plausible: bool,
    /// Both signatures verify under the trust anchor
    pub authentic: bool,
    /// Logical AND of the three checks
    pub valid: bool,
    /// Every failed condition, in check order
    pub reasons: Vec<FailureReason>,
    /// Verifier clock reading used for the time checks
    pub verified_at: Timestamp,
}

impl VerificationReport {
    /// Convert into a `Result`, carrying the reasons on failure
    ///
    /// # Errors
    ///
    /// Returns [`VerificationFailure`] if any check failed
    pub fn into_result(self) -> Result<(), VerificationFailure> {
        if self.valid {
            Ok(())
        } else {
            Err(VerificationFailure { reasons: self.reasons })
        }
    }

    /// One-line human summary
    #[must_use]
    pub fn summary(&self) -> String {
        let mark = |ok: bool| if ok { "ok" } else { "FAILED" };
        let mut line = format!(
            "Verification {}: integrity {}, time {}, authenticity {}",
            if self.valid { "PASSED" } else { "FAILED" },
            mark(self.integrity),
            mark(self.time_plausible),
            mark(self.authentic),
        );
        if !self.reasons.is_empty() {
            let codes: Vec<&str> = self.reasons.iter().map(|r| r.code()).collect();
            line.push_str(&format!(" [{}]", codes.join(", ")));
        }
        line
    }
}

/// A failed verification with every reason attached
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("verification failed: {}", join_codes(.reasons))]
pub struct VerificationFailure {
    /// Failed conditions
    pub reasons: Vec<FailureReason>,
}

fn join_codes(reasons: &[FailureReason]) -> String {
    reasons.iter().map(|r| r.code()).collect::<Vec<_>>().join(", ")
}

/// Checks certificates against content, metadata and a trust anchor
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    config: VerifierConfig,
}

impl Verifier {
    /// Create a verifier with the given limits
    #[must_use]
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Limits in force
    #[must_use]
    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify against the local clock
    #[must_use]
    pub fn verify(
        &self,
        content: &[u8],
        metadata: &Metadata,
        certificate: &Certificate,
        anchor: &TrustAnchor,
    ) -> VerificationReport {
        self.verify_at(content, metadata, certificate, anchor, Timestamp::now())
    }

    /// Verify as if the clock read `now`
    #[must_use]
    pub fn verify_at(
        &self,
        content: &[u8],
        metadata: &Metadata,
        certificate: &Certificate,
        anchor: &TrustAnchor,
        now: Timestamp,
    ) -> VerificationReport {
        let mut reasons = Vec::new();
        let integrity = match CanonicalEncoder::encode(metadata, content) {
            Ok(digest) => self.check_integrity(&digest, certificate, &mut reasons),
            Err(e) => {
                debug!(error = %e, "metadata rejected during verification");
                reasons.push(FailureReason::MetadataNotCanonical);
                false
            }
        };
        self.finish(integrity, certificate, anchor, now, reasons)
    }

    /// Verify using the canonical metadata stored in the certificate
    ///
    /// For callers that hold the content but not the original metadata.
    #[must_use]
    pub fn verify_with_embedded_metadata(
        &self,
        content: &[u8],
        certificate: &Certificate,
        anchor: &TrustAnchor,
    ) -> VerificationReport {
        let mut reasons = Vec::new();
        let digest = CanonicalEncoder::digest_encoded(certificate.metadata_digest_inputs().as_bytes(), content);
        let integrity = self.check_integrity(&digest, certificate, &mut reasons);
        self.finish(integrity, certificate, anchor, Timestamp::now(), reasons)
    }

    fn check_integrity(
        &self,
        digest: &notary_core::CanonicalDigest,
        certificate: &Certificate,
        reasons: &mut Vec<FailureReason>,
    ) -> bool {
        let mut ok = true;
        if !Version::CERTIFICATE.can_read(&certificate.version()) {
            reasons.push(FailureReason::UnsupportedVersion);
            ok = false;
        }
        if digest != certificate.content_digest() {
            reasons.push(FailureReason::DigestMismatch);
            ok = false;
        }
        ok
    }

    fn check_time(&self, certificate: &Certificate, now: Timestamp, reasons: &mut Vec<FailureReason>) -> bool {
        let ts = certificate.timestamp();
        let mut ok = true;

        let retained = ts.samples().iter().filter(|s| s.retained).count();
        let audit_consistent = ts.samples().is_empty() || retained == ts.agreeing_count() as usize;
        if !ts.meets_quorum() || !audit_consistent {
            reasons.push(FailureReason::QuorumInsufficientAtIssuance);
            ok = false;
        }

        let ahead = ts.instant().nanos_since(&now);
        if ahead > self.config.max_future_skew().as_nanos() as i128 {
            reasons.push(FailureReason::TimestampInFuture);
            ok = false;
        }

        if let Some(max_age) = self.config.max_age() {
            if now.nanos_since(&ts.instant()) > max_age.as_nanos() as i128 {
                reasons.push(FailureReason::TimestampTooOld);
                ok = false;
            }
        }
        ok
    }

    fn check_authenticity(&self, certificate: &Certificate, anchor: &TrustAnchor, reasons: &mut Vec<FailureReason>) -> bool {
        let payload = certificate.signing_payload();
        let mut ok = true;

        if !anchor.matches(certificate) {
            reasons.push(FailureReason::TrustAnchorMismatch);
            ok = false;
        }

        let classical_ok = SignatureVerifier::new(anchor.classical_key())
            .map(|v| v.verify(&payload, certificate.classical_signature()))
            .unwrap_or(false);
        if !classical_ok {
            reasons.push(FailureReason::ClassicalSignatureInvalid);
            ok = false;
        }

        match anchor
            .pq_key()
            .verify(&payload, certificate.pq_ciphertext(), certificate.pq_tag())
        {
            Ok(()) => {}
            Err(e) => {
                if e != SealError::TagMismatch {
                    debug!(error = %e, "post-quantum seal malformed");
                }
                reasons.push(FailureReason::PqTagInvalid);
                ok = false;
            }
        }
        ok
    }

    fn finish(
        &self,
        integrity: bool,
        certificate: &Certificate,
        anchor: &TrustAnchor,
        now: Timestamp,
        mut reasons: Vec<FailureReason>,
    ) -> VerificationReport {
        let time_plausible = self.check_time(certificate, now, &mut reasons);
        let authentic = self.check_authenticity(certificate, anchor, &mut reasons);
        let valid = integrity && time_plausible && authentic;

        if valid {
            info!(
                digest = %certificate.content_digest().short(),
                key_id = certificate.key_id(),
                "certificate verified"
            );
        } else {
            warn!(
                digest = %certificate.content_digest().short(),
                key_id = certificate.key_id(),
                reasons = %join_codes(&reasons),
                "certificate verification failed"
            );
        }

        VerificationReport {
            integrity,
            time_plausible,
            authentic,
            valid,
            reasons,
            verified_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::tests::sample_certificate;

    fn metadata() -> Metadata {
        Metadata::new().with("case", "A-17").with("pages", 3)
    }

    #[tokio::test]
    async fn test_valid_certificate_passes_all_checks() {
        let manager = HybridKeyManager::generate();
        let cert = sample_certificate(&manager, b"evidence", &metadata()).await;

        let report = Verifier::default().verify(b"evidence", &metadata(), &cert, &TrustAnchor::for_manager(&manager));
        assert!(report.valid, "{}", report.summary());
        assert!(report.integrity && report.time_plausible && report.authentic);
        assert!(report.reasons.is_empty());
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_content_bit_flip_fails_integrity_only() {
        let manager = HybridKeyManager::generate();
        let cert = sample_certificate(&manager, b"evidence", &metadata()).await;

        let report = Verifier::default().verify(b"evidencf", &metadata(), &cert, &TrustAnchor::for_manager(&manager));
        assert!(!report.integrity);
        assert!(report.time_plausible);
        assert!(report.authentic);
        assert!(!report.valid);
        assert_eq!(report.reasons, vec![FailureReason::DigestMismatch]);
    }

    #[tokio::test]
    async fn test_metadata_change_fails_integrity() {
        let manager = HybridKeyManager::generate();
        let cert = sample_certificate(&manager, b"evidence", &metadata()).await;
        let altered = metadata().with("pages", 4);

        let report = Verifier::default().verify(b"evidence", &altered, &cert, &TrustAnchor::for_manager(&manager));
        assert!(!report.valid);
        assert_eq!(report.reasons, vec![FailureReason::DigestMismatch]);
    }

    #[tokio::test]
    async fn test_uncanonical_metadata_reported() {
        let manager = HybridKeyManager::generate();
        let cert = sample_certificate(&manager, b"evidence", &metadata()).await;
        let bad = metadata().with("blob", notary_core::MetaValue::Bytes(vec![1, 2]));

        let report = Verifier::default().verify(b"evidence", &bad, &cert, &TrustAnchor::for_manager(&manager));
        assert!(!report.integrity);
        assert!(report.reasons.contains(&FailureReason::MetadataNotCanonical));
    }

    #[tokio::test]
    async fn test_wrong_anchor_fails_authenticity_not_integrity() {
        let manager = HybridKeyManager::generate();
        let cert = sample_certificate(&manager, b"evidence", &metadata()).await;
        let stranger = HybridKeyManager::generate();

        let report = Verifier::default().verify(b"evidence", &metadata(), &cert, &TrustAnchor::for_manager(&stranger));
        assert!(report.integrity);
        assert!(!report.authentic);
        assert!(!report.valid);
        assert!(report.reasons.contains(&FailureReason::TrustAnchorMismatch));
        assert!(report.reasons.contains(&FailureReason::ClassicalSignatureInvalid));
        assert!(report.reasons.contains(&FailureReason::PqTagInvalid));
        assert!(FailureReason::TrustAnchorMismatch.is_environment_problem());
        assert!(!FailureReason::DigestMismatch.is_environment_problem());
    }

    #[tokio::test]
    async fn test_forged_certificate_cannot_vouch_for_itself() {
        let issuer = HybridKeyManager::generate();
        let forger = HybridKeyManager::generate();
        let forged = sample_certificate(&forger, b"evidence", &metadata()).await;

        let report = Verifier::default().verify(b"evidence", &metadata(), &forged, &TrustAnchor::for_manager(&issuer));
        assert!(!report.valid);

        // Opting in to the embedded key only proves internal consistency
        let embedded = TrustAnchor::embedded(&forged, forger.audit_key());
        assert!(Verifier::default().verify(b"evidence", &metadata(), &forged, &embedded).valid);
    }

    #[tokio::test]
    async fn test_future_timestamp_rejected() {
        let manager = HybridKeyManager::generate();
        let cert = sample_certificate(&manager, b"evidence", &metadata()).await;
        let anchor = TrustAnchor::for_manager(&manager);
        let verifier = Verifier::default();

        let early = cert.timestamp().instant().sub(std::time::Duration::from_secs(60));
        let report = verifier.verify_at(b"evidence", &metadata(), &cert, &anchor, early);
        assert!(!report.time_plausible);
        assert_eq!(report.reasons, vec![FailureReason::TimestampInFuture]);

        let within_skew = cert.timestamp().instant().sub(std::time::Duration::from_secs(2));
        assert!(verifier.verify_at(b"evidence", &metadata(), &cert, &anchor, within_skew).valid);
    }

    #[tokio::test]
    async fn test_max_age_rejects_old_certificate() {
        let manager = HybridKeyManager::generate();
        let cert = sample_certificate(&manager, b"evidence", &metadata()).await;
        let anchor = TrustAnchor::for_manager(&manager);
        let verifier = Verifier::new(VerifierConfig::default().with_max_age_secs(3_600));

        let later = cert.timestamp().instant().add(std::time::Duration::from_secs(7_200));
        let report = verifier.verify_at(b"evidence", &metadata(), &cert, &anchor, later);
        assert_eq!(report.reasons, vec![FailureReason::TimestampTooOld]);
    }

    #[tokio::test]
    async fn test_inflated_quorum_in_json_fails() {
        let manager = HybridKeyManager::generate();
        let cert = sample_certificate(&manager, b"evidence", &metadata()).await;
        let mut value: serde_json::Value = serde_json::from_str(&cert.to_json().unwrap()).unwrap();
        value["timestamp"]["quorum_required"] = serde_json::json!(50);
        let tampered = Certificate::from_json(&value.to_string()).unwrap();

        let report = Verifier::default().verify(b"evidence", &metadata(), &tampered, &TrustAnchor::for_manager(&manager));
        assert!(!report.time_plausible);
        assert!(!report.authentic);
        assert!(report.reasons.contains(&FailureReason::QuorumInsufficientAtIssuance));
    }

    #[tokio::test]
    async fn test_embedded_metadata_verification() {
        let manager = HybridKeyManager::generate();
        let cert = sample_certificate(&manager, b"evidence", &metadata()).await;
        let anchor = TrustAnchor::for_manager(&manager);
        let verifier = Verifier::default();

        assert!(verifier.verify_with_embedded_metadata(b"evidence", &cert, &anchor).valid);
        assert!(!verifier.verify_with_embedded_metadata(b"tampered", &cert, &anchor).integrity);
    }

    #[test]
    fn test_failure_display_lists_codes() {
        let failure = VerificationFailure {
            reasons: vec![FailureReason::DigestMismatch, FailureReason::PqTagInvalid],
        };
        assert_eq!(failure.to_string(), "verification failed: digest-mismatch, pq-tag-invalid");
    }
}
