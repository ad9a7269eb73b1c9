//! Certification error type.

use crate::certificate::CertificateError;
use crate::config::ConfigError;
use crate::keys::KeyError;
use notary_core::EncodingError;
use notary_time::ConsensusError;

/// Result type for certification
pub type CertifyResult<T> = Result<T, CertifyError>;

/// Any failure that aborts a certification
///
/// No certificate exists when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertifyError {
    /// Metadata could not be canonicalized
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// Too few agreeing time sources
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Signing keys missing or corrupt
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Certificate could not be serialized, parsed or stored
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CertifyError {
    /// True for [`ConsensusError::InsufficientQuorum`]
    #[must_use]
    pub fn is_insufficient_quorum(&self) -> bool {
        matches!(self, Self::Consensus(ConsensusError::InsufficientQuorum { .. }))
    }

    /// True for [`KeyError::KeyUnavailable`]
    #[must_use]
    pub fn is_key_unavailable(&self) -> bool {
        matches!(self, Self::Key(KeyError::KeyUnavailable { .. }))
    }
}
