//! Time source abstraction.

use async_trait::async_trait;
use notary_core::Timestamp;

/// Errors reported by a single time source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// No answer within the per-source timeout
    #[error("no response within {0}ms")]
    Timeout(u64),

    /// Socket or name resolution failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Malformed or unexpected response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Server asked us to go away (NTP kiss-o'-death)
    #[error("kiss-o'-death from server: {0}")]
    KissOfDeath(String),
}

/// A remote clock that can be asked for the current time
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Stable identifier recorded in certificates (usually a hostname)
    fn id(&self) -> &str;

    /// Ask the source for its current time
    ///
    /// Round-trip latency is measured by the caller around this call.
    async fn query(&self) -> Result<Timestamp, SourceError>;
}
