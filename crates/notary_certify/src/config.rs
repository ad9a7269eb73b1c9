//! Engine configuration.

use notary_time::ConsensusConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Verification limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// How far a certificate's instant may lie ahead of the verifier's clock
    pub max_future_skew_ms: u64,
    /// Reject certificates older than this, if set
    pub max_age_secs: Option<u64>,
}

impl VerifierConfig {
    /// Set clock-skew allowance
    #[must_use]
    pub fn with_max_future_skew_ms(mut self, skew_ms: u64) -> Self {
        self.max_future_skew_ms = skew_ms;
        self
    }

    /// Set maximum certificate age
    #[must_use]
    pub fn with_max_age_secs(mut self, max_age_secs: u64) -> Self {
        self.max_age_secs = Some(max_age_secs);
        self
    }

    /// Clock-skew allowance
    #[must_use]
    pub fn max_future_skew(&self) -> Duration {
        Duration::from_millis(self.max_future_skew_ms)
    }

    /// Maximum certificate age
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_future_skew_ms: 5_000,
            max_age_secs: None,
        }
    }
}

/// Complete engine configuration, usually read from a TOML file
///
/// ```toml
/// [consensus]
/// sources = ["time.google.com", "time.cloudflare.com", "pool.ntp.org"]
/// quorum = 2
/// tolerance_ms = 500
///
/// [verifier]
/// max_future_skew_ms = 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Time consensus settings
    pub consensus: ConsensusConfig,
    /// Verification settings
    pub verifier: VerifierConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or fails validation
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check that consensus can ever succeed with these settings
    ///
    /// # Errors
    ///
    /// Returns error on zero or unreachable quorum, or zero limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consensus
            .validate(self.consensus.sources.len())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("config I/O error: {0}")]
    Io(String),
    /// Document is not valid TOML for this schema
    #[error("config parse error: {0}")]
    Parse(String),
    /// Values can never produce a consensus
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.consensus.sources.len(), 5);
        assert_eq!(config.consensus.effective_quorum(5), 3);
        assert_eq!(config.verifier.max_future_skew(), Duration::from_secs(5));
        assert_eq!(config.verifier.max_age(), None);
    }

    #[test]
    fn test_from_toml_partial_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            [consensus]
            sources = ["a.example", "b.example", "c.example"]
            quorum = 2
            tolerance_ms = 250

            [verifier]
            max_age_secs = 86400
            "#,
        )
        .unwrap();

        assert_eq!(config.consensus.quorum, Some(2));
        assert_eq!(config.consensus.tolerance_ms, 250);
        assert_eq!(config.consensus.retries, 1);
        assert_eq!(config.verifier.max_age(), Some(Duration::from_secs(86_400)));
        assert_eq!(config.verifier.max_future_skew_ms, 5_000);
    }

    #[test]
    fn test_from_toml_rejects_unreachable_quorum() {
        let result = EngineConfig::from_toml_str(
            r#"
            [consensus]
            sources = ["a.example", "b.example"]
            quorum = 3
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_toml_rejects_zero_tolerance() {
        let result = EngineConfig::from_toml_str("[consensus]\ntolerance_ms = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_toml_rejects_malformed() {
        assert!(matches!(
            EngineConfig::from_toml_str("[consensus\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_and_render() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notary.toml");
        let config = EngineConfig::default();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        assert_eq!(EngineConfig::load(&path).unwrap(), config);
        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
