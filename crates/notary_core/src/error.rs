//! Core error types for NOTARY.

use std::fmt;

/// Metadata could not be brought into canonical form.
///
/// Raised before anything is hashed; the encoder never drops, coerces or
/// reorders a field to get past one of these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// A value whose type the canonical form cannot represent
    #[error("unsupported metadata value at `{path}`: {kind}")]
    UnsupportedValue {
        /// Dotted path of the offending field
        path: String,
        /// Type that was rejected
        kind: &'static str,
    },

    /// NaN or an infinity
    #[error("non-finite number at `{path}`")]
    NonFiniteNumber {
        /// Dotted path of the offending field
        path: String,
    },

    /// String (or key) starting with a byte-order mark
    #[error("byte-order mark in string at `{path}`")]
    ByteOrderMark {
        /// Dotted path of the offending field
        path: String,
    },
}

impl EncodingError {
    /// Path of the field that failed to encode
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::UnsupportedValue { path, .. }
            | Self::NonFiniteNumber { path }
            | Self::ByteOrderMark { path } => path,
        }
    }
}

/// Error parsing metadata documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Metadata is not canonicalizable
    Encoding(EncodingError),

    /// Input is not well-formed JSON
    ParseError {
        /// Parser message
        message: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding(err) => write!(f, "Encoding error: {}", err),
            Self::ParseError { message } => write!(f, "Parse error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encoding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<EncodingError> for CoreError {
    fn from(err: EncodingError) -> Self {
        Self::Encoding(err)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_from_json() {
        let err: CoreError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, CoreError::ParseError { .. }));
        assert!(err.to_string().starts_with("Parse error:"));
    }

    #[test]
    fn test_encoding_error_path() {
        let err = EncodingError::UnsupportedValue {
            path: "device.thumbnail".to_string(),
            kind: "bytes",
        };
        assert_eq!(err.path(), "device.thumbnail");
        assert!(err.to_string().contains("bytes"));

        let core: CoreError = err.into();
        assert!(matches!(core, CoreError::Encoding(_)));
    }
}
