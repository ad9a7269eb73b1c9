//! NOTARY Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Everything that ends up inside a certificate is defined here together with
//! the canonical encoding that makes content digests reproducible across
//! platforms.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod error;
pub mod hash;
pub mod metadata;
pub mod time;
pub mod version;

// Re-exports
pub use canonical::{CanonicalEncoder, DELIMITER};
pub use error::{CoreError, EncodingError};
pub use hash::{CanonicalDigest, HashError};
pub use metadata::{MetaValue, Metadata};
pub use time::Timestamp;
pub use version::{Version, VersionError};
