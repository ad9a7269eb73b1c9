//! NOTARY Time Consensus
//!
//! Binds evidence to a trusted instant by asking several independent time
//! sources at once and accepting only a quorum of mutually agreeing answers.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consensus;
pub mod source;
pub mod sntp;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use consensus::{ConsensusConfig, ConsensusError, ConsensusTimestamp, TimeConsensus, TimeSample};
pub use source::{SourceError, TimeSource};
pub use sntp::SntpSource;
