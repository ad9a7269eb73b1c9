//! Scripted in-memory time sources.
//!
//! Available to this crate's tests and, through the `test-util` feature, to
//! dependent crates that need deterministic consensus rounds.

use crate::source::{SourceError, TimeSource};
use async_trait::async_trait;
use notary_core::Timestamp;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Answer,
    Fail,
    Hang,
    FailTimes(u32),
}

/// A time source that answers from the local clock with a fixed skew
#[derive(Debug)]
pub struct ScriptedSource {
    id: String,
    offset_ms: i64,
    latency: Duration,
    base: Option<Timestamp>,
    behavior: Behavior,
    calls: AtomicU32,
}

impl ScriptedSource {
    /// Source that answers immediately with the local time
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            offset_ms: 0,
            latency: Duration::ZERO,
            base: None,
            behavior: Behavior::Answer,
            calls: AtomicU32::new(0),
        }
    }

    /// Report a time skewed by `offset_ms`
    #[must_use]
    pub fn with_offset_ms(mut self, offset_ms: i64) -> Self {
        self.offset_ms = offset_ms;
        self
    }

    /// Delay every answer
    #[must_use]
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency = Duration::from_millis(latency_ms);
        self
    }

    /// Report a fixed instant instead of the local clock
    #[must_use]
    pub fn with_base(mut self, base: Timestamp) -> Self {
        self.base = Some(base);
        self
    }

    /// Fail every query
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.behavior = Behavior::Fail;
        self
    }

    /// Never answer
    #[must_use]
    pub fn hanging(mut self) -> Self {
        self.behavior = Behavior::Hang;
        self
    }

    /// Fail the first `times` queries, then answer
    #[must_use]
    pub fn failing_times(mut self, times: u32) -> Self {
        self.behavior = Behavior::FailTimes(times);
        self
    }

    /// Number of queries received so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeSource for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn query(&self) -> Result<Timestamp, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Fail => return Err(SourceError::Io("scripted failure".to_string())),
            Behavior::FailTimes(n) if call < n => {
                return Err(SourceError::Io(format!("scripted failure {}", call + 1)));
            }
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Answer | Behavior::FailTimes(_) => {}
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let base = self.base.unwrap_or_else(Timestamp::now);
        Ok(base.offset_nanos(i128::from(self.offset_ms) * 1_000_000))
    }
}
