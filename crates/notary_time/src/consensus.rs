//! Quorum time consensus across independent sources.
//!
//! Every source is queried from its own task. Results flow back over a
//! channel to a single collector, which stops as soon as a quorum of
//! mutually agreeing samples is in hand, every source has answered, or the
//! deadline passes. The decision itself is a pure merge over the collected
//! samples: take the median, drop everything farther than `tolerance` from
//! it, and require `quorum` survivors. The consensus instant is the median
//! of the survivors.

use crate::sntp::{SntpSource, DEFAULT_SERVERS};
use crate::source::{SourceError, TimeSource};
use notary_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Consensus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// NTP servers (`host` or `host:port`) used by [`TimeConsensus::from_config`]
    pub sources: Vec<String>,
    /// Minimum agreeing samples; `None` means a strict majority of sources
    pub quorum: Option<usize>,
    /// Maximum distance from the median for a sample to count as agreeing
    pub tolerance_ms: u64,
    /// Timeout for a single query attempt
    pub per_source_timeout_ms: u64,
    /// Deadline for the whole consensus round
    pub overall_timeout_ms: u64,
    /// Extra attempts per source after the first one fails
    pub retries: u32,
}

impl ConsensusConfig {
    /// Create a config for the given servers with default limits
    #[must_use]
    pub fn new(sources: Vec<String>) -> Self {
        Self {
            sources,
            ..Self::default()
        }
    }

    /// Set quorum size
    #[must_use]
    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = Some(quorum);
        self
    }

    /// Set agreement tolerance
    #[must_use]
    pub fn with_tolerance_ms(mut self, tolerance_ms: u64) -> Self {
        self.tolerance_ms = tolerance_ms;
        self
    }

    /// Set per-source timeout
    #[must_use]
    pub fn with_per_source_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.per_source_timeout_ms = timeout_ms;
        self
    }

    /// Set overall timeout
    #[must_use]
    pub fn with_overall_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.overall_timeout_ms = timeout_ms;
        self
    }

    /// Set retry budget
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Quorum applied to `source_count` sources
    #[must_use]
    pub fn effective_quorum(&self, source_count: usize) -> usize {
        self.quorum.unwrap_or(source_count / 2 + 1)
    }

    /// Agreement tolerance
    #[must_use]
    pub fn tolerance(&self) -> Duration {
        Duration::from_millis(self.tolerance_ms)
    }

    /// Check limits against the number of sources that will be queried
    ///
    /// # Errors
    ///
    /// Returns error if quorum is zero or unreachable, or a limit is zero
    pub fn validate(&self, source_count: usize) -> Result<(), ConsensusError> {
        let quorum = self.effective_quorum(source_count);
        if source_count == 0 {
            return Err(ConsensusError::InvalidConfig("no time sources configured".to_string()));
        }
        if quorum == 0 {
            return Err(ConsensusError::InvalidConfig("quorum must be at least 1".to_string()));
        }
        if quorum > source_count {
            return Err(ConsensusError::InvalidConfig(format!(
                "quorum {quorum} exceeds {source_count} configured sources"
            )));
        }
        if self.tolerance_ms == 0 || self.per_source_timeout_ms == 0 || self.overall_timeout_ms == 0 {
            return Err(ConsensusError::InvalidConfig(
                "tolerance and timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            sources: DEFAULT_SERVERS.iter().map(|s| (*s).to_string()).collect(),
            quorum: None,
            tolerance_ms: 500,
            per_source_timeout_ms: 3_000,
            overall_timeout_ms: 10_000,
            retries: 1,
        }
    }
}

/// One source's answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSample {
    /// Source identifier
    pub source: String,
    /// Instant reported by the source
    pub reported: Timestamp,
    /// Measured round-trip latency in nanoseconds
    pub rtt_nanos: u64,
    /// Whether the sample survived outlier rejection
    pub retained: bool,
}

impl TimeSample {
    /// Create a sample that has not been through outlier rejection yet
    #[must_use]
    pub fn new(source: impl Into<String>, reported: Timestamp, rtt: Duration) -> Self {
        Self {
            source: source.into(),
            reported,
            rtt_nanos: u64::try_from(rtt.as_nanos()).unwrap_or(u64::MAX),
            retained: false,
        }
    }

    /// Reported instant corrected by half the round trip
    #[must_use]
    pub fn adjusted(&self) -> Timestamp {
        self.reported.offset_nanos(i128::from(self.rtt_nanos / 2))
    }

    fn canonical_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.source.len() as u64).to_be_bytes());
        out.extend_from_slice(self.source.as_bytes());
        out.extend_from_slice(&self.reported.canonical_bytes());
        out.extend_from_slice(&self.rtt_nanos.to_be_bytes());
        out.push(u8::from(self.retained));
    }
}

/// A trusted instant agreed on by a quorum of sources
///
/// Only [`TimeConsensus`] builds these; deserialized copies are re-checked
/// by certificate verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusTimestamp {
    instant: Timestamp,
    sources_queried: u32,
    agreeing_count: u32,
    quorum_required: u32,
    tolerance_ms: u64,
    spread_nanos: u64,
    samples: Vec<TimeSample>,
}

impl ConsensusTimestamp {
    /// Consensus instant
    #[must_use]
    pub fn instant(&self) -> Timestamp {
        self.instant
    }

    /// Number of sources asked
    #[must_use]
    pub fn sources_queried(&self) -> u32 {
        self.sources_queried
    }

    /// Number of samples within tolerance of the median
    #[must_use]
    pub fn agreeing_count(&self) -> u32 {
        self.agreeing_count
    }

    /// Quorum in force when the timestamp was issued
    #[must_use]
    pub fn quorum_required(&self) -> u32 {
        self.quorum_required
    }

    /// Agreement tolerance in force when the timestamp was issued
    #[must_use]
    pub fn tolerance(&self) -> Duration {
        Duration::from_millis(self.tolerance_ms)
    }

    /// Standard deviation of the agreeing samples
    #[must_use]
    pub fn spread(&self) -> Duration {
        Duration::from_nanos(self.spread_nanos)
    }

    /// Every sample collected, retained or not
    #[must_use]
    pub fn samples(&self) -> &[TimeSample] {
        &self.samples
    }

    /// Whether the recorded counts satisfy the recorded quorum
    #[must_use]
    pub fn meets_quorum(&self) -> bool {
        self.quorum_required > 0
            && self.agreeing_count >= self.quorum_required
            && self.agreeing_count <= self.sources_queried
    }

    /// Fixed-layout encoding of every field, used in signed payloads
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Timestamp::ENCODED_LEN + 36 + self.samples.len() * 40);
        out.extend_from_slice(&self.instant.canonical_bytes());
        out.extend_from_slice(&self.sources_queried.to_be_bytes());
        out.extend_from_slice(&self.agreeing_count.to_be_bytes());
        out.extend_from_slice(&self.quorum_required.to_be_bytes());
        out.extend_from_slice(&self.tolerance_ms.to_be_bytes());
        out.extend_from_slice(&self.spread_nanos.to_be_bytes());
        out.extend_from_slice(&(self.samples.len() as u64).to_be_bytes());
        for sample in &self.samples {
            sample.canonical_bytes(&mut out);
        }
        out
    }
}

/// Consensus errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    /// Too few sources answered or agreed
    #[error(
        "insufficient quorum: {agreeing} agreeing of {responded} responding ({queried} queried), {required} required"
    )]
    InsufficientQuorum {
        /// Sources asked
        queried: usize,
        /// Sources that answered in time
        responded: usize,
        /// Answers within tolerance of the median
        agreeing: usize,
        /// Quorum in force
        required: usize,
    },

    /// Configuration cannot ever reach quorum
    #[error("invalid consensus configuration: {0}")]
    InvalidConfig(String),
}

enum SourceOutcome {
    Sample(TimeSample),
    Unresponsive { source: String, error: SourceError },
}

/// Queries a fixed set of sources and derives a consensus timestamp
pub struct TimeConsensus {
    config: ConsensusConfig,
    sources: Vec<Arc<dyn TimeSource>>,
    quorum: usize,
}

impl TimeConsensus {
    /// Create a consensus over explicit sources
    ///
    /// # Errors
    ///
    /// Returns error if the configuration cannot reach quorum with these sources
    pub fn new(config: ConsensusConfig, sources: Vec<Arc<dyn TimeSource>>) -> Result<Self, ConsensusError> {
        config.validate(sources.len())?;
        let quorum = config.effective_quorum(sources.len());
        Ok(Self {
            config,
            sources,
            quorum,
        })
    }

    /// Create a consensus over the SNTP servers named in the config
    ///
    /// # Errors
    ///
    /// Returns error if the configuration cannot reach quorum
    pub fn from_config(config: ConsensusConfig) -> Result<Self, ConsensusError> {
        let sources = config
            .sources
            .iter()
            .map(|host| Arc::new(SntpSource::new(host.clone())) as Arc<dyn TimeSource>)
            .collect();
        Self::new(config, sources)
    }

    /// Quorum in force
    #[must_use]
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Run a consensus round bounded by the configured overall timeout
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::InsufficientQuorum`] if fewer than `quorum`
    /// agreeing samples are collected in time
    pub async fn consensus(&self) -> Result<ConsensusTimestamp, ConsensusError> {
        self.consensus_until(None).await
    }

    /// Run a consensus round that also stops at an external deadline
    ///
    /// # Errors
    ///
    /// Returns [`ConsensusError::InsufficientQuorum`] if fewer than `quorum`
    /// agreeing samples are collected before the earlier deadline
    #[instrument(skip(self, deadline), fields(sources = self.sources.len(), quorum = self.quorum))]
    pub async fn consensus_until(&self, deadline: Option<Instant>) -> Result<ConsensusTimestamp, ConsensusError> {
        let queried = self.sources.len();
        let overall = Instant::now() + Duration::from_millis(self.config.overall_timeout_ms);
        let deadline = deadline.map_or(overall, |d| d.min(overall));
        let tolerance = self.config.tolerance();

        let (tx, mut rx) = mpsc::channel(queried);
        let mut tasks = JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            let tx = tx.clone();
            let per_attempt = Duration::from_millis(self.config.per_source_timeout_ms);
            let retries = self.config.retries;
            tasks.spawn(async move {
                let outcome = query_with_retry(source.as_ref(), per_attempt, retries).await;
                // The collector may already have decided
                tx.send(outcome).await.ok();
            });
        }
        drop(tx);

        let mut samples = Vec::with_capacity(queried);
        let mut answered = 0usize;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(SourceOutcome::Sample(sample))) => {
                    answered += 1;
                    debug!(source = %sample.source, reported = %sample.reported, rtt_ns = sample.rtt_nanos, "time sample");
                    samples.push(sample);
                    if samples.len() >= self.quorum && agreeing_count(&samples, tolerance) >= self.quorum {
                        break;
                    }
                }
                Ok(Some(SourceOutcome::Unresponsive { source, error })) => {
                    answered += 1;
                    warn!(source = %source, error = %error, "time source unresponsive");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(answered, queried, "consensus deadline elapsed");
                    break;
                }
            }
        }

        let stragglers = queried - answered;
        if stragglers > 0 {
            debug!(stragglers, "abandoning outstanding time queries");
        }
        tasks.abort_all();

        let result = merge(samples, queried, self.quorum, tolerance);
        match &result {
            Ok(ts) => info!(
                instant = %ts.instant,
                agreeing = ts.agreeing_count,
                queried,
                spread_ns = ts.spread_nanos,
                "time consensus reached"
            ),
            Err(e) => warn!(error = %e, "time consensus failed"),
        }
        result
    }
}

async fn query_with_retry(source: &dyn TimeSource, per_attempt: Duration, retries: u32) -> SourceOutcome {
    let mut last_error = SourceError::Timeout(per_attempt.as_millis() as u64);
    for attempt in 0..=retries {
        let started = Instant::now();
        match tokio::time::timeout(per_attempt, source.query()).await {
            Ok(Ok(reported)) => {
                return SourceOutcome::Sample(TimeSample::new(source.id(), reported, started.elapsed()));
            }
            Ok(Err(error)) => {
                debug!(source = source.id(), attempt, error = %error, "time query failed");
                last_error = error;
            }
            Err(_) => {
                debug!(source = source.id(), attempt, "time query timed out");
                last_error = SourceError::Timeout(per_attempt.as_millis() as u64);
            }
        }
    }
    SourceOutcome::Unresponsive {
        source: source.id().to_string(),
        error: last_error,
    }
}

fn median(sorted: &[i128]) -> i128 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]).div_euclid(2)
    }
}

fn sorted_adjusted(samples: &[TimeSample]) -> Vec<i128> {
    let mut values: Vec<i128> = samples.iter().map(|s| s.adjusted().as_unix_nanos()).collect();
    values.sort_unstable();
    values
}

fn within(value: i128, center: i128, tolerance: Duration) -> bool {
    (value - center).unsigned_abs() <= tolerance.as_nanos()
}

fn agreeing_count(samples: &[TimeSample], tolerance: Duration) -> usize {
    if samples.is_empty() {
        return 0;
    }
    let values = sorted_adjusted(samples);
    let center = median(&values);
    values.iter().filter(|v| within(**v, center, tolerance)).count()
}

/// Outlier rejection and quorum decision over collected samples
pub(crate) fn merge(
    mut samples: Vec<TimeSample>,
    queried: usize,
    quorum: usize,
    tolerance: Duration,
) -> Result<ConsensusTimestamp, ConsensusError> {
    let responded = samples.len();
    let insufficient = |agreeing| ConsensusError::InsufficientQuorum {
        queried,
        responded,
        agreeing,
        required: quorum,
    };
    if responded < quorum || responded == 0 {
        return Err(insufficient(0));
    }

    let center = median(&sorted_adjusted(&samples));
    for sample in &mut samples {
        sample.retained = within(sample.adjusted().as_unix_nanos(), center, tolerance);
        if !sample.retained {
            warn!(source = %sample.source, reported = %sample.reported, "time sample rejected as outlier");
        }
    }

    let mut retained: Vec<i128> = samples
        .iter()
        .filter(|s| s.retained)
        .map(|s| s.adjusted().as_unix_nanos())
        .collect();
    if retained.len() < quorum {
        return Err(insufficient(retained.len()));
    }
    retained.sort_unstable();

    let instant = median(&retained);
    let mean = retained.iter().map(|v| (v - instant) as f64).sum::<f64>() / retained.len() as f64;
    let variance = retained
        .iter()
        .map(|v| {
            let d = (v - instant) as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / retained.len() as f64;

    Ok(ConsensusTimestamp {
        instant: Timestamp::from_unix_nanos(instant),
        sources_queried: queried as u32,
        agreeing_count: retained.len() as u32,
        quorum_required: quorum as u32,
        tolerance_ms: u64::try_from(tolerance.as_millis()).unwrap_or(u64::MAX),
        spread_nanos: variance.sqrt().round() as u64,
        samples,
    })
}
