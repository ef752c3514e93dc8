//! The decode-compare-emit ingestion loop.
//!
//! Architecture:
//! 1. Start the telemetry transport
//! 2. Subscribe to demand, summation and price reports (in that order)
//! 3. Every poll interval, for each metric kind in turn:
//!    snapshot → decode → freshness gate → sink write → record emitted
//!
//! Kinds are isolated from each other: a missing snapshot, a decode failure
//! or a failed write for one kind never affects the others, and never stops
//! the loop. A failed write leaves freshness untouched so the same reading is
//! offered again next cycle (at-least-once per distinct reading).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::freshness::FreshnessState;
use crate::metric::MetricKind;
use crate::record::OutboundRecord;
use crate::sink::RecordSink;
use crate::source::TelemetrySource;

/// Default time between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Granularity at which the poll sleep checks for shutdown.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for the ingestion loop.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle outcomes and counters
// ---------------------------------------------------------------------------

/// What happened to one metric kind in one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindOutcome {
    /// The device has not reported this kind yet.
    Missing,
    /// The snapshot could not be decoded.
    DecodeFailed,
    /// The reading was not newer than the last forwarded one.
    Stale,
    /// The record was written and freshness advanced.
    Emitted,
    /// The sink rejected the write; freshness not advanced.
    WriteFailed,
}

/// Per-kind outcomes of a single poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub outcomes: Vec<(MetricKind, KindOutcome)>,
    /// False if the source had stopped receiving when the cycle ran.
    pub source_healthy: bool,
}

impl CycleReport {
    pub fn outcome(&self, kind: MetricKind) -> Option<KindOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, o)| *o)
    }

    pub fn emitted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == KindOutcome::Emitted)
            .count()
    }
}

/// Running counters for one metric kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    pub emitted: u64,
    pub stale: u64,
    pub missing: u64,
    pub decode_errors: u64,
    pub write_failures: u64,
}

/// Running counters for the whole loop, keyed by kind.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub cycles: u64,
    pub unhealthy_cycles: u64,
    per_kind: BTreeMap<MetricKind, KindStats>,
}

impl IngestStats {
    fn record(&mut self, kind: MetricKind, outcome: KindOutcome) {
        let stats = self.per_kind.entry(kind).or_default();
        match outcome {
            KindOutcome::Missing => stats.missing += 1,
            KindOutcome::DecodeFailed => stats.decode_errors += 1,
            KindOutcome::Stale => stats.stale += 1,
            KindOutcome::Emitted => stats.emitted += 1,
            KindOutcome::WriteFailed => stats.write_failures += 1,
        }
    }

    pub fn kind(&self, kind: MetricKind) -> KindStats {
        self.per_kind.get(&kind).copied().unwrap_or_default()
    }

    pub fn total_emitted(&self) -> u64 {
        self.per_kind.values().map(|s| s.emitted).sum()
    }
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cycle(s), {} with source down",
            self.cycles, self.unhealthy_cycles
        )?;
        for kind in MetricKind::ALL {
            let s = self.kind(kind);
            write!(
                f,
                "; {kind}: emitted={} stale={} missing={} decode_errors={} write_failures={}",
                s.emitted, s.stale, s.missing, s.decode_errors, s.write_failures
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

/// Single-threaded poll loop from a telemetry source into a record sink.
pub struct Ingestor<S, K> {
    source: S,
    sink: K,
    freshness: FreshnessState,
    stats: IngestStats,
    config: IngestConfig,
    busy: Arc<AtomicBool>,
}

impl<S: TelemetrySource, K: RecordSink> Ingestor<S, K> {
    pub fn new(source: S, sink: K, config: IngestConfig) -> Self {
        Self {
            source,
            sink,
            freshness: FreshnessState::new(),
            stats: IngestStats::default(),
            config,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a flag that [`run`](Self::run) holds set while it talks to the
    /// source or sink and clears while it sleeps between cycles.
    pub fn with_busy_flag(mut self, busy: Arc<AtomicBool>) -> Self {
        self.busy = busy;
        self
    }

    /// Start the transport and subscribe to every metric kind.
    pub fn start(&mut self) -> Result<()> {
        self.source.start()?;
        for kind in MetricKind::SUBSCRIBE_ORDER {
            self.source.subscribe(kind)?;
            debug!("subscribed to {kind} reports");
        }
        info!(
            "ingestion started, polling every {}ms",
            self.config.interval.as_millis()
        );
        Ok(())
    }

    /// Start, then poll until `running` is cleared.
    ///
    /// Only startup errors are returned; nothing inside the loop is fatal.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        self.busy.store(true, Ordering::SeqCst);
        self.start()?;
        while running.load(Ordering::SeqCst) {
            self.busy.store(false, Ordering::SeqCst);
            sleep_while_running(self.config.interval, running);
            // Set before the check so an interrupt sees either one or the other.
            self.busy.store(true, Ordering::SeqCst);
            if !running.load(Ordering::SeqCst) {
                break;
            }
            self.poll_once();
        }
        self.busy.store(false, Ordering::SeqCst);
        info!("ingestion stopped: {}", self.stats);
        Ok(())
    }

    /// Run one poll cycle over every metric kind.
    pub fn poll_once(&mut self) -> CycleReport {
        let mut report = CycleReport {
            source_healthy: self.source.is_healthy(),
            ..Default::default()
        };
        if !report.source_healthy {
            warn!("telemetry source stopped receiving, readings will not advance");
            self.stats.unhealthy_cycles += 1;
        }
        for kind in MetricKind::ALL {
            let outcome = self.poll_kind(kind);
            self.stats.record(kind, outcome);
            report.outcomes.push((kind, outcome));
        }
        self.stats.cycles += 1;
        report
    }

    fn poll_kind(&mut self, kind: MetricKind) -> KindOutcome {
        let Some(snapshot) = self.source.snapshot(kind) else {
            trace!("{kind}: no report yet");
            return KindOutcome::Missing;
        };

        let reading = match kind.decode(&snapshot) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("{kind}: skipping this cycle: {e}");
                return KindOutcome::DecodeFailed;
            }
        };

        if !self.freshness.should_emit(kind, reading.timestamp) {
            trace!("{kind}: {} already forwarded", reading.timestamp);
            return KindOutcome::Stale;
        }

        let record = OutboundRecord::from_reading(kind, &reading);
        debug!("{snapshot}");
        debug!("{record:?}");

        match self.sink.write(std::slice::from_ref(&record)) {
            Ok(()) => {
                self.freshness.record_emitted(kind, reading.timestamp);
                KindOutcome::Emitted
            }
            Err(e) => {
                error!("{kind}: write failed, will retry next cycle: {e}");
                KindOutcome::WriteFailed
            }
        }
    }

    pub fn freshness(&self) -> &FreshnessState {
        &self.freshness
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }
}

/// Sleep for `total`, returning early once `running` is cleared.
fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        std::thread::sleep(remaining.min(SLEEP_SLICE));
    }
}
