//! # emuflux-core
//!
//! **Smart-meter readings from a Rainforest EMU, deduplicated and forwarded.**
//!
//! `emuflux-core` polls a telemetry source for the latest price, instantaneous
//! demand and cumulative summation reports, decodes their hexadecimal
//! fixed-point fields into physical values, and forwards each reading to a
//! sink only if its device timestamp is newer than the last one forwarded for
//! that kind.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use emuflux_core::{EmuConfig, EmuSource, IngestConfig, Ingestor, JsonLinesSink};
//!
//! let source = EmuSource::new(EmuConfig::new("ttyACM0"));
//! let mut ingestor = Ingestor::new(source, JsonLinesSink::stdout(), IngestConfig::default());
//! let running = AtomicBool::new(true);
//! ingestor.run(&running).unwrap();
//! ```
//!
//! ## Architecture
//!
//! Source snapshot → Unit decoder → Freshness gate → Sink
//!
//! Every transport implements the [`TelemetrySource`] trait and every store
//! implements [`RecordSink`]. The [`Ingestor`] owns both, plus the
//! [`FreshnessState`], and drives them from a single thread.

pub mod decode;
pub mod error;
pub mod freshness;
pub mod ingest;
pub mod metric;
pub mod record;
pub mod sink;
pub mod source;
pub mod sources;

pub use decode::{DEVICE_EPOCH_UNIX_SECS, decode_price, decode_reading, decode_timestamp};
pub use error::{DecodeError, Error, Result, SinkError};
pub use freshness::FreshnessState;
pub use ingest::{
    CycleReport, DEFAULT_POLL_INTERVAL, IngestConfig, IngestStats, Ingestor, KindOutcome,
    KindStats,
};
pub use metric::MetricKind;
pub use record::{DecodedReading, OutboundRecord};
pub use sink::{JsonLinesSink, RecordSink};
pub use source::{RawMetricSnapshot, TelemetrySource};
pub use sources::{EmuConfig, EmuSource};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
