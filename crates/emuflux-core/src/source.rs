//! Telemetry source trait and raw snapshot type.
//!
//! A [`TelemetrySource`] owns the device transport and keeps the most recent
//! report for each [`MetricKind`]. The ingestion loop only ever reads
//! point-in-time copies of those reports through [`TelemetrySource::snapshot`].

use std::collections::BTreeMap;

use crate::error::{DecodeError, Result};
use crate::metric::MetricKind;

/// Latest raw report for one metric kind, fields still hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMetricSnapshot {
    kind: MetricKind,
    fields: BTreeMap<String, String>,
}

impl RawMetricSnapshot {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field insert.
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.fields.insert(name.to_string(), value.to_string());
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Field value, if the device reported it.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Field value, or [`DecodeError::MissingField`].
    pub fn require(&self, name: &'static str) -> std::result::Result<&str, DecodeError> {
        self.field(name)
            .ok_or(DecodeError::MissingField { field: name })
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

impl std::fmt::Display for RawMetricSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {{", self.kind.element())?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {name}={value}")?;
        }
        write!(f, " }}")
    }
}

/// Trait that every telemetry transport must implement.
pub trait TelemetrySource {
    /// Open the transport and begin receiving device reports.
    fn start(&mut self) -> Result<()>;

    /// Ask the device to start reporting `kind`. One-shot; not polled.
    fn subscribe(&mut self, kind: MetricKind) -> Result<()>;

    /// Latest report for `kind`, or `None` if the device has not sent one yet.
    fn snapshot(&self, kind: MetricKind) -> Option<RawMetricSnapshot>;

    /// Whether the transport is still receiving. Once this turns false the
    /// snapshots are frozen at their last values.
    fn is_healthy(&self) -> bool {
        true
    }
}

impl<T: TelemetrySource + ?Sized> TelemetrySource for Box<T> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn subscribe(&mut self, kind: MetricKind) -> Result<()> {
        (**self).subscribe(kind)
    }

    fn snapshot(&self, kind: MetricKind) -> Option<RawMetricSnapshot> {
        (**self).snapshot(kind)
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}
