//! The three metric kinds tracked by the ingestion loop.
//!
//! Each [`MetricKind`] carries everything the generic polling routine needs:
//! the device element it arrives in, the measurement and field names it is
//! written under, and the decode rule for its snapshot.

use crate::decode::{decode_price, decode_reading, decode_timestamp};
use crate::error::DecodeError;
use crate::record::DecodedReading;
use crate::source::RawMetricSnapshot;

/// Telemetry category reported by the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    /// Current price signal.
    Price,
    /// Instantaneous power demand.
    Demand,
    /// Cumulative energy delivered.
    Summation,
}

impl MetricKind {
    /// Poll order within one cycle.
    pub const ALL: [MetricKind; 3] = [Self::Price, Self::Demand, Self::Summation];

    /// Order in which the device is asked to start reporting.
    pub const SUBSCRIBE_ORDER: [MetricKind; 3] = [Self::Demand, Self::Summation, Self::Price];

    /// Root element name of this kind's device report.
    pub fn element(self) -> &'static str {
        match self {
            Self::Price => "PriceCluster",
            Self::Demand => "InstantaneousDemand",
            Self::Summation => "CurrentSummationDelivered",
        }
    }

    /// Look up a kind by the root element name of a device report.
    pub fn from_element(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.element() == name)
    }

    /// Measurement name in the time-series store.
    pub fn measurement(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Demand => "demand",
            Self::Summation => "reading",
        }
    }

    /// Field name the value is stored under.
    pub fn field(self) -> &'static str {
        self.measurement()
    }

    /// Snapshot field holding the raw value.
    pub fn value_field(self) -> &'static str {
        match self {
            Self::Price => "Price",
            Self::Demand => "Demand",
            Self::Summation => "SummationDelivered",
        }
    }

    /// Decode a snapshot of this kind into a timestamped physical value.
    pub fn decode(self, snapshot: &RawMetricSnapshot) -> Result<DecodedReading, DecodeError> {
        let timestamp = decode_timestamp(snapshot.field("TimeStamp"))?;
        let raw = snapshot.require(self.value_field())?;
        let value = match self {
            Self::Price => decode_price(raw, snapshot.require("TrailingDigits")?)?,
            Self::Demand | Self::Summation => decode_reading(
                raw,
                snapshot.require("Multiplier")?,
                snapshot.require("Divisor")?,
            )?,
        };
        Ok(DecodedReading { timestamp, value })
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Price => write!(f, "price"),
            Self::Demand => write!(f, "demand"),
            Self::Summation => write!(f, "summation"),
        }
    }
}
