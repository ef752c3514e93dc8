//! Decoded readings and the records handed to a sink.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::metric::MetricKind;

/// A snapshot after unit decoding. Recomputed every poll cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedReading {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// One measurement point for the time-series store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundRecord {
    pub measurement: String,
    #[serde(serialize_with = "serialize_seconds")]
    pub time: DateTime<Utc>,
    pub fields: BTreeMap<String, f64>,
}

impl OutboundRecord {
    /// Build the record for a decoded reading of `kind`.
    pub fn from_reading(kind: MetricKind, reading: &DecodedReading) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(kind.field().to_string(), reading.value);
        Self {
            measurement: kind.measurement().to_string(),
            time: reading.timestamp,
            fields,
        }
    }

    /// Timestamp in whole Unix seconds, the precision records are written at.
    pub fn unix_seconds(&self) -> i64 {
        self.time.timestamp()
    }
}

fn serialize_seconds<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_demand_reading() {
        let reading = DecodedReading {
            timestamp: DateTime::from_timestamp(946_684_801, 0).unwrap(),
            value: 16.0,
        };
        let record = OutboundRecord::from_reading(MetricKind::Demand, &reading);
        assert_eq!(record.measurement, "demand");
        assert_eq!(record.fields.get("demand"), Some(&16.0));
        assert_eq!(record.unix_seconds(), 946_684_801);
    }

    #[test]
    fn test_record_serializes_second_precision_time() {
        let reading = DecodedReading {
            timestamp: DateTime::from_timestamp(946_684_801, 0).unwrap(),
            value: 0.25,
        };
        let record = OutboundRecord::from_reading(MetricKind::Summation, &reading);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"measurement":"reading","time":"2000-01-01T00:00:01Z","fields":{"reading":0.25}}"#
        );
    }
}
