//! Sink trait for persisting outbound records.
//!
//! Writes are synchronous. A sink either accepts the whole batch or returns
//! an error; the ingestion loop only advances freshness on success.

use std::io::Write;

use crate::error::SinkError;
use crate::record::OutboundRecord;

/// Destination for outbound records.
pub trait RecordSink {
    fn write(&mut self, records: &[OutboundRecord]) -> Result<(), SinkError>;
}

impl<T: RecordSink + ?Sized> RecordSink for Box<T> {
    fn write(&mut self, records: &[OutboundRecord]) -> Result<(), SinkError> {
        (**self).write(records)
    }
}

/// Writes each record as one JSON line. Used for dry runs.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn write(&mut self, records: &[OutboundRecord]) -> Result<(), SinkError> {
        for record in records {
            serde_json::to_writer(&mut self.out, record)?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricKind;
    use crate::record::DecodedReading;
    use chrono::DateTime;

    #[test]
    fn test_json_lines_sink_writes_one_line_per_record() {
        let reading = DecodedReading {
            timestamp: DateTime::from_timestamp(946_684_801, 0).unwrap(),
            value: 16.0,
        };
        let records = vec![
            OutboundRecord::from_reading(MetricKind::Demand, &reading),
            OutboundRecord::from_reading(MetricKind::Price, &reading),
        ];

        let mut sink = JsonLinesSink::new(Vec::new());
        sink.write(&records).unwrap();
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""measurement":"demand""#));
        assert!(lines[0].contains(r#""time":"2000-01-01T00:00:01Z""#));
        assert!(lines[1].contains(r#""price":16.0"#));
    }

    #[test]
    fn test_boxed_sink_delegates() {
        let mut sink: Box<dyn RecordSink> = Box::new(JsonLinesSink::new(Vec::new()));
        assert!(sink.write(&[]).is_ok());
    }
}
