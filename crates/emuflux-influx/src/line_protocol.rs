//! InfluxDB line protocol encoding at second precision.
//!
//! `measurement field=value[,field=value...] unix_seconds`

use emuflux_core::{OutboundRecord, SinkError};

/// Encode one record as a single line (no trailing newline).
pub fn encode_record(record: &OutboundRecord) -> Result<String, SinkError> {
    if record.fields.is_empty() {
        return Err(SinkError::InvalidRecord(format!(
            "{} has no fields",
            record.measurement
        )));
    }

    let mut fields = Vec::with_capacity(record.fields.len());
    for (name, value) in &record.fields {
        if !value.is_finite() {
            return Err(SinkError::InvalidRecord(format!(
                "{}.{name} is not finite: {value}",
                record.measurement
            )));
        }
        fields.push(format!("{}={}", escape_key(name), value));
    }

    Ok(format!(
        "{} {} {}",
        escape_measurement(&record.measurement),
        fields.join(","),
        record.unix_seconds()
    ))
}

/// Encode a batch, one line per record, newline-terminated.
pub fn encode_batch(records: &[OutboundRecord]) -> Result<String, SinkError> {
    let mut body = String::new();
    for record in records {
        body.push_str(&encode_record(record)?);
        body.push('\n');
    }
    Ok(body)
}

fn escape_measurement(s: &str) -> String {
    escape(s, &[',', ' '])
}

fn escape_key(s: &str) -> String {
    escape(s, &[',', '=', ' '])
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
