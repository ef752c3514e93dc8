//! Per-kind "newer than last forwarded" gate.
//!
//! State lives only as long as the process. After a restart the first
//! reading of every kind is forwarded again, even if it was sent before.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::metric::MetricKind;

/// Last successfully forwarded timestamp per metric kind.
#[derive(Debug, Clone, Default)]
pub struct FreshnessState {
    last: HashMap<MetricKind, DateTime<Utc>>,
}

impl FreshnessState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if nothing has been forwarded for `kind` yet, or `candidate` is
    /// strictly newer than the last forwarded timestamp.
    pub fn should_emit(&self, kind: MetricKind, candidate: DateTime<Utc>) -> bool {
        match self.last.get(&kind) {
            Some(last) => candidate > *last,
            None => true,
        }
    }

    /// Record a forwarded timestamp. Call only after the sink accepted it.
    pub fn record_emitted(&mut self, kind: MetricKind, timestamp: DateTime<Utc>) {
        self.last.insert(kind, timestamp);
    }

    pub fn last_emitted(&self, kind: MetricKind) -> Option<DateTime<Utc>> {
        self.last.get(&kind).copied()
    }

    /// Forget everything, as a process restart would.
    pub fn reset(&mut self) {
        self.last.clear();
    }
}
