//! Error types for emuflux.
//!
//! Decoding failures are scoped to one metric kind for one poll cycle; sink
//! failures are scoped to one write. Only [`Error`] reaches the caller of the
//! ingestion loop, and only from startup.

use thiserror::Error;

/// Result type alias for emuflux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure turning raw device fields into physical values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("field {field} is not a hexadecimal integer: {value:?}")]
    Format { field: &'static str, value: String },

    #[error("field {field} is zero, cannot divide")]
    DivideByZero { field: &'static str },

    #[error("snapshot has no {field} field")]
    MissingField { field: &'static str },

    #[error("field {field} is out of range: {value:?}")]
    OutOfRange { field: &'static str, value: String },
}

/// Failure persisting records to the time-series store.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink rejected write: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("sink unreachable after {attempts} attempt(s): {reason}")]
    Unreachable { attempts: u32, reason: String },

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("record cannot be written: {0}")]
    InvalidRecord(String),

    #[error("sink client setup failed: {0}")]
    Setup(String),

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error for startup and transport operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("serial port {port}: {source}")]
    SerialOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("telemetry transport not started")]
    NotStarted,

    #[error("telemetry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
