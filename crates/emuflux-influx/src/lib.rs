//! InfluxDB 1.x sink for emuflux.
//!
//! Writes each batch of records to `POST /write` in line protocol at second
//! precision, authenticating with the `u`/`p` query parameters. Transport
//! failures (connection refused, timeout) are retried up to the configured
//! attempt count; an HTTP error response is returned immediately.

pub mod line_protocol;

use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};

use emuflux_core::{OutboundRecord, RecordSink, SinkError};

pub use line_protocol::{encode_batch, encode_record};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Base delay between transport retries; doubles each attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Connection settings for an InfluxDB 1.x server.
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Attempts per request on transport failure. 0 behaves like 1.
    pub retries: u32,
    pub timeout: Duration,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8086,
            username: "root".to_string(),
            password: "root".to_string(),
            database: "rainforest".to_string(),
            retries: 3,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl InfluxConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Blocking InfluxDB writer.
pub struct InfluxSink {
    client: Client,
    config: InfluxConfig,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::Setup(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    /// Create the target database. Succeeds if it already exists.
    pub fn create_database(&self) -> Result<(), SinkError> {
        let url = format!("{}/query", self.config.base_url());
        let statement = format!(
            "CREATE DATABASE \"{}\"",
            self.config.database.replace('"', "\\\"")
        );
        self.send(|| {
            self.client.post(&url).query(&[
                ("q", statement.as_str()),
                ("u", self.config.username.as_str()),
                ("p", self.config.password.as_str()),
            ])
        })?;
        debug!("database {} ready", self.config.database);
        Ok(())
    }

    /// Send a request, retrying transport failures, and require a 2xx reply.
    fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, SinkError> {
        let attempts = self.config.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                std::thread::sleep(RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1));
            }
            match build().send() {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().unwrap_or_default();
                    return Err(SinkError::Rejected {
                        status,
                        body: body.trim().to_string(),
                    });
                }
                Err(e) => {
                    warn!("influx request attempt {}/{attempts} failed: {e}", attempt + 1);
                    last_error = e.to_string();
                }
            }
        }

        Err(SinkError::Unreachable {
            attempts,
            reason: last_error,
        })
    }
}

impl RecordSink for InfluxSink {
    fn write(&mut self, records: &[OutboundRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        let body = encode_batch(records)?;
        let url = format!("{}/write", self.config.base_url());
        self.send(|| {
            self.client
                .post(&url)
                .query(&[
                    ("db", self.config.database.as_str()),
                    ("precision", "s"),
                    ("u", self.config.username.as_str()),
                    ("p", self.config.password.as_str()),
                ])
                .body(body.clone())
        })?;
        Ok(())
    }
}
