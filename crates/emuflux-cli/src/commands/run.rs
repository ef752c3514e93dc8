//! `emuflux run`: poll the EMU and forward new readings until Ctrl+C.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::info;

use emuflux_core::{EmuConfig, EmuSource, IngestConfig, Ingestor, JsonLinesSink, RecordSink};
use emuflux_influx::{InfluxConfig, InfluxSink};

use super::parse_duration;

/// Arguments of the run command.
pub struct RunCommandConfig<'a> {
    pub serial_port: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub username: &'a str,
    pub password: &'a str,
    pub database: &'a str,
    pub retries: u32,
    pub timeout: &'a str,
    pub interval: &'a str,
    pub dry_run: bool,
}

/// Run the ingestion loop. Exits 0 on Ctrl+C, 1 on a startup failure.
pub fn run(cfg: RunCommandConfig<'_>) {
    let interval = parse_duration(cfg.interval).unwrap_or_else(|e| fail(&e));
    let timeout = parse_duration(cfg.timeout).unwrap_or_else(|e| fail(&e));

    // Set up Ctrl+C handler before any device or network I/O.
    let running = Arc::new(AtomicBool::new(true));
    let busy = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let b = busy.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if interrupt(&r, &b) {
            std::process::exit(0);
        }
    }) {
        fail(&format!("could not set Ctrl+C handler: {e}"));
    }

    let sink: Box<dyn RecordSink> = if cfg.dry_run {
        Box::new(JsonLinesSink::stdout())
    } else {
        let influx = InfluxSink::new(InfluxConfig {
            host: cfg.host.to_string(),
            port: cfg.port,
            username: cfg.username.to_string(),
            password: cfg.password.to_string(),
            database: cfg.database.to_string(),
            retries: cfg.retries,
            timeout,
        })
        .unwrap_or_else(|e| fail(&e.to_string()));
        if let Err(e) = influx.create_database() {
            fail(&format!("could not create database '{}': {e}", cfg.database));
        }
        info!("writing to {} database {}", influx.config().base_url(), cfg.database);
        Box::new(influx)
    };

    let source = EmuSource::new(EmuConfig::new(cfg.serial_port));
    let mut ingestor =
        Ingestor::new(source, sink, IngestConfig { interval }).with_busy_flag(busy);

    if let Err(e) = ingestor.run(&running) {
        fail(&e.to_string());
    }
}

/// Stop the loop. Returns true when I/O is in flight and the process should
/// exit immediately; records are written whole, so nothing is left half done.
fn interrupt(running: &AtomicBool, busy: &AtomicBool) -> bool {
    running.store(false, Ordering::SeqCst);
    busy.load(Ordering::SeqCst)
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {message}");
    std::process::exit(1);
}
