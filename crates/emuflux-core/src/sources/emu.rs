//! Rainforest EMU-2 energy monitor over a USB serial port.
//!
//! The EMU speaks flat XML fragments in both directions. Device reports look
//! like
//!
//! ```text
//! <InstantaneousDemand>
//!   <TimeStamp>0x1c8b3b7a</TimeStamp>
//!   <Demand>0x0003f4</Demand>
//!   <Multiplier>0x00000001</Multiplier>
//!   <Divisor>0x000003e8</Divisor>
//! </InstantaneousDemand>
//! ```
//!
//! and commands are `<Command><Name>…</Name>…</Command>`. A background
//! thread reads the port and overwrites the latest snapshot per metric kind;
//! the ingestion loop reads copies of those snapshots.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, trace};

use crate::error::{Error, Result};
use crate::metric::MetricKind;
use crate::source::{RawMetricSnapshot, TelemetrySource};

/// Baud rate of the EMU's CDC serial interface.
pub const DEFAULT_BAUD: u32 = 115_200;

type SnapshotTable = Arc<Mutex<HashMap<MetricKind, RawMetricSnapshot>>>;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Serial settings for an EMU device.
#[derive(Debug, Clone)]
pub struct EmuConfig {
    /// Port name (`ttyACM0`) or full path (`/dev/ttyACM0`, `COM3`).
    pub port: String,
    pub baud: u32,
    /// How long a single read may block before the reader re-checks shutdown.
    pub read_timeout: Duration,
}

impl EmuConfig {
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            ..Default::default()
        }
    }
}

impl Default for EmuConfig {
    fn default() -> Self {
        Self {
            port: "ttyACM0".to_string(),
            baud: DEFAULT_BAUD,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Resolve a bare device name like `ttyACM0` to `/dev/ttyACM0`.
pub fn resolve_port_path(name: &str) -> String {
    if name.contains('/') || name.contains('\\') || name.starts_with("COM") {
        name.to_string()
    } else {
        format!("/dev/{name}")
    }
}

// ---------------------------------------------------------------------------
// EMU source
// ---------------------------------------------------------------------------

/// Telemetry source backed by an EMU serial connection.
pub struct EmuSource {
    config: EmuConfig,
    snapshots: SnapshotTable,
    writer: Option<Box<dyn serialport::SerialPort>>,
    running: Arc<AtomicBool>,
    reader_failed: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl EmuSource {
    pub fn new(config: EmuConfig) -> Self {
        Self {
            config,
            snapshots: Arc::new(Mutex::new(HashMap::new())),
            writer: None,
            running: Arc::new(AtomicBool::new(false)),
            reader_failed: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    fn send_command(&mut self, name: &str, args: &[(&str, &str)]) -> Result<()> {
        let port = self.writer.as_mut().ok_or(Error::NotStarted)?;
        let xml = command_xml(name, args);
        trace!("-> {xml}");
        port.write_all(xml.as_bytes())?;
        port.flush()?;
        Ok(())
    }
}

impl TelemetrySource for EmuSource {
    fn start(&mut self) -> Result<()> {
        let path = resolve_port_path(&self.config.port);
        let open_error = |source| Error::SerialOpen {
            port: path.clone(),
            source,
        };

        let port = serialport::new(&path, self.config.baud)
            .timeout(self.config.read_timeout)
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(open_error)?;
        let reader_port = port.try_clone().map_err(open_error)?;

        self.running.store(true, Ordering::SeqCst);
        self.reader_failed.store(false, Ordering::SeqCst);
        let snapshots = Arc::clone(&self.snapshots);
        let running = Arc::clone(&self.running);
        let failed = Arc::clone(&self.reader_failed);
        let handle = std::thread::Builder::new()
            .name("emu-reader".to_string())
            .spawn(move || {
                if !read_loop(reader_port, &snapshots, &running) {
                    failed.store(true, Ordering::SeqCst);
                }
            })?;

        self.writer = Some(port);
        self.reader = Some(handle);
        info!("opened EMU on {path} at {} baud", self.config.baud);
        Ok(())
    }

    fn subscribe(&mut self, kind: MetricKind) -> Result<()> {
        match kind {
            MetricKind::Demand => self.send_command("get_instantaneous_demand", &[("Refresh", "Y")]),
            MetricKind::Summation => self.send_command("get_current_summation_delivered", &[]),
            MetricKind::Price => self.send_command("get_price_blocks", &[]),
        }
    }

    fn snapshot(&self, kind: MetricKind) -> Option<RawMetricSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    fn is_healthy(&self) -> bool {
        !self.reader_failed.load(Ordering::SeqCst)
    }
}

impl Drop for EmuSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

/// Read device output until `running` clears or the port fails.
///
/// Returns `false` if the port failed or hit end of file.
fn read_loop<R: Read>(port: R, snapshots: &SnapshotTable, running: &AtomicBool) -> bool {
    let mut reader = BufReader::new(port);
    let mut parser = FragmentParser::default();
    let mut line = Vec::new();

    while running.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut line) {
            Ok(_) if line.last() == Some(&b'\n') => {
                let text = String::from_utf8_lossy(&line);
                for fragment in parser.feed(&text) {
                    store_fragment(snapshots, fragment);
                }
                line.clear();
            }
            // A serial port with a timeout never reports EOF while attached.
            Ok(0) => {
                error!("EMU serial port closed, reader stopping");
                return false;
            }
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) => {
                error!("EMU serial read failed, reader stopping: {e}");
                return false;
            }
        }
    }
    true
}

fn store_fragment(snapshots: &SnapshotTable, fragment: Fragment) {
    let Some(kind) = MetricKind::from_element(&fragment.name) else {
        trace!("ignoring {} report", fragment.name);
        return;
    };
    let mut snapshot = RawMetricSnapshot::new(kind);
    for (name, value) in &fragment.fields {
        snapshot.insert(name, value);
    }
    debug!("received {snapshot}");
    snapshots
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(kind, snapshot);
}

/// Render an EMU command fragment.
pub fn command_xml(name: &str, args: &[(&str, &str)]) -> String {
    let mut xml = format!("<Command>\n  <Name>{name}</Name>\n");
    for (key, value) in args {
        xml.push_str(&format!("  <{key}>{value}</{key}>\n"));
    }
    xml.push_str("</Command>\n");
    xml
}

// ---------------------------------------------------------------------------
// Fragment parser
// ---------------------------------------------------------------------------

/// One complete top-level element with its child text fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub name: String,
    pub fields: Vec<(String, String)>,
}

/// Incremental parser for the EMU's two-level XML fragments.
///
/// Input may be split at any byte boundary. Anything nested deeper than a
/// child field is ignored.
#[derive(Debug, Default)]
pub struct FragmentParser {
    pending: String,
    root: Option<String>,
    field: Option<String>,
    text: String,
    fields: Vec<(String, String)>,
}

impl FragmentParser {
    /// Feed more device output; returns every fragment it completed.
    pub fn feed(&mut self, input: &str) -> Vec<Fragment> {
        self.pending.push_str(input);
        let mut done = Vec::new();

        loop {
            let Some(open) = self.pending.find('<') else {
                let text = std::mem::take(&mut self.pending);
                self.push_text(&text);
                break;
            };
            let Some(len) = self.pending[open..].find('>') else {
                let text: String = self.pending.drain(..open).collect();
                self.push_text(&text);
                break;
            };
            let close = open + len;
            let text = self.pending[..open].to_string();
            let tag = self.pending[open + 1..close].trim().to_string();
            self.pending.drain(..=close);

            self.push_text(&text);
            if let Some(fragment) = self.handle_tag(&tag) {
                done.push(fragment);
            }
        }
        done
    }

    fn push_text(&mut self, text: &str) {
        if self.field.is_some() {
            self.text.push_str(text);
        }
    }

    fn handle_tag(&mut self, tag: &str) -> Option<Fragment> {
        // Declarations, processing instructions and comments.
        if tag.is_empty() || tag.starts_with('?') || tag.starts_with('!') {
            return None;
        }

        if let Some(name) = tag.strip_prefix('/') {
            let name = name.trim();
            if self.field.as_deref() == Some(name) {
                let field = self.field.take()?;
                let value = std::mem::take(&mut self.text).trim().to_string();
                self.fields.push((field, value));
            } else if self.field.is_none() && self.root.as_deref() == Some(name) {
                let name = self.root.take()?;
                let fields = std::mem::take(&mut self.fields);
                return Some(Fragment { name, fields });
            }
            return None;
        }

        let (body, self_closing) = match tag.strip_suffix('/') {
            Some(body) => (body, true),
            None => (tag, false),
        };
        let name = body.split_whitespace().next().unwrap_or_default().to_string();

        match (self.root.is_some(), self.field.is_some()) {
            (false, _) if !self_closing => {
                self.root = Some(name);
                self.fields.clear();
            }
            (true, false) if self_closing => self.fields.push((name, String::new())),
            (true, false) => {
                self.field = Some(name);
                self.text.clear();
            }
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMAND_XML: &str = "<InstantaneousDemand>\n\
        \x20 <DeviceMacId>0xd8d5b90000001234</DeviceMacId>\n\
        \x20 <TimeStamp>0x1c8b3b7a</TimeStamp>\n\
        \x20 <Demand>0x0003f4</Demand>\n\
        \x20 <Multiplier>0x00000001</Multiplier>\n\
        \x20 <Divisor>0x000003e8</Divisor>\n\
        </InstantaneousDemand>\n";

    // -----------------------------------------------------------------------
    // Port naming
    // -----------------------------------------------------------------------

    #[test]
    fn test_resolve_bare_name_under_dev() {
        assert_eq!(resolve_port_path("ttyACM0"), "/dev/ttyACM0");
    }

    #[test]
    fn test_resolve_keeps_paths() {
        assert_eq!(resolve_port_path("/dev/ttyUSB1"), "/dev/ttyUSB1");
        assert_eq!(resolve_port_path("COM3"), "COM3");
        assert_eq!(resolve_port_path(r"\\.\COM12"), r"\\.\COM12");
    }

    #[test]
    fn test_config_defaults() {
        let cfg = EmuConfig::new("ttyUSB0");
        assert_eq!(cfg.port, "ttyUSB0");
        assert_eq!(cfg.baud, 115_200);
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    #[test]
    fn test_command_xml_with_args() {
        let xml = command_xml("get_instantaneous_demand", &[("Refresh", "Y")]);
        assert_eq!(
            xml,
            "<Command>\n  <Name>get_instantaneous_demand</Name>\n  <Refresh>Y</Refresh>\n</Command>\n"
        );
    }

    #[test]
    fn test_send_before_start_fails() {
        let mut src = EmuSource::new(EmuConfig::default());
        assert!(matches!(
            src.subscribe(MetricKind::Price),
            Err(Error::NotStarted)
        ));
        assert!(src.snapshot(MetricKind::Price).is_none());
    }

    // -----------------------------------------------------------------------
    // Fragment parser
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_whole_fragment() {
        let mut parser = FragmentParser::default();
        let fragments = parser.feed(DEMAND_XML);
        assert_eq!(fragments.len(), 1);
        let f = &fragments[0];
        assert_eq!(f.name, "InstantaneousDemand");
        assert_eq!(f.fields.len(), 5);
        assert_eq!(f.fields[1], ("TimeStamp".to_string(), "0x1c8b3b7a".to_string()));
        assert_eq!(f.fields[4], ("Divisor".to_string(), "0x000003e8".to_string()));
    }

    #[test]
    fn test_parse_split_at_every_byte() {
        let mut parser = FragmentParser::default();
        let mut fragments = Vec::new();
        for ch in DEMAND_XML.chars() {
            fragments.extend(parser.feed(&ch.to_string()));
        }
        let mut whole = FragmentParser::default();
        assert_eq!(fragments, whole.feed(DEMAND_XML));
    }

    #[test]
    fn test_parse_consecutive_fragments() {
        let mut parser = FragmentParser::default();
        let input = "<PriceCluster><Price>0x64</Price><TrailingDigits>0x02</TrailingDigits></PriceCluster>\
                     <ConnectionStatus><Status>Connected</Status></ConnectionStatus>";
        let fragments = parser.feed(input);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].name, "PriceCluster");
        assert_eq!(fragments[1].name, "ConnectionStatus");
        assert_eq!(fragments[1].fields[0].1, "Connected");
    }

    #[test]
    fn test_parse_ignores_declarations_and_self_closing() {
        let mut parser = FragmentParser::default();
        let input = "<?xml version=\"1.0\"?><!-- hi --><PriceCluster><RateLabel/><Price>0x1</Price></PriceCluster>";
        let fragments = parser.feed(input);
        assert_eq!(fragments.len(), 1);
        assert_eq!(
            fragments[0].fields,
            vec![
                ("RateLabel".to_string(), String::new()),
                ("Price".to_string(), "0x1".to_string())
            ]
        );
    }

    #[test]
    fn test_empty_timestamp_decodes_as_device_epoch() {
        let table: SnapshotTable = Arc::new(Mutex::new(HashMap::new()));
        let mut parser = FragmentParser::default();
        let input = "<InstantaneousDemand><TimeStamp/><Demand>0x10</Demand>\
                     <Multiplier>0x1</Multiplier><Divisor>0x1</Divisor></InstantaneousDemand>\
                     <PriceCluster><TimeStamp></TimeStamp><Price>0x64</Price>\
                     <TrailingDigits>0x2</TrailingDigits></PriceCluster>";
        for fragment in parser.feed(input) {
            store_fragment(&table, fragment);
        }

        let table = table.lock().unwrap();
        let demand = MetricKind::Demand.decode(&table[&MetricKind::Demand]).unwrap();
        let price = MetricKind::Price.decode(&table[&MetricKind::Price]).unwrap();
        assert_eq!(demand.timestamp.timestamp(), crate::DEVICE_EPOCH_UNIX_SECS);
        assert_eq!(demand.value, 16.0);
        assert_eq!(price.timestamp.timestamp(), crate::DEVICE_EPOCH_UNIX_SECS);
        assert_eq!(price.value, 1.0);
    }

    // -----------------------------------------------------------------------
    // Reader
    // -----------------------------------------------------------------------

    struct UnpluggedPort;

    impl Read for UnpluggedPort {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(ErrorKind::BrokenPipe, "device disconnected"))
        }
    }

    #[test]
    fn test_read_loop_stores_reports_then_stops_at_eof() {
        let table: SnapshotTable = Arc::new(Mutex::new(HashMap::new()));
        let running = AtomicBool::new(true);
        let ok = read_loop(std::io::Cursor::new(DEMAND_XML), &table, &running);
        assert!(!ok);
        assert!(table.lock().unwrap().contains_key(&MetricKind::Demand));
    }

    #[test]
    fn test_read_loop_reports_port_failure() {
        let table: SnapshotTable = Arc::new(Mutex::new(HashMap::new()));
        let running = AtomicBool::new(true);
        assert!(!read_loop(UnpluggedPort, &table, &running));
        assert!(table.lock().unwrap().is_empty());
    }

    #[test]
    fn test_read_loop_clean_stop() {
        let table: SnapshotTable = Arc::new(Mutex::new(HashMap::new()));
        let running = AtomicBool::new(false);
        assert!(read_loop(UnpluggedPort, &table, &running));
    }

    #[test]
    fn test_new_source_is_healthy() {
        let src = EmuSource::new(EmuConfig::default());
        assert!(src.is_healthy());
    }

    #[test]
    fn test_store_fragment_only_known_kinds() {
        let table: SnapshotTable = Arc::new(Mutex::new(HashMap::new()));
        let mut parser = FragmentParser::default();
        for fragment in parser.feed(DEMAND_XML) {
            store_fragment(&table, fragment);
        }
        for fragment in parser.feed("<TimeCluster><UTCTime>0x1</UTCTime></TimeCluster>") {
            store_fragment(&table, fragment);
        }
        let table = table.lock().unwrap();
        assert_eq!(table.len(), 1);
        let snap = &table[&MetricKind::Demand];
        assert_eq!(snap.field("Demand"), Some("0x0003f4"));
    }
}
