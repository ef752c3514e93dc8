//! `emuflux ports`: find the serial port the EMU is attached to.
//!
//! The EMU enumerates as a USB CDC device, so only USB ports are shown
//! unless `--all` is given. Ports whose USB descriptors name a Rainforest
//! device are marked and sorted first.

use serialport::{SerialPortInfo, SerialPortType};

/// One row of the listing.
#[derive(Debug, PartialEq, Eq)]
struct PortEntry {
    name: String,
    kind: &'static str,
    detail: Option<String>,
    likely_emu: bool,
}

pub fn run(all: bool) {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("Error listing ports: {e}");
            std::process::exit(1);
        }
    };

    let entries = collect(&ports, all);
    if entries.is_empty() {
        println!("No {}serial ports found.", if all { "" } else { "USB " });
        if !all {
            println!("Use --all to include non-USB ports.");
        }
        return;
    }

    for entry in &entries {
        let marker = if entry.likely_emu { "*" } else { " " };
        match &entry.detail {
            Some(detail) => println!("{marker} {:<20} {:<9} {detail}", entry.name, entry.kind),
            None => println!("{marker} {:<20} {}", entry.name, entry.kind),
        }
    }

    if let Some(emu) = entries.iter().find(|e| e.likely_emu) {
        println!();
        println!("* looks like an EMU; start with: emuflux run {}", run_argument(&emu.name));
    }
}

fn collect(ports: &[SerialPortInfo], all: bool) -> Vec<PortEntry> {
    let mut entries: Vec<PortEntry> = ports
        .iter()
        .filter(|p| all || matches!(p.port_type, SerialPortType::UsbPort(_)))
        .map(entry)
        .collect();
    entries.sort_by(|a, b| b.likely_emu.cmp(&a.likely_emu).then(a.name.cmp(&b.name)));
    entries
}

fn entry(port: &SerialPortInfo) -> PortEntry {
    let (kind, detail, likely_emu) = match &port.port_type {
        SerialPortType::UsbPort(info) => {
            let names: Vec<&str> = [info.manufacturer.as_deref(), info.product.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            let mut detail = format!("{:04x}:{:04x}", info.vid, info.pid);
            if !names.is_empty() {
                detail.push_str(&format!(" {}", names.join(" / ")));
            }
            (
                "USB",
                Some(detail),
                looks_like_emu(info.manufacturer.as_deref(), info.product.as_deref()),
            )
        }
        SerialPortType::BluetoothPort => ("Bluetooth", None, false),
        SerialPortType::PciPort => ("PCI", None, false),
        SerialPortType::Unknown => ("Unknown", None, false),
    };
    PortEntry {
        name: port.port_name.clone(),
        kind,
        detail,
        likely_emu,
    }
}

/// Whether USB descriptor strings name a Rainforest EMU.
fn looks_like_emu(manufacturer: Option<&str>, product: Option<&str>) -> bool {
    let manufacturer = manufacturer.unwrap_or_default().to_ascii_lowercase();
    let product = product.unwrap_or_default().to_ascii_lowercase();
    manufacturer.contains("rainforest") || product.contains("rainforest") || product.contains("emu")
}

/// The shortest name `emuflux run` accepts for a port.
fn run_argument(port_name: &str) -> &str {
    match port_name.strip_prefix("/dev/") {
        Some(rest) if !rest.contains('/') => rest,
        _ => port_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, port_type: SerialPortType) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type,
        }
    }

    #[test]
    fn test_looks_like_emu() {
        assert!(looks_like_emu(Some("Rainforest Automation, Inc."), None));
        assert!(looks_like_emu(None, Some("RFA-Z105-2 HW2.7.3 EMU-2")));
        assert!(!looks_like_emu(Some("FTDI"), Some("FT232R USB UART")));
        assert!(!looks_like_emu(None, None));
    }

    #[test]
    fn test_run_argument_strips_dev() {
        assert_eq!(run_argument("/dev/ttyACM0"), "ttyACM0");
        assert_eq!(run_argument("/dev/serial/by-id/usb-x"), "/dev/serial/by-id/usb-x");
        assert_eq!(run_argument("COM4"), "COM4");
    }

    #[test]
    fn test_collect_hides_non_usb_by_default() {
        let ports = vec![
            port("/dev/ttyS0", SerialPortType::Unknown),
            port("/dev/ttyS1", SerialPortType::PciPort),
        ];
        assert!(collect(&ports, false).is_empty());
        let all = collect(&ports, true);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].kind, "Unknown");
        assert_eq!(all[1].kind, "PCI");
        assert!(all.iter().all(|e| !e.likely_emu && e.detail.is_none()));
    }
}
