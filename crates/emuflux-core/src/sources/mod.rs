//! Telemetry source implementations.

pub mod emu;

pub use emu::{EmuConfig, EmuSource};
