//! GPIO collaborator seam.
//!
//! The daemon only needs two operations: read a digital input and drive a
//! digital output. Everything else (edge detection, debounce) happens in
//! the motion listener on top of this trait.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Error, Result};

pub trait Gpio: Send + Sync {
    fn read(&self, pin: u8) -> Result<bool>;
    fn write(&self, pin: u8, high: bool) -> Result<()>;
}

/// Linux sysfs GPIO driver. Pins are exported lazily on first use.
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new() -> Self {
        Self { root: PathBuf::from("/sys/class/gpio") }
    }

    fn value_path(&self, pin: u8) -> PathBuf {
        self.root.join(format!("gpio{pin}")).join("value")
    }

    fn ensure_exported(&self, pin: u8) -> Result<()> {
        if self.value_path(pin).exists() {
            return Ok(());
        }
        fs::write(self.root.join("export"), pin.to_string())
            .map_err(|e| Error::Gpio { pin, reason: format!("export failed: {e}") })
    }

    fn set_direction(&self, pin: u8, direction: &str) -> Result<()> {
        let path = self.root.join(format!("gpio{pin}")).join("direction");
        fs::write(&path, direction)
            .map_err(|e| Error::Gpio { pin, reason: format!("direction failed: {e}") })
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Gpio for SysfsGpio {
    fn read(&self, pin: u8) -> Result<bool> {
        self.ensure_exported(pin)?;
        let raw = fs::read_to_string(self.value_path(pin))
            .map_err(|e| Error::Gpio { pin, reason: e.to_string() })?;
        Ok(raw.trim() == "1")
    }

    fn write(&self, pin: u8, high: bool) -> Result<()> {
        self.ensure_exported(pin)?;
        self.set_direction(pin, "out")?;
        fs::write(self.value_path(pin), if high { "1" } else { "0" })
            .map_err(|e| Error::Gpio { pin, reason: e.to_string() })
    }
}

/// In-memory pin map. Used by tests and dry runs; records every write so
/// output waveforms can be asserted.
#[derive(Default)]
pub struct MemoryGpio {
    pins: Mutex<HashMap<u8, bool>>,
    writes: Mutex<Vec<(u8, bool)>>,
}

impl MemoryGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive an input pin from a test.
    pub fn set_input(&self, pin: u8, high: bool) {
        self.pins.lock().unwrap().insert(pin, high);
    }

    pub fn level(&self, pin: u8) -> bool {
        self.pins.lock().unwrap().get(&pin).copied().unwrap_or(false)
    }

    /// All writes in order, as (pin, level).
    pub fn writes(&self) -> Vec<(u8, bool)> {
        self.writes.lock().unwrap().clone()
    }
}

impl Gpio for MemoryGpio {
    fn read(&self, pin: u8) -> Result<bool> {
        Ok(self.level(pin))
    }

    fn write(&self, pin: u8, high: bool) -> Result<()> {
        self.pins.lock().unwrap().insert(pin, high);
        self.writes.lock().unwrap().push((pin, high));
        Ok(())
    }
}
