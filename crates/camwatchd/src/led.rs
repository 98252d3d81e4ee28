//! Capture LED control.
//!
//! Operator-visible via /ledtoggle and /ledstatus, and raised transiently
//! by the camera arbiter during a capture.

use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::gpio::Gpio;

pub struct LedControl {
    gpio: Arc<dyn Gpio>,
    pin: u8,
    on: Mutex<bool>,
}

impl LedControl {
    pub fn new(gpio: Arc<dyn Gpio>, pin: u8) -> Self {
        Self { gpio, pin, on: Mutex::new(false) }
    }

    pub fn set(&self, on: bool) -> Result<()> {
        self.gpio.write(self.pin, on)?;
        *self.on.lock().unwrap() = on;
        Ok(())
    }

    /// Flip the LED, returning the new state.
    pub fn toggle(&self) -> Result<bool> {
        let next = !self.is_on();
        self.set(next)?;
        Ok(next)
    }

    pub fn is_on(&self) -> bool {
        *self.on.lock().unwrap()
    }
}
