//! Simulated board LED.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};
use log::info;

/// Shares its level with clones so the main thread can observe what the
/// emulation thread switched.
#[derive(Clone)]
pub struct SimLed {
    name: &'static str,
    lit: Arc<AtomicBool>,
    broken: bool,
}

impl SimLed {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lit: Arc::new(AtomicBool::new(false)),
            broken: false,
        }
    }

    /// LED whose GPIO cannot be configured
    pub fn broken(name: &'static str) -> Self {
        Self {
            broken: true,
            ..Self::new(name)
        }
    }

    pub fn is_lit(&self) -> bool {
        self.lit.load(Ordering::Relaxed)
    }

    fn set(&mut self, on: bool) -> Result<(), ErrorKind> {
        if self.broken {
            return Err(ErrorKind::Other);
        }
        if self.lit.swap(on, Ordering::Relaxed) != on {
            info!("{} {}", self.name, if on { "on" } else { "off" });
        }
        Ok(())
    }
}

impl ErrorType for SimLed {
    type Error = ErrorKind;
}

impl OutputPin for SimLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true)
    }
}
