//! Raspberry Pi GPIO inputs via rppal.
//!
//! Beam-break receivers are open-collector outputs, so each pin is configured as
//! an input with the internal pull-up enabled. The beam being broken pulls the
//! line low.

use async_trait::async_trait;
use rppal::gpio::{self, Gpio, InputPin};
use tracing::debug;

use crate::error::{DashError, DashResult};
use crate::hardware::capabilities::{DigitalInput, Level};

/// One BCM pin configured as a pulled-up input
pub struct GpioInput {
    pin: u8,
    input: Option<InputPin>,
}

impl GpioInput {
    /// Claim `pin` on the given controller
    pub fn open(gpio: &Gpio, pin: u8) -> DashResult<Self> {
        let input = gpio
            .get(pin)
            .map_err(|e| DashError::Hardware {
                pin,
                message: e.to_string(),
            })?
            .into_input_pullup();
        debug!(pin, "configured GPIO input with pull-up");
        Ok(Self {
            pin,
            input: Some(input),
        })
    }
}

/// Open the GPIO controller
pub fn controller() -> DashResult<Gpio> {
    Gpio::new().map_err(|e| DashError::Hardware {
        pin: 0,
        message: format!("failed to open GPIO controller: {}", e),
    })
}

#[async_trait]
impl DigitalInput for GpioInput {
    fn pin(&self) -> u8 {
        self.pin
    }

    async fn read(&mut self) -> DashResult<Level> {
        let input = self.input.as_ref().ok_or_else(|| DashError::Hardware {
            pin: self.pin,
            message: "pin already released".to_string(),
        })?;
        Ok(match input.read() {
            gpio::Level::High => Level::High,
            gpio::Level::Low => Level::Low,
        })
    }

    fn release(&mut self) {
        // Dropping the InputPin restores its original mode and pull state.
        if self.input.take().is_some() {
            debug!(pin = self.pin, "released GPIO input");
        }
    }
}
