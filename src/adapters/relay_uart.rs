//! Relay board adapter.
//!
//! Implements [`RelayBus`] over a UART link to the 4-channel relay board,
//! and [`DelayPort`] on the FreeRTOS task delay. The two live together
//! because the relay settle discipline needs them paired.
//!
//! - **`target_os = "espidf"`** — `UartDriver` at 115200 8N1; a frame is
//!   written and flushed in one call.
//! - **all other targets** — records frames and accumulated delay for
//!   inspection by tests.

use crate::app::ports::{DelayPort, RelayBus};
use crate::error::ActuatorError;

#[cfg(target_os = "espidf")]
use embedded_hal::delay::DelayNs;
#[cfg(target_os = "espidf")]
use esp_idf_hal::delay::FreeRtos;
#[cfg(target_os = "espidf")]
use esp_idf_hal::uart::UartDriver;

#[cfg(target_os = "espidf")]
pub struct RelayUart<'d> {
    uart: UartDriver<'d>,
}

#[cfg(target_os = "espidf")]
impl<'d> RelayUart<'d> {
    /// Takes an already-configured driver (115200 8N1, no flow control).
    pub fn new(uart: UartDriver<'d>) -> Self {
        Self { uart }
    }
}

#[cfg(target_os = "espidf")]
impl RelayBus for RelayUart<'_> {
    fn write_frame(&mut self, frame: [u8; 4]) -> Result<(), ActuatorError> {
        let written = self
            .uart
            .write(&frame)
            .map_err(|_| ActuatorError::BusWriteFailed)?;
        if written != frame.len() {
            return Err(ActuatorError::BusWriteFailed);
        }
        self.uart
            .wait_tx_done(100)
            .map_err(|_| ActuatorError::BusWriteFailed)?;
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
impl DelayPort for RelayUart<'_> {
    fn delay_ms(&mut self, ms: u32) {
        DelayNs::delay_ms(&mut FreeRtos, ms);
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
pub struct RelayUart {
    pub frames: Vec<[u8; 4]>,
    pub delayed_ms: u64,
    fail_writes: bool,
}

#[cfg(not(target_os = "espidf"))]
impl RelayUart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, as a severed UART would.
    pub fn sever(&mut self) {
        self.fail_writes = true;
    }
}

#[cfg(not(target_os = "espidf"))]
impl RelayBus for RelayUart {
    fn write_frame(&mut self, frame: [u8; 4]) -> Result<(), ActuatorError> {
        if self.fail_writes {
            return Err(ActuatorError::BusWriteFailed);
        }
        self.frames.push(frame);
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl DelayPort for RelayUart {
    fn delay_ms(&mut self, ms: u32) {
        self.delayed_ms += u64::from(ms);
    }
}
