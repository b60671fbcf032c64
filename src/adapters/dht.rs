//! DHT22 temperature/humidity sensor adapter.
//!
//! Implements [`SensorPort`] by bit-banging the single-wire DHT protocol
//! on a GPIO pin.
//!
//! - **`target_os = "espidf"`** — start pulse, then 40 data bits timed
//!   against the high-resolution timer. The sensor reports tenths
//!   natively, so no float conversion happens on this path.
//! - **all other targets** — a settable simulation backend.
//!
//! The sensor needs ~2 s between reads and commonly times out for the
//! first few reads after power-up; retry policy belongs to the caller.

use crate::app::ports::SensorPort;
use crate::error::SensorError;
use crate::state::SensorReading;

#[cfg(target_os = "espidf")]
use esp_idf_hal::delay::Ets;
#[cfg(target_os = "espidf")]
use esp_idf_hal::gpio::{AnyIOPin, InputOutput, PinDriver, Pull};

/// Plausibility window for DHT22 output, in tenths.
const TEMP_MIN: i16 = -400;
const TEMP_MAX: i16 = 800;
const HUMID_MAX: i16 = 1000;

#[cfg(target_os = "espidf")]
pub struct DhtSensor<'d> {
    pin: PinDriver<'d, AnyIOPin, InputOutput>,
}

#[cfg(target_os = "espidf")]
impl<'d> DhtSensor<'d> {
    pub fn new(pin: AnyIOPin) -> Result<Self, SensorError> {
        let mut pin = PinDriver::input_output_od(pin).map_err(|_| SensorError::Timeout)?;
        pin.set_pull(Pull::Up).map_err(|_| SensorError::Timeout)?;
        pin.set_high().map_err(|_| SensorError::Timeout)?;
        Ok(Self { pin })
    }

    fn now_us() -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    /// Busy-wait until the pin reaches `level`, or time out.
    fn wait_for(&self, level: bool, timeout_us: u64) -> Result<u64, SensorError> {
        let start = Self::now_us();
        while self.pin.is_high() != level {
            if Self::now_us() - start > timeout_us {
                return Err(SensorError::Timeout);
            }
        }
        Ok(Self::now_us() - start)
    }

    fn read_raw(&mut self) -> Result<[u8; 5], SensorError> {
        // Host start signal: >1 ms low, then release the line.
        self.pin.set_low().map_err(|_| SensorError::Timeout)?;
        Ets::delay_us(1500);
        self.pin.set_high().map_err(|_| SensorError::Timeout)?;
        Ets::delay_us(40);

        // Sensor response: ~80 us low, ~80 us high.
        self.wait_for(false, 100)?;
        self.wait_for(true, 100)?;
        self.wait_for(false, 100)?;

        // 40 bits: 50 us low preamble, then 26-28 us high = 0, ~70 us = 1.
        let mut data = [0u8; 5];
        for bit in 0..40 {
            self.wait_for(true, 80)?;
            let high_us = self.wait_for(false, 100)?;
            if high_us > 48 {
                data[bit / 8] |= 1 << (7 - (bit % 8));
            }
        }
        Ok(data)
    }
}

#[cfg(target_os = "espidf")]
impl SensorPort for DhtSensor<'_> {
    fn measure(&mut self) -> Result<SensorReading, SensorError> {
        let data = self.read_raw()?;

        let sum = data[0]
            .wrapping_add(data[1])
            .wrapping_add(data[2])
            .wrapping_add(data[3]);
        if sum != data[4] {
            return Err(SensorError::ChecksumMismatch);
        }

        let humid = (u16::from(data[0]) << 8 | u16::from(data[1])) as i16;
        let temp_raw = u16::from(data[2] & 0x7F) << 8 | u16::from(data[3]);
        let temp = if data[2] & 0x80 != 0 {
            -(temp_raw as i16)
        } else {
            temp_raw as i16
        };

        if !(TEMP_MIN..=TEMP_MAX).contains(&temp) || !(0..=HUMID_MAX).contains(&humid) {
            return Err(SensorError::OutOfRange);
        }
        Ok(SensorReading { temp, humid })
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub struct DhtSensor {
    reading: SensorReading,
    failures_left: u32,
}

#[cfg(not(target_os = "espidf"))]
impl DhtSensor {
    pub fn new() -> Self {
        Self {
            reading: SensorReading {
                temp: 220,
                humid: 500,
            },
            failures_left: 0,
        }
    }

    pub fn set_reading(&mut self, temp: i16, humid: i16) {
        self.reading = SensorReading { temp, humid };
    }

    /// Make the next `n` reads time out.
    pub fn fail_next(&mut self, n: u32) {
        self.failures_left = n;
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for DhtSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "espidf"))]
impl SensorPort for DhtSensor {
    fn measure(&mut self) -> Result<SensorReading, SensorError> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(SensorError::Timeout);
        }
        if !(TEMP_MIN..=TEMP_MAX).contains(&self.reading.temp)
            || !(0..=HUMID_MAX).contains(&self.reading.humid)
        {
            return Err(SensorError::OutOfRange);
        }
        Ok(self.reading)
    }
}
