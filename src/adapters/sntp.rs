//! SNTP time adapter.
//!
//! Implements [`TimeSource`]: wall-clock reads come straight from the
//! system clock; [`sync`](TimeSource::sync) kicks an SNTP exchange and
//! blocks until the clock has been stepped or a bounded wait expires.
//!
//! - **`target_os = "espidf"`** — `EspSntp`; each sync tears down the
//!   previous session so the LwIP SNTP client re-queries immediately
//!   instead of on its own hour-scale schedule.
//! - **all other targets** — the host clock is assumed correct and sync
//!   reports zero drift.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::app::ports::TimeSource;
use crate::error::ClockError;

#[cfg(target_os = "espidf")]
use esp_idf_hal::delay::FreeRtos;
#[cfg(target_os = "espidf")]
use esp_idf_svc::sntp::{EspSntp, SyncStatus};

/// Upper bound on one blocking sync exchange.
#[cfg(target_os = "espidf")]
const SYNC_WAIT_MS: u32 = 8_000;
#[cfg(target_os = "espidf")]
const SYNC_POLL_MS: u32 = 100;

pub struct SntpClock {
    #[cfg(target_os = "espidf")]
    session: Option<EspSntp<'static>>,
}

impl SntpClock {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "espidf")]
            session: None,
        }
    }
}

impl Default for SntpClock {
    fn default() -> Self {
        Self::new()
    }
}

fn system_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl TimeSource for SntpClock {
    fn wall_clock_secs(&self) -> u64 {
        system_secs()
    }

    #[cfg(target_os = "espidf")]
    fn sync(&mut self) -> Result<i64, ClockError> {
        let before = system_secs() as i64;
        let started = std::time::Instant::now();

        self.session = None;
        let session = EspSntp::new_default().map_err(|_| ClockError::Unreachable)?;

        let mut waited: u32 = 0;
        while session.get_sync_status() != SyncStatus::Completed {
            if waited >= SYNC_WAIT_MS {
                return Err(ClockError::Timeout);
            }
            FreeRtos::delay_ms(SYNC_POLL_MS);
            waited += SYNC_POLL_MS;
        }
        self.session = Some(session);

        // The wait itself advances the clock; subtract it so only the NTP
        // step remains.
        let elapsed = started.elapsed().as_secs() as i64;
        Ok(system_secs() as i64 - before - elapsed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn sync(&mut self) -> Result<i64, ClockError> {
        Ok(0)
    }
}
