//! Best-effort wall clock, corrected against a network time source.
//!
//! The on-board RTC drifts seconds per minute (worse while the relays are
//! energised, likely thermal), so timestamps are only trustworthy between
//! periodic NTP resyncs. A resync can step the clock in either direction;
//! consumers of `now()` must tolerate small backwards steps.
//!
//! Sync faults are always soft: a failed attempt is retried a bounded
//! number of times, then deferred to the next resync window.

use log::{info, warn};

use crate::app::ports::{DelayPort, TimeSource};

/// Minimum seconds between resync attempts. With a 240 s window the
/// largest observed drift was around 7 s.
pub const RESYNC_INTERVAL_SECS: u64 = 240;

/// Attempts per sync before deferring to the next window.
const SYNC_RETRIES: u32 = 5;

/// Pause between attempts.
const RETRY_DELAY_MS: u32 = 1000;

pub struct ClockSync<T: TimeSource> {
    source: T,
    /// Wall-clock seconds of the last sync *attempt* (success or not);
    /// failed windows still back off the full interval.
    last_attempt_ts: u64,
}

impl<T: TimeSource> ClockSync<T> {
    pub fn new(source: T) -> Self {
        Self {
            source,
            last_attempt_ts: 0,
        }
    }

    /// Current wall-clock seconds.
    pub fn now(&self) -> u64 {
        self.source.wall_clock_secs()
    }

    /// Resync if the window has elapsed. Returns whether a sync succeeded.
    pub fn maybe_resync(&mut self, delay: &mut impl DelayPort) -> bool {
        if self.now().saturating_sub(self.last_attempt_ts) < RESYNC_INTERVAL_SECS {
            return false;
        }
        self.sync_now(delay)
    }

    /// Force a sync attempt with bounded retries. Never escalates.
    pub fn sync_now(&mut self, delay: &mut impl DelayPort) -> bool {
        let mut synced = false;
        for attempt in 1..=SYNC_RETRIES {
            match self.source.sync() {
                Ok(drift) => {
                    // Up to ~1 s misreported either way: includes the query
                    // round-trip itself.
                    info!("NTP sync ok, drift was around {drift}s");
                    synced = true;
                    break;
                }
                Err(e) => {
                    warn!("NTP sync failed ({e}), attempt {attempt}/{SYNC_RETRIES}");
                    delay.delay_ms(RETRY_DELAY_MS);
                }
            }
        }
        self.last_attempt_ts = self.now();
        synced
    }
}
