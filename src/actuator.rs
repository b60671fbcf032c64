//! Relay actuator.
//!
//! Sole owner of the relay bus: translates desired On/Off requests into
//! 4-byte relay frames while holding the two safety invariants —
//!
//! * AC and Heat are never energised together (absolute, requests that
//!   would violate it are rejected and logged),
//! * the fan is energised before either climate channel comes on and is
//!   never released while one is energised; turning a climate channel off
//!   leaves the fan to its own rule evaluation.
//!
//! Every frame write is followed by a settle delay: the board is known to
//! drop frames that arrive back-to-back, even with code between the
//! writes.
//!
//! Callers request *transitions* only. Re-requesting the current state is
//! a caller defect, asserted in debug builds and a no-op in release.

use log::{info, warn};

use crate::app::events::{AppEvent, EventSink};
use crate::app::ports::{DelayPort, RelayBus};
use crate::error::Result;
use crate::state::{Channel, DeviceState};

/// Minimum time between consecutive relay frames.
pub const SETTLE_DELAY_MS: u32 = 1000;

const FRAME_HEADER: u8 = 0xA0;

/// Board-assigned relay indices.
const fn relay_index(channel: Channel) -> u8 {
    match channel {
        Channel::Ac => 1,
        Channel::Fan => 2,
        Channel::Heat => 3,
    }
}

/// Build the wire frame: `[header, relay, state, checksum]` with
/// `checksum = header + relay + state`.
pub fn relay_frame(channel: Channel, on: bool) -> [u8; 4] {
    let relay = relay_index(channel);
    let state = on as u8;
    [
        FRAME_HEADER,
        relay,
        state,
        FRAME_HEADER.wrapping_add(relay).wrapping_add(state),
    ]
}

/// The actuator itself carries no channel state — [`DeviceState`] is the
/// single source of truth; this struct holds only the write discipline.
pub struct RelayActuator {
    settle_ms: u32,
}

impl Default for RelayActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayActuator {
    pub fn new() -> Self {
        Self {
            settle_ms: SETTLE_DELAY_MS,
        }
    }

    /// Override the settle delay (tests only; production keeps the board's
    /// required 1 s).
    pub fn with_settle_ms(settle_ms: u32) -> Self {
        Self { settle_ms }
    }

    /// Drive every relay to Off without preconditions and advertise the
    /// known state. Startup only: climate channels first, fan last.
    pub fn init_all_off(
        &self,
        state: &mut DeviceState,
        hw: &mut (impl RelayBus + DelayPort),
        sink: &mut impl EventSink,
        now: u64,
    ) -> Result<()> {
        for channel in [Channel::Ac, Channel::Heat, Channel::Fan] {
            self.write(hw, channel, false)?;
            state.record_transition(channel, false, now);
            self.emit(state, sink, channel);
        }
        info!("relays initialised to known Off state");
        Ok(())
    }

    /// Transition the fan. Returns `Ok(false)` when an off request is
    /// rejected because a climate channel still needs moving air.
    pub fn set_fan(
        &self,
        state: &mut DeviceState,
        hw: &mut (impl RelayBus + DelayPort),
        sink: &mut impl EventSink,
        on: bool,
        now: u64,
    ) -> Result<bool> {
        debug_assert_ne!(
            state.is_on(Channel::Fan),
            on,
            "redundant fan transition requested"
        );
        if state.is_on(Channel::Fan) == on {
            return Ok(true);
        }

        if !on && state.climate_on() {
            warn!("interlock: fan off rejected while a climate channel is energised");
            return Ok(false);
        }

        self.write(hw, Channel::Fan, on)?;
        state.record_transition(Channel::Fan, on, now);
        self.emit(state, sink, Channel::Fan);
        Ok(true)
    }

    /// Transition AC or Heat. Returns `Ok(false)` when the request is
    /// rejected by the mutual-exclusion interlock.
    pub fn set_climate(
        &self,
        state: &mut DeviceState,
        hw: &mut (impl RelayBus + DelayPort),
        sink: &mut impl EventSink,
        channel: Channel,
        on: bool,
        now: u64,
    ) -> Result<bool> {
        debug_assert_ne!(channel, Channel::Fan, "set_climate on fan channel");
        debug_assert_ne!(
            state.is_on(channel),
            on,
            "redundant climate transition requested"
        );
        if state.is_on(channel) == on {
            return Ok(true);
        }

        if on {
            if let Some(other) = channel.excludes() {
                if state.is_on(other) {
                    warn!(
                        "interlock: {} on rejected while {} is energised",
                        channel.name(),
                        other.name()
                    );
                    return Ok(false);
                }
            }
            // Fan must be moving air before the climate relay closes.
            if !state.is_on(Channel::Fan) {
                self.set_fan(state, hw, sink, true, now)?;
            }
        }

        self.write(hw, channel, on)?;
        state.record_transition(channel, on, now);
        self.emit(state, sink, channel);
        Ok(true)
    }

    fn write(
        &self,
        hw: &mut (impl RelayBus + DelayPort),
        channel: Channel,
        on: bool,
    ) -> Result<()> {
        hw.write_frame(relay_frame(channel, on))?;
        hw.delay_ms(self.settle_ms);
        Ok(())
    }

    fn emit(&self, state: &DeviceState, sink: &mut impl EventSink, channel: Channel) {
        sink.emit(&AppEvent::Channel {
            channel,
            state: state.channel(channel),
            mod_ts: state.mod_ts(channel),
            uptime: state.uptime(channel),
        });
    }
}
