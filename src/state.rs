//! Live device state.
//!
//! One struct, owned by the control loop, mutated only by the relay
//! actuator and the sensor-update step. Serialised wholesale into the
//! `info/state` snapshot message.

use serde::Serialize;

/// Independently actuated relay circuits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Ac,
    Heat,
    Fan,
}

impl Channel {
    /// Subtopic fragment used for this channel's telemetry.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ac => "ac",
            Self::Heat => "heat",
            Self::Fan => "fan",
        }
    }

    /// The mutually exclusive peer of a climate channel. `None` for the fan.
    pub const fn excludes(self) -> Option<Channel> {
        match self {
            Self::Ac => Some(Self::Heat),
            Self::Heat => Some(Self::Ac),
            Self::Fan => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    On,
    Off,
}

impl ChannelState {
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }
}

/// Last acquired sensor reading, fixed-point tenths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SensorReading {
    /// Temperature, tenths of a degree Celsius.
    pub temp: i16,
    /// Relative humidity, tenths of a percent.
    pub humid: i16,
}

/// Convert a fractional value from the wire into internal tenths.
pub fn to_tenths(value: f32) -> i16 {
    #[allow(clippy::manual_range_contains)]
    let clamped = if value < -3000.0 {
        -3000.0
    } else if value > 3000.0 {
        3000.0
    } else {
        value
    };
    // No `round()` in core; bias by half a tenth instead.
    let scaled = clamped * 10.0;
    (scaled + if scaled >= 0.0 { 0.5 } else { -0.5 }) as i16
}

/// Tenths back to a fractional value for outbound payloads.
pub fn tenths_to_float(tenths: i16) -> f32 {
    f32::from(tenths) / 10.0
}

// ---------------------------------------------------------------------------
// Per-channel bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize)]
struct ChannelRecord {
    state: ChannelState,
    /// Wall-clock seconds of the last transition.
    mod_ts: u64,
    /// Accumulated seconds of on-time; grows only on a transition to off.
    uptime: u64,
}

impl ChannelRecord {
    fn new(now: u64) -> Self {
        Self {
            state: ChannelState::Off,
            mod_ts: now,
            uptime: 0,
        }
    }

    fn transition(&mut self, on: bool, now: u64) {
        if self.state.is_on() && !on {
            self.uptime += now.saturating_sub(self.mod_ts);
        }
        self.state = if on { ChannelState::On } else { ChannelState::Off };
        self.mod_ts = now;
    }
}

// ---------------------------------------------------------------------------
// DeviceState
// ---------------------------------------------------------------------------

/// The controller's complete mutable state.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceState {
    ac: ChannelRecord,
    heat: ChannelRecord,
    fan: ChannelRecord,
    /// Last acquired reading; `None` until the first successful measure.
    pub sensor: Option<SensorReading>,
    /// Process start, wall-clock seconds.
    pub start_ts: u64,
}

impl DeviceState {
    pub fn new(now: u64) -> Self {
        Self {
            ac: ChannelRecord::new(now),
            heat: ChannelRecord::new(now),
            fan: ChannelRecord::new(now),
            sensor: None,
            start_ts: now,
        }
    }

    fn record(&self, channel: Channel) -> &ChannelRecord {
        match channel {
            Channel::Ac => &self.ac,
            Channel::Heat => &self.heat,
            Channel::Fan => &self.fan,
        }
    }

    pub fn channel(&self, channel: Channel) -> ChannelState {
        self.record(channel).state
    }

    pub fn is_on(&self, channel: Channel) -> bool {
        self.channel(channel).is_on()
    }

    /// True when either climate channel is energised.
    pub fn climate_on(&self) -> bool {
        self.is_on(Channel::Ac) || self.is_on(Channel::Heat)
    }

    pub fn mod_ts(&self, channel: Channel) -> u64 {
        self.record(channel).mod_ts
    }

    pub fn uptime(&self, channel: Channel) -> u64 {
        self.record(channel).uptime
    }

    /// Apply a transition. Only the relay actuator calls this, after the
    /// bus write has settled.
    pub(crate) fn record_transition(&mut self, channel: Channel, on: bool, now: u64) {
        let rec = match channel {
            Channel::Ac => &mut self.ac,
            Channel::Heat => &mut self.heat,
            Channel::Fan => &mut self.fan,
        };
        rec.transition(on, now);
        debug_assert!(
            !(self.ac.state.is_on() && self.heat.state.is_on()),
            "AC and Heat energised simultaneously"
        );
        debug_assert!(
            self.fan.state.is_on() || !(self.ac.state.is_on() || self.heat.state.is_on()),
            "climate channel energised with the fan off"
        );
    }
}
