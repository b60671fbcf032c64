//! The control loop — cadence, orchestration and fault policy.
//!
//! Single cooperative thread of control. One outer cycle acquires a
//! sensor reading, publishes telemetry and resyncs the clock; the inner
//! loop then alternates bus polling, a short idle quantum and rule
//! re-evaluation, so setpoint changes from the bus take effect within
//! half a second while the slow DHT is only bothered every ten.
//!
//! Fault policy: sensor, comms and clock faults are soft — logged,
//! retried or deferred, never escalated. Only an unrecovered error (in
//! practice a relay bus write failure) propagates out of [`run`], and the
//! supervisor in `main` treats it as fatal: flush config, delayed hard
//! reset. Continuing with actuators in an unknown state is judged less
//! safe than a restart that re-initialises them to Off.
//!
//! [`run`]: ControlLoop::run

use log::{info, warn};

use crate::actuator::RelayActuator;
use crate::clock::ClockSync;
use crate::config::{Config, Mode, Rule, RuleList, RuleState, PRESET_SLOTS};
use crate::error::Result;
use crate::rules;
use crate::state::{Channel, DeviceState, SensorReading};

use super::commands::{self, Command};
use super::events::{AppEvent, BusEventSink, EventSink};
use super::ports::{
    ConfigStorePort, DelayPort, InboundMessage, MessageBus, RelayBus, SensorPort, TimeSource,
};

/// Outer cycle period: how often the sensor is acquired and its reading
/// published. The DHT22 takes up to 2 s per measure, so this is kept slow.
pub const SENSOR_PERIOD_MS: u32 = 10_000;

/// Inner quantum: bus poll + rule evaluation cadence.
pub const POLL_QUANTUM_MS: u32 = 500;

/// Inner iterations per outer cycle.
pub const INNER_ITERATIONS: u32 = SENSOR_PERIOD_MS / POLL_QUANTUM_MS;

/// In-cycle sensor retry bound; exhausting it keeps the previous reading.
const SENSOR_READ_RETRIES: u32 = 3;

/// The DHT is known to time out the first few reads after power-up.
const STARTUP_SENSOR_RETRIES: u32 = 10;

/// The control loop. Owns [`DeviceState`] and [`Config`] exclusively; all
/// ports arrive as method arguments so the whole loop runs against mocks.
pub struct ControlLoop<T: TimeSource> {
    state: DeviceState,
    config: Config,
    actuator: RelayActuator,
    clock: ClockSync<T>,
}

impl<T: TimeSource> ControlLoop<T> {
    pub fn new(mut config: Config, clock: ClockSync<T>) -> Self {
        config.normalize();
        let state = DeviceState::new(clock.now());
        Self {
            state,
            config,
            actuator: RelayActuator::new(),
            clock,
        }
    }

    /// Test constructor: shrink the settle delay so mocked cycles are cheap.
    pub fn with_actuator(mut config: Config, clock: ClockSync<T>, actuator: RelayActuator) -> Self {
        config.normalize();
        let state = DeviceState::new(clock.now());
        Self {
            state,
            config,
            actuator,
            clock,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// `Starting` phase: sync the clock, warm up the sensor, drive the
    /// relays to a known Off state, bring up the bus and advertise a full
    /// snapshot. Everything here is soft except relay writes.
    pub fn startup(
        &mut self,
        hw: &mut (impl SensorPort + RelayBus + DelayPort),
        bus: &mut impl MessageBus,
    ) -> Result<()> {
        info!("starting up");

        // Trustworthy timestamps before anything is stamped.
        self.clock.sync_now(hw);
        self.state = DeviceState::new(self.clock.now());

        // Sensor warm-up; a reading now avoids a blind first cycle.
        for attempt in 1..=STARTUP_SENSOR_RETRIES {
            match hw.measure() {
                Ok(reading) => {
                    self.state.sensor = Some(reading);
                    break;
                }
                Err(e) => warn!("sensor warm-up read failed ({e}), attempt {attempt}"),
            }
        }

        self.connect_bus(bus);

        // Known actuator state before accepting any command, and the
        // matching telemetry so subscribers agree.
        let now = self.clock.now();
        let mut sink = BusEventSink::new(bus, self.config.topic_root.as_str(), now);
        self.actuator
            .init_all_off(&mut self.state, hw, &mut sink, now)?;

        self.publish_snapshot(bus);
        info!("startup complete, entering control loop");
        Ok(())
    }

    /// `Running` phase: loops forever; returns only with a fatal error.
    pub fn run(
        &mut self,
        hw: &mut (impl SensorPort + RelayBus + DelayPort),
        bus: &mut impl MessageBus,
        store: &impl ConfigStorePort,
    ) -> Result<()> {
        loop {
            self.cycle(hw, bus, store)?;
        }
    }

    /// One outer cycle. Public so tests can drive the loop step by step.
    pub fn cycle(
        &mut self,
        hw: &mut (impl SensorPort + RelayBus + DelayPort),
        bus: &mut impl MessageBus,
        store: &impl ConfigStorePort,
    ) -> Result<()> {
        // 1. Sensor acquisition, bounded retries.
        match self.acquire_reading(hw) {
            Some(reading) => {
                self.state.sensor = Some(reading);
                let now = self.clock.now();
                BusEventSink::new(bus, self.config.topic_root.as_str(), now)
                    .emit(&AppEvent::Sensor(reading));
            }
            None => warn!("sensor retries exhausted, keeping previous reading"),
        }

        // 2. Periodic clock correction (soft).
        self.clock.maybe_resync(hw);

        // 3. Inner loop: drain one message, idle, re-evaluate rules.
        for _ in 0..INNER_ITERATIONS {
            self.service_bus(bus, store);
            hw.delay_ms(POLL_QUANTUM_MS);
            self.apply_rules(hw, bus)?;
        }
        Ok(())
    }

    // ── Sensor ────────────────────────────────────────────────

    fn acquire_reading(
        &mut self,
        hw: &mut impl SensorPort,
    ) -> Option<SensorReading> {
        for attempt in 1..=SENSOR_READ_RETRIES {
            match hw.measure() {
                Ok(reading) => return Some(reading),
                Err(e) => warn!("sensor read failed ({e}), attempt {attempt}/{SENSOR_READ_RETRIES}"),
            }
        }
        None
    }

    // ── Rules ─────────────────────────────────────────────────

    /// Evaluate rules and apply the resulting transitions. Transitions
    /// already satisfied by an earlier side effect in the same pass (the
    /// actuator forcing the fan on) are skipped, preserving the
    /// no-redundant-request precondition. The fan vote was computed
    /// against the pre-batch state, so it is re-checked after the climate
    /// transition lands: a fan-off is void once a climate channel is on.
    fn apply_rules(
        &mut self,
        hw: &mut (impl RelayBus + DelayPort),
        bus: &mut impl MessageBus,
    ) -> Result<()> {
        for t in rules::evaluate(&self.config, &self.state) {
            if self.state.is_on(t.channel) == t.on {
                continue;
            }
            if t.channel == Channel::Fan && !t.on && self.state.climate_on() {
                continue;
            }
            let now = self.clock.now();
            let mut sink = BusEventSink::new(bus, self.config.topic_root.as_str(), now);
            match t.channel {
                Channel::Fan => {
                    self.actuator
                        .set_fan(&mut self.state, hw, &mut sink, t.on, now)?;
                }
                channel => {
                    self.actuator
                        .set_climate(&mut self.state, hw, &mut sink, channel, t.on, now)?;
                }
            }
        }
        Ok(())
    }

    // ── Bus ───────────────────────────────────────────────────

    /// Reconnect if needed, then drain at most one inbound message.
    /// All comms faults are soft.
    fn service_bus(&mut self, bus: &mut impl MessageBus, store: &impl ConfigStorePort) {
        if !bus.is_connected() {
            self.connect_bus(bus);
            if !bus.is_connected() {
                return;
            }
        }

        match bus.check_incoming() {
            Ok(Some(msg)) => self.handle_message(&msg, bus, store),
            Ok(None) => {}
            // Connection marked down by the adapter; next quantum retries.
            Err(e) => warn!("bus poll failed: {e}"),
        }
    }

    fn connect_bus(&mut self, bus: &mut impl MessageBus) {
        if let Err(e) = bus.connect() {
            warn!("broker connect failed: {e}");
            return;
        }
        let mut pattern = heapless::String::<96>::new();
        let _ = pattern.push_str(self.config.topic_root.as_str());
        let _ = pattern.push_str("control/+");
        match bus.subscribe(&pattern) {
            Ok(()) => info!("connected, subscribed to {pattern}"),
            Err(e) => warn!("subscribe failed: {e}"),
        }
    }

    fn handle_message(
        &mut self,
        msg: &InboundMessage,
        bus: &mut impl MessageBus,
        store: &impl ConfigStorePort,
    ) {
        let suffix = msg
            .topic
            .as_str()
            .strip_prefix(self.config.topic_root.as_str())
            .and_then(|s| s.strip_prefix("control/"));

        let Some(suffix) = suffix else {
            warn!("message on unexpected topic {}", msg.topic);
            return;
        };

        match commands::parse(suffix, &msg.payload) {
            Ok(cmd) => {
                info!("command {cmd:?}");
                self.handle_command(cmd, bus, store);
            }
            // Recoverable: log and drop, climate control is unaffected.
            Err(e) => warn!("dropping control/{suffix}: {e}"),
        }
    }

    // ── Commands ──────────────────────────────────────────────

    /// Apply one parsed command. Every mutating command ends in a full
    /// snapshot publish; only `store_preset` persists immediately.
    pub fn handle_command(
        &mut self,
        cmd: Command,
        bus: &mut impl MessageBus,
        store: &impl ConfigStorePort,
    ) {
        match cmd {
            Command::SetAc { temp, humid } => {
                self.config.ac_rules = single_rule(Rule::climate(temp, humid));
            }
            Command::SetHeat { temp, humid } => {
                self.config.heat_rules = single_rule(Rule::climate(temp, humid));
            }
            Command::SetFan { state } => {
                self.config.fan_rules = single_rule(Rule::fan(state));
            }
            Command::SetMode { mode } => {
                if self.state.climate_on() {
                    // Switching sense with a compressor or heater energised
                    // would whiplash the hardware.
                    warn!("mode switch rejected while a climate channel is on");
                    return;
                }
                self.config.mode = mode;
                // Restart from "no demand": park the setpoints at the
                // current reading instead of jumping to a stale target.
                if let Some(reading) = self.state.sensor {
                    if let Some(rule) = self.config.climate_rules_mut(mode).first_mut() {
                        rule.state = RuleState::On;
                        rule.temp = Some(reading.temp);
                        rule.humid = Some(reading.humid);
                    }
                }
            }
            Command::StorePreset { index, mode } => {
                let slot = index.min(PRESET_SLOTS - 1);
                let mode = mode.unwrap_or(self.config.mode);
                let fan = self.config.fan_rules.clone();
                let climate = self.config.climate_rules(mode).clone();
                let preset = &mut self.config.presets[slot];
                preset.fan = fan;
                match mode {
                    Mode::Cooling => preset.ac = climate,
                    Mode::Heating => preset.heat = climate,
                }
                // Presets are the one thing worth flash wear mid-run.
                if let Err(e) = store.save(&self.config) {
                    warn!("config save failed: {e}");
                }
            }
            Command::ApplyPreset { index } => {
                let slot = index.min(PRESET_SLOTS - 1);
                let preset = self.config.presets[slot].clone();
                self.config.fan_rules = preset.fan;
                self.config.ac_rules = preset.ac;
                self.config.heat_rules = preset.heat;
                self.config.normalize();
            }
            Command::QueryState => {}
        }

        self.publish_snapshot(bus);
    }

    fn publish_snapshot(&mut self, bus: &mut impl MessageBus) {
        let now = self.clock.now();
        BusEventSink::new(bus, self.config.topic_root.as_str(), now)
            .emit(&AppEvent::Snapshot(&self.state, &self.config));
    }
}

fn single_rule(rule: Rule) -> RuleList {
    let mut rules = RuleList::new();
    let _ = rules.push(rule);
    rules
}
