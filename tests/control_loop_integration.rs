//! Integration tests: ControlLoop → rules → actuator, against the
//! simulation adapters.

#![cfg(not(target_os = "espidf"))]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use climastat::actuator::{relay_frame, RelayActuator};
use climastat::adapters::dht::DhtSensor;
use climastat::adapters::mqtt::MqttAdapter;
use climastat::adapters::nvs::NvsAdapter;
use climastat::adapters::relay_uart::RelayUart;
use climastat::app::ports::{
    ConfigStorePort, DelayPort, MessageBus, RelayBus, SensorPort, TimeSource,
};
use climastat::app::service::ControlLoop;
use climastat::clock::ClockSync;
use climastat::config::{Config, Mode, RuleState};
use climastat::error::{ActuatorError, ClockError, Error, SensorError};
use climastat::state::{Channel, SensorReading};

// ── Test doubles ──────────────────────────────────────────────

/// Wall clock the test can step from outside the loop.
#[derive(Clone)]
struct TestClock(Arc<AtomicU64>);

impl TestClock {
    fn new(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

impl TimeSource for TestClock {
    fn wall_clock_secs(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn sync(&mut self) -> Result<i64, ClockError> {
        Ok(0)
    }
}

/// The sensor and relay sims glued into the single hardware object the
/// control loop expects.
struct TestHw {
    dht: DhtSensor,
    relay: RelayUart,
}

impl TestHw {
    fn new() -> Self {
        Self {
            dht: DhtSensor::new(),
            relay: RelayUart::new(),
        }
    }
}

impl SensorPort for TestHw {
    fn measure(&mut self) -> Result<SensorReading, SensorError> {
        self.dht.measure()
    }
}

impl RelayBus for TestHw {
    fn write_frame(&mut self, frame: [u8; 4]) -> Result<(), ActuatorError> {
        self.relay.write_frame(frame)
    }
}

impl DelayPort for TestHw {
    fn delay_ms(&mut self, ms: u32) {
        self.relay.delay_ms(ms);
    }
}

struct Rig {
    hw: TestHw,
    bus: MqttAdapter,
    nvs: NvsAdapter,
    clock: TestClock,
    control: ControlLoop<TestClock>,
}

/// Booted controller with the given initial reading, ready to cycle.
fn rig(temp: i16, humid: i16) -> Rig {
    let mut hw = TestHw::new();
    hw.dht.set_reading(temp, humid);
    let bus = MqttAdapter::new();
    let clock = TestClock::new(1_000_000);
    let control = ControlLoop::with_actuator(
        Config::default(),
        ClockSync::new(clock.clone()),
        RelayActuator::with_settle_ms(1),
    );

    let mut rig = Rig {
        hw,
        bus,
        nvs: NvsAdapter::new().unwrap(),
        clock,
        control,
    };
    rig.control.startup(&mut rig.hw, &mut rig.bus).unwrap();
    rig
}

impl Rig {
    fn cycle(&mut self) {
        self.clock.advance(10);
        self.control
            .cycle(&mut self.hw, &mut self.bus, &self.nvs)
            .unwrap();
    }

    fn send(&mut self, subtopic: &str, payload: &str) {
        let topic = format!("home/climastat/control/{subtopic}");
        self.bus.inject(&topic, payload.as_bytes());
        self.cycle();
    }

    fn topic_count(&self, suffix: &str) -> usize {
        self.bus
            .published_topics()
            .iter()
            .filter(|t| t.ends_with(suffix))
            .count()
    }
}

// ── Startup ───────────────────────────────────────────────────

#[test]
fn startup_drives_all_relays_off_and_advertises_state() {
    let rig = rig(220, 500);

    assert_eq!(
        rig.hw.relay.frames,
        vec![
            relay_frame(Channel::Ac, false),
            relay_frame(Channel::Heat, false),
            relay_frame(Channel::Fan, false),
        ]
    );
    assert_eq!(rig.bus.subscriptions, vec!["home/climastat/control/+"]);
    assert_eq!(rig.topic_count("info/state"), 1);
}

// ── Demand and release ────────────────────────────────────────

#[test]
fn hot_room_turns_on_fan_then_ac() {
    // Default cooling target 28.0°C / 60%; 30.0°C is over by the margin.
    let mut rig = rig(300, 750);
    rig.cycle();

    assert!(rig.control.state().is_on(Channel::Fan));
    assert!(rig.control.state().is_on(Channel::Ac));
    assert_eq!(
        rig.hw.relay.frames[3..],
        [relay_frame(Channel::Fan, true), relay_frame(Channel::Ac, true)]
    );

    // Telemetry order mirrors the physical sequence.
    let topics = rig.bus.published_topics();
    let fan_on = topics.iter().rposition(|t| t.ends_with("info/fan")).unwrap();
    let ac_on = topics.iter().rposition(|t| t.ends_with("info/ac")).unwrap();
    assert!(fan_on < ac_on);
}

#[test]
fn satisfied_room_releases_ac_then_fan_follows_auto() {
    let mut rig = rig(300, 750);
    rig.cycle();
    let frames_on = rig.hw.relay.frames.len();

    // Under both release thresholds.
    rig.hw.dht.set_reading(270, 550);
    rig.cycle();

    assert!(!rig.control.state().is_on(Channel::Ac));
    assert!(!rig.control.state().is_on(Channel::Fan));
    assert_eq!(
        rig.hw.relay.frames[frames_on..],
        [relay_frame(Channel::Ac, false), relay_frame(Channel::Fan, false)]
    );
}

#[test]
fn setpoint_flips_in_one_cycle_never_open_the_fan_under_climate() {
    let mut rig = rig(300, 750);
    rig.cycle();
    assert!(rig.control.state().is_on(Channel::Ac));

    // Two setpoint changes land in the same cycle: the first releases
    // the AC, the second re-creates demand one quantum later. The fan
    // vote from the release must not be applied under the restarted AC.
    rig.bus.inject(
        "home/climastat/control/ac",
        br#"{"temp": 35.0, "humid": 90.0}"#,
    );
    rig.bus.inject(
        "home/climastat/control/ac",
        br#"{"temp": 25.0, "humid": 50.0}"#,
    );
    rig.cycle();

    // Replay the frame history: a climate relay is never closed while
    // the fan relay is open.
    let (mut ac, mut heat, mut fan) = (false, false, false);
    for frame in &rig.hw.relay.frames {
        match frame[1] {
            1 => ac = frame[2] == 1,
            2 => fan = frame[2] == 1,
            3 => heat = frame[2] == 1,
            _ => {}
        }
        assert!(
            fan || !(ac || heat),
            "climate energised with the fan open: {frame:?}"
        );
    }
    assert!(rig.control.state().is_on(Channel::Ac));
    assert!(rig.control.state().is_on(Channel::Fan));
}

#[test]
fn within_hysteresis_band_nothing_moves() {
    // 28.1°C is over target but inside the on margin.
    let mut rig = rig(281, 601);
    rig.cycle();

    assert_eq!(rig.hw.relay.frames.len(), 3, "only the startup writes");
}

#[test]
fn ac_uptime_accumulates_across_on_off() {
    let mut rig = rig(300, 750);
    rig.cycle();
    rig.hw.dht.set_reading(270, 550);
    rig.cycle();

    assert!(rig.control.state().uptime(Channel::Ac) > 0);
}

// ── Commands ──────────────────────────────────────────────────

#[test]
fn setpoint_command_takes_effect_within_the_cycle() {
    let mut rig = rig(300, 750);
    rig.cycle();
    assert!(rig.control.state().is_on(Channel::Ac));

    // Raise the target above the room; demand disappears.
    rig.send("ac", r#"{"temp": 31.0, "humid": 80.0}"#);

    assert!(!rig.control.state().is_on(Channel::Ac));
    assert_eq!(
        rig.control.config().ac_rules[0].temp,
        Some(310),
        "fractional degrees arrive as tenths"
    );
}

#[test]
fn fan_on_command_runs_the_fan_without_climate() {
    let mut rig = rig(220, 500);
    rig.send("fan", r#"{"state":"on"}"#);

    assert!(rig.control.state().is_on(Channel::Fan));
    assert!(!rig.control.state().climate_on());

    rig.send("fan", r#"{"state":"auto"}"#);
    assert!(!rig.control.state().is_on(Channel::Fan));
}

#[test]
fn mode_switch_rejected_while_climate_energised() {
    let mut rig = rig(300, 750);
    rig.cycle();
    assert!(rig.control.state().is_on(Channel::Ac));

    rig.send("mode", r#"{"state":"heating"}"#);

    assert_eq!(rig.control.config().mode, Mode::Cooling);
    assert!(rig.control.state().is_on(Channel::Ac));
}

#[test]
fn mode_switch_when_idle_parks_setpoints_at_current_reading() {
    let mut rig = rig(220, 500);
    rig.cycle();

    rig.send("mode", r#"{"state":"heating"}"#);

    assert_eq!(rig.control.config().mode, Mode::Heating);
    let rule = &rig.control.config().heat_rules[0];
    assert_eq!(rule.state, RuleState::On);
    assert_eq!(rule.temp, Some(220));
    assert_eq!(rule.humid, Some(500));
    // Parked at the reading: no demand, nothing switches.
    assert!(!rig.control.state().climate_on());
}

#[test]
fn state_query_publishes_a_snapshot() {
    let mut rig = rig(220, 500);
    let before = rig.topic_count("info/state");
    rig.send("state", "");
    assert_eq!(rig.topic_count("info/state"), before + 1);
}

#[test]
fn unknown_command_is_dropped_quietly() {
    let mut rig = rig(220, 500);
    let before = rig.topic_count("info/state");
    rig.send("reboot", "{}");

    assert_eq!(rig.topic_count("info/state"), before);
    assert!(!rig.control.state().climate_on());
}

// ── Presets ───────────────────────────────────────────────────

#[test]
fn preset_roundtrip_restores_rules_and_persists() {
    let mut rig = rig(220, 500);
    rig.send("ac", r#"{"temp": 25.0, "humid": 55.0}"#);
    rig.send("store_preset", r#"{"index":1}"#);

    // Stored immediately, not just at shutdown.
    let stored = rig.nvs.load().unwrap();
    assert_eq!(stored.presets[1].ac[0].temp, Some(250));

    rig.send("ac", r#"{"temp": 30.0}"#);
    assert_eq!(rig.control.config().ac_rules[0].temp, Some(300));

    rig.send("apply_preset", r#"{"index":1}"#);
    assert_eq!(rig.control.config().ac_rules[0].temp, Some(250));
    assert_eq!(rig.control.config().ac_rules[0].humid, Some(550));
}

#[test]
fn out_of_range_preset_index_clamps_to_last_slot() {
    let mut rig = rig(220, 500);
    rig.send("store_preset", r#"{"index":99}"#);
    let stored = rig.nvs.load().unwrap();
    assert!(!stored.presets[3].ac.is_empty());
}

// ── Resilience ────────────────────────────────────────────────

#[test]
fn sensor_dropout_keeps_previous_reading_and_relays() {
    let mut rig = rig(300, 750);
    rig.cycle();
    let sensor_publishes = rig.topic_count("info/sensor");

    rig.hw.dht.fail_next(100);
    rig.cycle();

    // Stale reading retained; AC keeps cooling.
    assert_eq!(
        rig.control.state().sensor,
        Some(SensorReading {
            temp: 300,
            humid: 750
        })
    );
    assert!(rig.control.state().is_on(Channel::Ac));
    assert_eq!(rig.topic_count("info/sensor"), sensor_publishes);
}

#[test]
fn broker_outage_does_not_stop_climate_control() {
    let mut hw = TestHw::new();
    hw.dht.set_reading(300, 750);
    let mut bus = MqttAdapter::new();
    bus.set_fail_connects(true);
    let clock = TestClock::new(1_000_000);
    let mut control = ControlLoop::with_actuator(
        Config::default(),
        ClockSync::new(clock.clone()),
        RelayActuator::with_settle_ms(1),
    );
    let nvs = NvsAdapter::new().unwrap();

    control.startup(&mut hw, &mut bus).unwrap();
    control.cycle(&mut hw, &mut bus, &nvs).unwrap();

    assert!(control.state().is_on(Channel::Ac), "relays run bus-blind");
    assert!(bus.published.is_empty());

    // Broker comes back; one cycle reconnects, the next resumes telemetry.
    bus.set_fail_connects(false);
    control.cycle(&mut hw, &mut bus, &nvs).unwrap();
    assert!(bus.is_connected());
    control.cycle(&mut hw, &mut bus, &nvs).unwrap();
    assert!(bus.published.iter().any(|(t, _)| t.ends_with("info/sensor")));
}

#[test]
fn relay_write_failure_is_fatal() {
    let mut rig = rig(300, 750);
    rig.hw.relay.sever();
    rig.clock.advance(10);

    let err = rig
        .control
        .cycle(&mut rig.hw, &mut rig.bus, &rig.nvs)
        .unwrap_err();
    assert_eq!(err, Error::Actuator(ActuatorError::BusWriteFailed));
}
