//! Property tests: safety invariants hold under arbitrary reading and
//! command sequences.
//!
//! Runs on host only — proptest is not available for ESP32 targets.

#![cfg(not(target_os = "espidf"))]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use climastat::actuator::RelayActuator;
use climastat::adapters::dht::DhtSensor;
use climastat::adapters::mqtt::MqttAdapter;
use climastat::adapters::nvs::NvsAdapter;
use climastat::adapters::relay_uart::RelayUart;
use climastat::app::ports::{DelayPort, RelayBus, SensorPort, TimeSource};
use climastat::app::service::ControlLoop;
use climastat::clock::ClockSync;
use climastat::config::Config;
use climastat::error::{ActuatorError, ClockError, SensorError};
use climastat::state::{to_tenths, Channel, SensorReading};

// ── Test doubles ──────────────────────────────────────────────

#[derive(Clone)]
struct TestClock(Arc<AtomicU64>);

impl TimeSource for TestClock {
    fn wall_clock_secs(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn sync(&mut self) -> Result<i64, ClockError> {
        Ok(0)
    }
}

struct TestHw {
    dht: DhtSensor,
    relay: RelayUart,
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

// ── Step generation ───────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    /// New sensor reading, tenths.
    Reading(i16, i16),
    /// A batch of `control/*` messages queued before one cycle, so
    /// several commands drain across consecutive inner iterations.
    Commands(Vec<(&'static str, String)>),
}

fn command_strategy() -> impl Strategy<Value = (&'static str, String)> {
    prop_oneof![
        1 => Just(("fan", r#"{"state":"on"}"#.to_string())),
        1 => Just(("fan", r#"{"state":"auto"}"#.to_string())),
        1 => Just(("mode", r#"{"state":"cooling"}"#.to_string())),
        1 => Just(("mode", r#"{"state":"heating"}"#.to_string())),
        2 => (200i16..320, 400i16..800).prop_map(|(t, h)| {
            (
                "ac",
                format!(
                    r#"{{"temp": {:.1}, "humid": {:.1}}}"#,
                    f32::from(t) / 10.0,
                    f32::from(h) / 10.0
                ),
            )
        }),
        2 => (100i16..250, 400i16..800).prop_map(|(t, h)| {
            (
                "heat",
                format!(
                    r#"{{"temp": {:.1}, "humid": {:.1}}}"#,
                    f32::from(t) / 10.0,
                    f32::from(h) / 10.0
                ),
            )
        }),
    ]
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => (150i16..350, 300i16..900).prop_map(|(t, h)| Step::Reading(t, h)),
        3 => proptest::collection::vec(command_strategy(), 1..=3).prop_map(Step::Commands),
    ]
}

fn inject_all(bus: &mut MqttAdapter, commands: Vec<(&'static str, String)>) {
    for (subtopic, payload) in commands {
        bus.inject(
            &format!("home/climastat/control/{subtopic}"),
            payload.as_bytes(),
        );
    }
}

proptest! {
    /// AC and Heat are never energised together, the fan always runs
    /// under an energised climate channel, and uptime counters never go
    /// backwards — for any interleaving of readings and commands.
    #[test]
    fn safety_invariants_hold_under_arbitrary_sequences(
        steps in proptest::collection::vec(step_strategy(), 1..25),
    ) {
        let clock = TestClock(Arc::new(AtomicU64::new(1_000_000)));
        let mut hw = TestHw { dht: DhtSensor::new(), relay: RelayUart::new() };
        let mut bus = MqttAdapter::new();
        let nvs = NvsAdapter::new().unwrap();
        let mut control = ControlLoop::with_actuator(
            Config::default(),
            ClockSync::new(clock.clone()),
            RelayActuator::with_settle_ms(1),
        );
        control.startup(&mut hw, &mut bus).unwrap();

        let mut prev_uptime = [0u64; 3];
        for step in steps {
            match step {
                Step::Reading(t, h) => hw.dht.set_reading(t, h),
                Step::Commands(cmds) => inject_all(&mut bus, cmds),
            }
            clock.0.fetch_add(10, Ordering::Relaxed);
            control.cycle(&mut hw, &mut bus, &nvs).unwrap();

            let state = control.state();
            prop_assert!(
                !(state.is_on(Channel::Ac) && state.is_on(Channel::Heat)),
                "AC and Heat energised together"
            );
            if state.climate_on() {
                prop_assert!(state.is_on(Channel::Fan), "climate on without fan");
            }
            for (i, ch) in [Channel::Ac, Channel::Fan, Channel::Heat].iter().enumerate() {
                let up = state.uptime(*ch);
                prop_assert!(up >= prev_uptime[i], "uptime went backwards");
                prev_uptime[i] = up;
            }
        }

        // Post-cycle state can hide a violation window inside a cycle;
        // replaying the frame history cannot.
        let (mut ac, mut heat, mut fan) = (false, false, false);
        for frame in &hw.relay.frames {
            match frame[1] {
                1 => ac = frame[2] == 1,
                2 => fan = frame[2] == 1,
                3 => heat = frame[2] == 1,
                _ => {}
            }
            prop_assert!(
                fan || !(ac || heat),
                "climate energised with the fan open: {:?}",
                frame
            );
        }
    }

    /// The relay bus never sees a redundant frame: consecutive writes to
    /// one relay always toggle its state.
    #[test]
    fn relay_frames_always_toggle(
        steps in proptest::collection::vec(step_strategy(), 1..25),
    ) {
        let clock = TestClock(Arc::new(AtomicU64::new(1_000_000)));
        let mut hw = TestHw { dht: DhtSensor::new(), relay: RelayUart::new() };
        let mut bus = MqttAdapter::new();
        let nvs = NvsAdapter::new().unwrap();
        let mut control = ControlLoop::with_actuator(
            Config::default(),
            ClockSync::new(clock.clone()),
            RelayActuator::with_settle_ms(1),
        );
        control.startup(&mut hw, &mut bus).unwrap();

        for step in steps {
            match step {
                Step::Reading(t, h) => hw.dht.set_reading(t, h),
                Step::Commands(cmds) => inject_all(&mut bus, cmds),
            }
            clock.0.fetch_add(10, Ordering::Relaxed);
            control.cycle(&mut hw, &mut bus, &nvs).unwrap();
        }

        let mut last_state: [Option<u8>; 4] = [None; 4];
        for frame in &hw.relay.frames {
            let (relay, state) = (frame[1] as usize, frame[2]);
            prop_assert!(
                last_state[relay] != Some(state),
                "redundant frame for relay {relay}"
            );
            last_state[relay] = Some(state);
        }
    }

    /// Fixed-point conversion rounds to the nearest tenth and clamps to
    /// the representable window.
    #[test]
    fn to_tenths_rounds_and_clamps(value in -4000.0f32..4000.0) {
        let tenths = to_tenths(value);
        if (-3000.0..=3000.0).contains(&value) {
            let diff = (f32::from(tenths) - value * 10.0).abs();
            prop_assert!(diff <= 0.5 + f32::EPSILON * 10_000.0);
        } else {
            prop_assert!(tenths == 30_000 || tenths == -30_000);
        }
    }
}
