//! Rule evaluation.
//!
//! A pure decision function: (config, device state) → desired transitions.
//! No side effects, no clock, no I/O; called once per poll quantum by the
//! control loop, which applies the result through the relay actuator.
//!
//! ## Vote policy
//!
//! Each active climate rule lets its configured signals vote independently:
//!
//! * temperature votes with the mode's sense (cooling: over target turns
//!   on, under turns off; heating mirrored),
//! * humidity always votes on when over its target and off when under,
//!   regardless of mode.
//!
//! Starting is eager: one on vote fires the channel. Stopping is
//! conservative: **both** signals must vote off (`off_count == 2`), so a
//! single noisy sensor cannot short-cycle the compressor. A consequence
//! kept on purpose: a rule carrying only a temperature target can never
//! collect two off votes, so built-in defaults always configure both
//! targets.

use crate::config::{Config, Mode, Rule, RuleState};
use crate::state::{Channel, DeviceState, SensorReading};

/// One desired channel change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub channel: Channel,
    pub on: bool,
}

/// At most one climate and one fan transition per evaluation.
pub type Transitions = heapless::Vec<Transition, 2>;

/// Evaluate all rules against the current state.
///
/// Climate transitions are emitted before fan transitions so the caller
/// preserves the fan-first/fan-last sequencing when applying them. The
/// fan's auto rule is judged against the *current* climate state, so a
/// climate transition in the same batch stales the fan vote; the caller
/// must re-check it against the post-transition state before applying.
pub fn evaluate(config: &Config, state: &DeviceState) -> Transitions {
    let mut out = Transitions::new();

    if let Some(reading) = state.sensor {
        if let Some(t) = evaluate_climate(config, state, reading) {
            let _ = out.push(t);
        }
    }

    if let Some(t) = evaluate_fan(config, state) {
        let _ = out.push(t);
    }

    out
}

// ---------------------------------------------------------------------------
// Climate
// ---------------------------------------------------------------------------

fn evaluate_climate(
    config: &Config,
    state: &DeviceState,
    reading: SensorReading,
) -> Option<Transition> {
    let channel = match config.mode {
        Mode::Cooling => Channel::Ac,
        Mode::Heating => Channel::Heat,
    };
    let on = state.is_on(channel);

    for rule in config.climate_rules(config.mode) {
        if rule.state != RuleState::On {
            continue;
        }
        let (on_votes, off_votes) = tally(rule, config, reading, on);
        if !on && on_votes >= 1 {
            return Some(Transition { channel, on: true });
        }
        if on && off_votes == 2 {
            return Some(Transition { channel, on: false });
        }
    }
    None
}

/// Count this rule's on/off votes across its configured signals.
fn tally(rule: &Rule, config: &Config, reading: SensorReading, on: bool) -> (u8, u8) {
    let mut on_votes = 0;
    let mut off_votes = 0;

    if let Some(target) = rule.temp {
        let under = reading.temp <= target - config.temp_lo_threshold;
        let over = reading.temp >= target + config.temp_hi_threshold;
        let (wants_on, wants_off) = match config.mode {
            Mode::Cooling => (over, under),
            Mode::Heating => (under, over),
        };
        if !on && wants_on {
            on_votes += 1;
        }
        if on && wants_off {
            off_votes += 1;
        }
    }

    if let Some(target) = rule.humid {
        let under = reading.humid <= target - config.humid_lo_threshold;
        let over = reading.humid >= target + config.humid_hi_threshold;
        // Humidity has one sense only: damp air asks for climate control.
        if !on && over {
            on_votes += 1;
        }
        if on && under {
            off_votes += 1;
        }
    }

    (on_votes, off_votes)
}

// ---------------------------------------------------------------------------
// Fan
// ---------------------------------------------------------------------------

fn evaluate_fan(config: &Config, state: &DeviceState) -> Option<Transition> {
    let fan_on = state.is_on(Channel::Fan);
    let climate_on = state.climate_on();

    for rule in &config.fan_rules {
        match rule.state {
            RuleState::On if !fan_on => {
                return Some(Transition {
                    channel: Channel::Fan,
                    on: true,
                });
            }
            RuleState::Auto if fan_on != climate_on => {
                return Some(Transition {
                    channel: Channel::Fan,
                    on: climate_on,
                });
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleList;

    fn cooling_config(temp: Option<i16>, humid: Option<i16>) -> Config {
        let mut c = Config::default();
        c.mode = Mode::Cooling;
        c.ac_rules = single_rule(temp, humid);
        c
    }

    fn single_rule(temp: Option<i16>, humid: Option<i16>) -> RuleList {
        let mut rules = RuleList::new();
        let _ = rules.push(Rule::climate(temp, humid));
        rules
    }

    fn state_with(reading: SensorReading) -> DeviceState {
        let mut s = DeviceState::new(0);
        s.sensor = Some(reading);
        s
    }

    fn climate_decision(config: &Config, state: &DeviceState) -> Option<Transition> {
        evaluate(config, state)
            .into_iter()
            .find(|t| t.channel != Channel::Fan)
    }

    #[test]
    fn cooling_turns_on_above_target_plus_margin() {
        // target 26.0, margins 0.4 → on at 26.4 and above
        let config = cooling_config(Some(260), None);
        let state = state_with(SensorReading {
            temp: 265,
            humid: 500,
        });
        assert_eq!(
            climate_decision(&config, &state),
            Some(Transition {
                channel: Channel::Ac,
                on: true
            })
        );
    }

    #[test]
    fn cooling_stays_off_inside_dead_band() {
        let config = cooling_config(Some(260), None);
        let state = state_with(SensorReading {
            temp: 262,
            humid: 500,
        });
        assert_eq!(climate_decision(&config, &state), None);
    }

    #[test]
    fn off_needs_both_signals_to_agree() {
        // Channel on, temp well under target but humidity still over its
        // target: only one off vote, so no change.
        let config = cooling_config(Some(260), Some(600));
        let mut state = state_with(SensorReading {
            temp: 255,
            humid: 700,
        });
        state.record_transition(Channel::Fan, true, 0);
        state.record_transition(Channel::Ac, true, 0);
        assert_eq!(climate_decision(&config, &state), None);

        // Humidity drops under target - margin too: both vote off.
        state.sensor = Some(SensorReading {
            temp: 255,
            humid: 590,
        });
        assert_eq!(
            climate_decision(&config, &state),
            Some(Transition {
                channel: Channel::Ac,
                on: false
            })
        );
    }

    #[test]
    fn temp_only_rule_never_votes_off() {
        // With no humidity target the off tally tops out at 1, so the
        // channel latches on from temperature alone.
        let config = cooling_config(Some(260), None);
        let mut state = state_with(SensorReading {
            temp: 200,
            humid: 100,
        });
        state.record_transition(Channel::Fan, true, 0);
        state.record_transition(Channel::Ac, true, 0);
        assert_eq!(climate_decision(&config, &state), None);
    }

    #[test]
    fn single_on_vote_is_sufficient() {
        // Temperature comfortable, humidity over target: starts anyway.
        let config = cooling_config(Some(260), Some(600));
        let state = state_with(SensorReading {
            temp: 260,
            humid: 605,
        });
        assert_eq!(
            climate_decision(&config, &state),
            Some(Transition {
                channel: Channel::Ac,
                on: true
            })
        );
    }

    #[test]
    fn heating_mirrors_cooling_sense() {
        let mut config = Config::default();
        config.mode = Mode::Heating;
        config.heat_rules = single_rule(Some(180), Some(700));

        // Cold room: heat turns on.
        let state = state_with(SensorReading {
            temp: 175,
            humid: 400,
        });
        assert_eq!(
            climate_decision(&config, &state),
            Some(Transition {
                channel: Channel::Heat,
                on: true
            })
        );

        // Warm and dry: both vote off.
        let mut on_state = state_with(SensorReading {
            temp: 185,
            humid: 400,
        });
        on_state.record_transition(Channel::Fan, true, 0);
        on_state.record_transition(Channel::Heat, true, 0);
        assert_eq!(
            climate_decision(&config, &on_state),
            Some(Transition {
                channel: Channel::Heat,
                on: false
            })
        );
    }

    #[test]
    fn inert_rules_never_vote() {
        let mut config = cooling_config(Some(260), Some(600));
        config.ac_rules[0].state = RuleState::Off;
        let state = state_with(SensorReading {
            temp: 300,
            humid: 800,
        });
        assert_eq!(climate_decision(&config, &state), None);

        // A rule with neither target configured is skipped entirely.
        config.ac_rules = single_rule(None, None);
        assert_eq!(climate_decision(&config, &state), None);
    }

    #[test]
    fn fan_on_rule_starts_idle_fan() {
        let mut config = Config::default();
        config.fan_rules = {
            let mut r = RuleList::new();
            let _ = r.push(Rule::fan(RuleState::On));
            r
        };
        let state = DeviceState::new(0);
        let out = evaluate(&config, &state);
        assert_eq!(
            out.as_slice(),
            &[Transition {
                channel: Channel::Fan,
                on: true
            }]
        );
    }

    #[test]
    fn fan_auto_follows_climate_channels() {
        let config = Config::default(); // fan_rules = [auto]

        // Fan left running after climate stopped: auto turns it off.
        let mut state = DeviceState::new(0);
        state.record_transition(Channel::Fan, true, 0);
        let out = evaluate(&config, &state);
        assert_eq!(
            out.as_slice(),
            &[Transition {
                channel: Channel::Fan,
                on: false
            }]
        );

        // Fan and heat both running: auto is satisfied, nothing moves.
        let mut state = DeviceState::new(0);
        state.record_transition(Channel::Fan, true, 0);
        state.record_transition(Channel::Heat, true, 0);
        let out = evaluate(&config, &state);
        assert!(out.is_empty());
    }

    #[test]
    fn no_sensor_reading_skips_climate_not_fan() {
        let mut config = Config::default();
        config.fan_rules = {
            let mut r = RuleList::new();
            let _ = r.push(Rule::fan(RuleState::On));
            r
        };
        let state = DeviceState::new(0); // sensor: None
        let out = evaluate(&config, &state);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].channel, Channel::Fan);
    }

    #[test]
    fn climate_precedes_fan_in_output() {
        let mut config = cooling_config(Some(260), None);
        config.fan_rules = {
            let mut r = RuleList::new();
            let _ = r.push(Rule::fan(RuleState::On));
            r
        };
        let state = state_with(SensorReading {
            temp: 300,
            humid: 500,
        });
        let out = evaluate(&config, &state);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].channel, Channel::Ac);
        assert_eq!(out[1].channel, Channel::Fan);
    }
}
