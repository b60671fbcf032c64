//! Persisted controller configuration.
//!
//! Broker identity, per-channel rule lists, hysteresis margins and preset
//! slots. Values survive restarts via the [`ConfigStorePort`] adapter
//! (NVS on target) and are overwritten at runtime by `control/*` messages.
//!
//! All temperatures and humidities are fixed-point **tenths** of a degree
//! Celsius / percent RH. Fractional setpoints arriving over the bus are
//! converted once at the parse boundary and never handled as floats again,
//! so hysteresis comparisons are exact.
//!
//! [`ConfigStorePort`]: crate::app::ports::ConfigStorePort

use serde::{Deserialize, Serialize};

/// Maximum rules per channel. One active rule per channel in practice; the
/// list form leaves room for schedule-style extensions.
pub const MAX_RULES: usize = 4;

/// Number of recallable preset slots.
pub const PRESET_SLOTS: usize = 4;

/// A channel's ordered rule list.
pub type RuleList = heapless::Vec<Rule, MAX_RULES>;

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// Desired state carried by a rule.
///
/// `On`/`Off` apply to climate channels (an `Off` rule is inert); `Auto` is
/// fan-only and slaves the fan to the climate channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleState {
    On,
    Off,
    Auto,
}

/// One configured condition, evaluated every control cycle.
///
/// `temp` and `humid` are optional targets in tenths. A rule with neither
/// never votes; with both, each signal votes independently (see
/// [`rules`](crate::rules) for the tally policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub state: RuleState,
    #[serde(default)]
    pub temp: Option<i16>,
    #[serde(default)]
    pub humid: Option<i16>,
}

impl Rule {
    /// Active climate setpoint rule.
    pub const fn climate(temp: Option<i16>, humid: Option<i16>) -> Self {
        Self {
            state: RuleState::On,
            temp,
            humid,
        }
    }

    /// Fan rule with no targets.
    pub const fn fan(state: RuleState) -> Self {
        Self {
            state,
            temp: None,
            humid: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Mode & presets
// ---------------------------------------------------------------------------

/// Which climate channel the rule engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Cooling,
    Heating,
}

/// A saved snapshot of the three rule lists, recallable by index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub fan: RuleList,
    #[serde(default)]
    pub ac: RuleList,
    #[serde(default)]
    pub heat: RuleList,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// The persisted configuration document.
///
/// Every field carries a `serde(default)` so a partial or corrupted stored
/// document degrades field-wise to the built-in defaults instead of failing
/// the whole load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// MQTT broker host or address.
    #[serde(default = "default_broker")]
    pub broker_addr: heapless::String<64>,

    /// Topic prefix for every inbound and outbound message.
    #[serde(default = "default_topic_root")]
    pub topic_root: heapless::String<64>,

    /// Active climate mode.
    #[serde(default = "default_mode")]
    pub mode: Mode,

    #[serde(default = "default_ac_rules")]
    pub ac_rules: RuleList,
    #[serde(default = "default_heat_rules")]
    pub heat_rules: RuleList,
    #[serde(default = "default_fan_rules")]
    pub fan_rules: RuleList,

    /// Hysteresis margins, tenths. A channel turns on at
    /// `target + hi` (cooling) / `target - lo` (heating) and the inverse
    /// for off, so the dead band is `lo + hi` wide.
    #[serde(default = "default_margin")]
    pub temp_lo_threshold: i16,
    #[serde(default = "default_margin")]
    pub temp_hi_threshold: i16,
    #[serde(default = "default_margin")]
    pub humid_lo_threshold: i16,
    #[serde(default = "default_margin")]
    pub humid_hi_threshold: i16,

    #[serde(default = "default_presets")]
    pub presets: [Preset; PRESET_SLOTS],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_addr: default_broker(),
            topic_root: default_topic_root(),
            mode: default_mode(),
            ac_rules: default_ac_rules(),
            heat_rules: default_heat_rules(),
            fan_rules: default_fan_rules(),
            temp_lo_threshold: default_margin(),
            temp_hi_threshold: default_margin(),
            humid_lo_threshold: default_margin(),
            humid_hi_threshold: default_margin(),
            presets: default_presets(),
        }
    }
}

impl Config {
    /// Fill any empty rule list and fix up the topic root.
    ///
    /// Called after every load so the rest of the firmware can assume a
    /// fully defined document.
    pub fn normalize(&mut self) {
        if self.fan_rules.is_empty() {
            self.fan_rules = default_fan_rules();
        }
        if self.ac_rules.is_empty() {
            self.ac_rules = default_ac_rules();
        }
        if self.heat_rules.is_empty() {
            self.heat_rules = default_heat_rules();
        }
        if !self.topic_root.ends_with('/') {
            let _ = self.topic_root.push('/');
        }
    }

    /// The rule list driving the given climate mode.
    pub fn climate_rules(&self, mode: Mode) -> &RuleList {
        match mode {
            Mode::Cooling => &self.ac_rules,
            Mode::Heating => &self.heat_rules,
        }
    }

    /// Mutable access to the rule list driving the given climate mode.
    pub fn climate_rules_mut(&mut self, mode: Mode) -> &mut RuleList {
        match mode {
            Mode::Cooling => &mut self.ac_rules,
            Mode::Heating => &mut self.heat_rules,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn str_into<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    let _ = out.push_str(s);
    out
}

fn default_broker() -> heapless::String<64> {
    str_into("192.168.8.200")
}

fn default_topic_root() -> heapless::String<64> {
    str_into("home/climastat/")
}

fn default_mode() -> Mode {
    Mode::Cooling
}

// Default setpoints deliberately carry both a temp and a humid target: the
// off decision needs both signals to vote (see rules module), so a rule
// without a humid target would keep its channel latched on.

fn default_ac_rules() -> RuleList {
    let mut rules = RuleList::new();
    let _ = rules.push(Rule::climate(Some(280), Some(600)));
    rules
}

fn default_heat_rules() -> RuleList {
    let mut rules = RuleList::new();
    let _ = rules.push(Rule::climate(Some(180), Some(700)));
    rules
}

fn default_fan_rules() -> RuleList {
    let mut rules = RuleList::new();
    let _ = rules.push(Rule::fan(RuleState::Auto));
    rules
}

fn default_margin() -> i16 {
    4
}

fn default_presets() -> [Preset; PRESET_SLOTS] {
    core::array::from_fn(|_| Preset {
        fan: default_fan_rules(),
        ac: default_ac_rules(),
        heat: default_heat_rules(),
    })
}
