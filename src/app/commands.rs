//! Inbound command parsing.
//!
//! Each known `control/*` subtopic maps to one tagged [`Command`] variant;
//! payloads are JSON. Unknown topics and malformed payloads are
//! recoverable parse errors — the control loop logs and drops them, they
//! never disturb climate control.
//!
//! Setpoints arrive as fractional degrees/percent and are converted to
//! internal fixed-point tenths here, at the boundary.

use core::fmt;

use serde::Deserialize;

use crate::config::{Mode, RuleState};
use crate::state::to_tenths;

/// Commands the outside world can send to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Replace the AC rule set with a single on-rule.
    SetAc { temp: Option<i16>, humid: Option<i16> },
    /// Replace the Heat rule set with a single on-rule.
    SetHeat { temp: Option<i16>, humid: Option<i16> },
    /// Replace the fan rule set (`on` or `auto`).
    SetFan { state: RuleState },
    /// Switch the climate mode.
    SetMode { mode: Mode },
    /// Snapshot current rules into a preset slot and persist.
    StorePreset { index: usize, mode: Option<Mode> },
    /// Recall a preset slot.
    ApplyPreset { index: usize },
    /// Request a full state snapshot publish.
    QueryState,
}

/// Why an inbound message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    UnknownTopic,
    BadPayload,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTopic => write!(f, "unknown control topic"),
            Self::BadPayload => write!(f, "malformed payload"),
        }
    }
}

// ── Wire payload shapes ───────────────────────────────────────

#[derive(Deserialize)]
struct ClimateMsg {
    #[serde(default)]
    temp: Option<f32>,
    #[serde(default)]
    humid: Option<f32>,
}

#[derive(Deserialize)]
struct FanMsg {
    state: RuleState,
}

#[derive(Deserialize)]
struct ModeMsg {
    state: Mode,
}

#[derive(Deserialize)]
struct StorePresetMsg {
    index: usize,
    #[serde(default)]
    mode: Option<Mode>,
}

#[derive(Deserialize)]
struct ApplyPresetMsg {
    index: usize,
}

/// Parse one inbound message. `subtopic` is the part after `control/`.
pub fn parse(subtopic: &str, payload: &[u8]) -> Result<Command, ParseError> {
    match subtopic {
        "ac" | "heat" => {
            let msg: ClimateMsg =
                serde_json::from_slice(payload).map_err(|_| ParseError::BadPayload)?;
            let temp = msg.temp.map(to_tenths);
            let humid = msg.humid.map(to_tenths);
            Ok(if subtopic == "ac" {
                Command::SetAc { temp, humid }
            } else {
                Command::SetHeat { temp, humid }
            })
        }
        "fan" => {
            let msg: FanMsg =
                serde_json::from_slice(payload).map_err(|_| ParseError::BadPayload)?;
            // `off` is not a fan rule; idle is expressed through `auto`.
            if msg.state == RuleState::Off {
                return Err(ParseError::BadPayload);
            }
            Ok(Command::SetFan { state: msg.state })
        }
        "mode" => {
            let msg: ModeMsg =
                serde_json::from_slice(payload).map_err(|_| ParseError::BadPayload)?;
            Ok(Command::SetMode { mode: msg.state })
        }
        "store_preset" => {
            let msg: StorePresetMsg =
                serde_json::from_slice(payload).map_err(|_| ParseError::BadPayload)?;
            Ok(Command::StorePreset {
                index: msg.index,
                mode: msg.mode,
            })
        }
        "apply_preset" => {
            let msg: ApplyPresetMsg =
                serde_json::from_slice(payload).map_err(|_| ParseError::BadPayload)?;
            Ok(Command::ApplyPreset { index: msg.index })
        }
        // Snapshot request carries no payload.
        "state" => Ok(Command::QueryState),
        _ => Err(ParseError::UnknownTopic),
    }
}
