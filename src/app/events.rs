//! Outbound telemetry events.
//!
//! The control loop and relay actuator emit these through the
//! [`EventSink`] port. The production sink serialises them to JSON and
//! publishes under `topic_root/info/*`; tests plug in a recording sink.
//!
//! Emission happens strictly **after** the corresponding transition has
//! been applied to [`DeviceState`], so a published event always describes
//! durable state.
//!
//! [`DeviceState`]: crate::state::DeviceState

use log::{info, warn};
use serde_json::json;

use crate::config::Config;
use crate::state::{tenths_to_float, Channel, ChannelState, DeviceState, SensorReading};

use super::ports::MessageBus;

/// Structured events emitted by the control core.
#[derive(Debug, Clone, Copy)]
pub enum AppEvent<'a> {
    /// A relay channel transitioned; carries the post-transition record.
    Channel {
        channel: Channel,
        state: ChannelState,
        mod_ts: u64,
        uptime: u64,
    },

    /// A fresh sensor acquisition.
    Sensor(SensorReading),

    /// Full state + config snapshot (startup, `control/state`, and after
    /// every mutating command).
    Snapshot(&'a DeviceState, &'a Config),
}

/// Where events go. The domain does not know or care.
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent<'_>);
}

// ───────────────────────────────────────────────────────────────
// Bus-backed sink
// ───────────────────────────────────────────────────────────────

/// Sink that publishes events as timestamped JSON over the message bus.
///
/// Publish failures are logged and otherwise dropped: there is no replay
/// queue, and the bus adapter marks itself disconnected so the control
/// loop reconnects on its next poll.
pub struct BusEventSink<'a, B: MessageBus> {
    bus: &'a mut B,
    topic_root: &'a str,
    /// Wall-clock seconds stamped into every payload.
    now: u64,
}

impl<'a, B: MessageBus> BusEventSink<'a, B> {
    pub fn new(bus: &'a mut B, topic_root: &'a str, now: u64) -> Self {
        Self {
            bus,
            topic_root,
            now,
        }
    }

    fn publish(&mut self, subtopic: &str, mut payload: serde_json::Value) {
        if let Some(map) = payload.as_object_mut() {
            map.insert("ts".into(), json!(self.now));
        }
        let mut topic = heapless::String::<96>::new();
        let _ = topic.push_str(self.topic_root);
        let _ = topic.push_str(subtopic);

        let body = payload.to_string();
        if let Err(e) = self.bus.publish(&topic, body.as_bytes()) {
            // No replay queue; the connection flag drives reconnect.
            warn!("publish {subtopic} failed: {e}");
        }
    }
}

impl<B: MessageBus> EventSink for BusEventSink<'_, B> {
    fn emit(&mut self, event: &AppEvent<'_>) {
        match *event {
            AppEvent::Channel {
                channel,
                state,
                mod_ts,
                uptime,
            } => {
                info!("RELAY | {}={:?} uptime={}s", channel.name(), state, uptime);
                let mut subtopic = heapless::String::<16>::new();
                let _ = subtopic.push_str("info/");
                let _ = subtopic.push_str(channel.name());
                self.publish(
                    &subtopic,
                    json!({
                        "state": state,
                        "mod_ts": mod_ts,
                        "uptime": uptime,
                    }),
                );
            }
            AppEvent::Sensor(reading) => {
                self.publish(
                    "info/sensor",
                    json!({
                        "temp": tenths_to_float(reading.temp),
                        "humid": tenths_to_float(reading.humid),
                    }),
                );
            }
            AppEvent::Snapshot(state, config) => {
                info!("SNAP | publishing full state snapshot");
                self.publish(
                    "info/state",
                    json!({
                        "state": {
                            "device": state,
                            "config": config,
                        },
                    }),
                );
            }
        }
    }
}
