//! MQTT message bus adapter.
//!
//! Implements [`MessageBus`] for the broker connection.
//!
//! - **`target_os = "espidf"`** — `EspMqttClient` plus a receiver thread
//!   that drains connection events into a bounded inbound queue. The
//!   connection flag is owned here: publish failures and connection-lost
//!   events mark the bus down, and the control loop calls
//!   [`connect`](MessageBus::connect) again on its next poll.
//! - **all other targets** — queue-backed simulation with fault
//!   injection for tests.
//!
//! QoS is at-most-once throughout; telemetry is periodic, so a lost
//! sample is superseded within ten seconds anyway.

#[cfg(target_os = "espidf")]
use log::warn;

use crate::app::ports::{InboundMessage, MessageBus};
use crate::error::CommsError;

#[cfg(target_os = "espidf")]
use std::collections::VecDeque;
#[cfg(target_os = "espidf")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(target_os = "espidf")]
use std::sync::{Arc, Mutex};

#[cfg(target_os = "espidf")]
use esp_idf_svc::mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration, QoS};

/// Messages beyond this are dropped before parsing.
#[cfg(target_os = "espidf")]
const MAX_PAYLOAD_BYTES: usize = 256;

/// Inbound queue depth; the control loop drains one message per 500 ms
/// quantum, so anything deeper than this is a misbehaving publisher.
#[cfg(target_os = "espidf")]
const INBOUND_QUEUE_DEPTH: usize = 8;

const CLIENT_ID: &str = "climastat";

#[cfg(target_os = "espidf")]
pub struct MqttAdapter {
    broker_addr: heapless::String<64>,
    client: Option<EspMqttClient<'static>>,
    inbound: Arc<Mutex<VecDeque<InboundMessage>>>,
    connected: Arc<AtomicBool>,
}

#[cfg(target_os = "espidf")]
impl MqttAdapter {
    pub fn new(broker_addr: &str) -> Self {
        let mut addr = heapless::String::new();
        let _ = addr.push_str(broker_addr);
        Self {
            broker_addr: addr,
            client: None,
            inbound: Arc::new(Mutex::new(VecDeque::new())),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[cfg(target_os = "espidf")]
impl MessageBus for MqttAdapter {
    fn connect(&mut self) -> Result<(), CommsError> {
        // Drop any previous session first; the receiver thread exits when
        // its connection handle errors out.
        self.client = None;
        self.connected.store(false, Ordering::Relaxed);
        self.inbound.lock().unwrap().clear();

        let url = format!("mqtt://{}", self.broker_addr);
        let conf = MqttClientConfiguration {
            client_id: Some(CLIENT_ID),
            ..Default::default()
        };

        let (client, mut conn) =
            EspMqttClient::new(&url, &conf).map_err(|_| CommsError::ConnectFailed)?;

        let inbound = Arc::clone(&self.inbound);
        let connected = Arc::clone(&self.connected);
        std::thread::Builder::new()
            .name("mqtt-rx".into())
            .stack_size(6 * 1024)
            .spawn(move || loop {
                match conn.next() {
                    Ok(event) => match event.payload() {
                        EventPayload::Connected(_) => connected.store(true, Ordering::Relaxed),
                        EventPayload::Disconnected => connected.store(false, Ordering::Relaxed),
                        EventPayload::Received {
                            topic: Some(topic),
                            data,
                            ..
                        } => {
                            if data.len() > MAX_PAYLOAD_BYTES || topic.len() > 96 {
                                warn!("dropping oversized message on {topic}");
                                continue;
                            }
                            let mut t = heapless::String::new();
                            let _ = t.push_str(topic);
                            let mut p = heapless::Vec::new();
                            let _ = p.extend_from_slice(data);
                            let mut queue = inbound.lock().unwrap();
                            if queue.len() >= INBOUND_QUEUE_DEPTH {
                                queue.pop_front();
                            }
                            queue.push_back(InboundMessage {
                                topic: t,
                                payload: p,
                            });
                        }
                        _ => {}
                    },
                    Err(_) => {
                        // Session gone (or client dropped); this thread's
                        // work is done.
                        connected.store(false, Ordering::Relaxed);
                        break;
                    }
                }
            })
            .map_err(|_| CommsError::ConnectFailed)?;

        self.client = Some(client);
        // The Connected event arrives asynchronously; treat the session as
        // up from here and let the first failed operation mark it down.
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn subscribe(&mut self, pattern: &str) -> Result<(), CommsError> {
        let client = self.client.as_mut().ok_or(CommsError::Disconnected)?;
        client.subscribe(pattern, QoS::AtMostOnce).map_err(|_| {
            self.connected.store(false, Ordering::Relaxed);
            CommsError::SubscribeFailed
        })?;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), CommsError> {
        let client = self.client.as_mut().ok_or(CommsError::Disconnected)?;
        client
            .enqueue(topic, QoS::AtMostOnce, false, payload)
            .map_err(|_| {
                self.connected.store(false, Ordering::Relaxed);
                CommsError::PublishFailed
            })?;
        Ok(())
    }

    fn check_incoming(&mut self) -> Result<Option<InboundMessage>, CommsError> {
        if !self.is_connected() {
            return Err(CommsError::Disconnected);
        }
        Ok(self.inbound.lock().unwrap().pop_front())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::Relaxed)
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation backend
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
pub struct MqttAdapter {
    pub published: Vec<(String, Vec<u8>)>,
    pub subscriptions: Vec<String>,
    inbound: std::collections::VecDeque<InboundMessage>,
    connected: bool,
    fail_connects: bool,
    fail_publishes: bool,
}

#[cfg(not(target_os = "espidf"))]
impl MqttAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound message as if the broker delivered it.
    pub fn inject(&mut self, topic: &str, payload: &[u8]) {
        let mut t = heapless::String::new();
        let _ = t.push_str(topic);
        let mut p = heapless::Vec::new();
        let _ = p.extend_from_slice(payload);
        self.inbound.push_back(InboundMessage {
            topic: t,
            payload: p,
        });
    }

    pub fn set_fail_connects(&mut self, fail: bool) {
        self.fail_connects = fail;
    }

    pub fn set_fail_publishes(&mut self, fail: bool) {
        self.fail_publishes = fail;
    }

    /// Topics published so far, in order.
    pub fn published_topics(&self) -> Vec<&str> {
        self.published.iter().map(|(t, _)| t.as_str()).collect()
    }
}

#[cfg(not(target_os = "espidf"))]
impl MessageBus for MqttAdapter {
    fn connect(&mut self) -> Result<(), CommsError> {
        if self.fail_connects {
            return Err(CommsError::ConnectFailed);
        }
        self.connected = true;
        Ok(())
    }

    fn subscribe(&mut self, pattern: &str) -> Result<(), CommsError> {
        if !self.connected {
            return Err(CommsError::Disconnected);
        }
        self.subscriptions.push(pattern.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), CommsError> {
        if self.fail_publishes || !self.connected {
            self.connected = false;
            return Err(CommsError::PublishFailed);
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn check_incoming(&mut self) -> Result<Option<InboundMessage>, CommsError> {
        if !self.connected {
            return Err(CommsError::Disconnected);
        }
        Ok(self.inbound.pop_front())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn publish_failure_marks_the_connection_down() {
        let mut bus = MqttAdapter::new();
        bus.connect().unwrap();
        assert!(bus.is_connected());

        bus.set_fail_publishes(true);
        assert_eq!(
            bus.publish("t", b"x"),
            Err(CommsError::PublishFailed)
        );
        assert!(!bus.is_connected());
    }

    #[test]
    fn injected_messages_drain_in_order() {
        let mut bus = MqttAdapter::new();
        bus.connect().unwrap();
        bus.inject("a", b"1");
        bus.inject("b", b"2");

        assert_eq!(bus.check_incoming().unwrap().unwrap().topic.as_str(), "a");
        assert_eq!(bus.check_incoming().unwrap().unwrap().topic.as_str(), "b");
        assert_eq!(bus.check_incoming().unwrap(), None);
    }
}
