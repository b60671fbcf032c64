//! Port traits — the boundary between the control core and the outside
//! world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ControlLoop (domain)
//! ```
//!
//! Driven adapters (DHT sensor, relay UART, MQTT client, SNTP, NVS)
//! implement these traits. The [`ControlLoop`](super::service::ControlLoop)
//! consumes them as generic method arguments, so the core never touches
//! hardware or sockets directly and every test runs against mocks.

use crate::config::Config;
use crate::error::{ActuatorError, ClockError, CommsError, SensorError};
use crate::state::SensorReading;

// ───────────────────────────────────────────────────────────────
// Sensor port (driven adapter: hardware → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port for the temperature/humidity sensor.
pub trait SensorPort {
    /// Acquire one reading. May block for up to the sensor's read window
    /// (~2 s on a DHT22). Timeouts are common right after power-up and are
    /// retried by the caller.
    fn measure(&mut self) -> Result<SensorReading, SensorError>;
}

// ───────────────────────────────────────────────────────────────
// Relay bus port (domain → hardware)
// ───────────────────────────────────────────────────────────────

/// Write-side port for the relay board.
///
/// Only the [`RelayActuator`](crate::actuator::RelayActuator) calls this;
/// it serialises writes and inserts the mandatory settle delay, because
/// back-to-back frames are dropped by the board.
pub trait RelayBus {
    fn write_frame(&mut self, frame: [u8; 4]) -> Result<(), ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Delay port
// ───────────────────────────────────────────────────────────────

/// Cooperative blocking delay. Same contract as `embedded_hal`'s delay
/// traits; a separate port so mocks can count elapsed time instead of
/// sleeping.
pub trait DelayPort {
    fn delay_ms(&mut self, ms: u32);
}

// ───────────────────────────────────────────────────────────────
// Message bus port (pub/sub transport)
// ───────────────────────────────────────────────────────────────

/// One inbound message drained from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Full topic as received (including the topic root).
    pub topic: heapless::String<96>,
    pub payload: heapless::Vec<u8, 256>,
}

/// Publish/subscribe transport. Wire encoding and session management live
/// in the adapter; the domain only sees topics and payload bytes.
///
/// Implementations track their own connection health: a failed publish or
/// poll marks the connection down, and the control loop calls
/// [`connect`](MessageBus::connect) again on the next cycle.
pub trait MessageBus {
    fn connect(&mut self) -> Result<(), CommsError>;

    /// Subscribe to a topic filter (e.g. `root/control/+`).
    fn subscribe(&mut self, pattern: &str) -> Result<(), CommsError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), CommsError>;

    /// Non-blocking check for one inbound message.
    fn check_incoming(&mut self) -> Result<Option<InboundMessage>, CommsError>;

    fn is_connected(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Time source port
// ───────────────────────────────────────────────────────────────

/// Wall clock plus the ability to correct it against a network source.
/// The local RTC drifts seconds per minute; [`ClockSync`](crate::clock)
/// bounds the drift by periodic resync through this port.
pub trait TimeSource {
    /// Current wall-clock seconds (Unix epoch).
    fn wall_clock_secs(&self) -> u64;

    /// Query the network time source and step the wall clock. Returns the
    /// observed drift in seconds (positive = local clock was behind).
    fn sync(&mut self) -> Result<i64, ClockError>;
}

// ───────────────────────────────────────────────────────────────
// Configuration store port
// ───────────────────────────────────────────────────────────────

/// Loads and persists the configuration document.
///
/// Implementations must not invent defaults: a missing or unreadable
/// document is reported as an error and the caller decides the fallback.
pub trait ConfigStorePort {
    fn load(&self) -> Result<Config, ConfigStoreError>;
    fn save(&self, config: &Config) -> Result<(), ConfigStoreError>;
}

/// Errors from [`ConfigStorePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStoreError {
    /// No stored document (first boot).
    NotFound,
    /// Stored document failed deserialization.
    Corrupted,
    /// Generic I/O error from the storage backend.
    IoError,
}

impl core::fmt::Display for ConfigStoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Raw storage port (fault log)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage, used by the fault log ring buffer.
/// Keys are namespaced to prevent collisions between subsystems; writes
/// must be atomic (NVS guarantees this natively).
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
