//! Adapters — concrete implementations of the port traits.
//!
//! | Adapter      | Implements        | Connects to                  |
//! |--------------|-------------------|------------------------------|
//! | `dht`        | SensorPort        | DHT22 on a GPIO pin          |
//! | `relay_uart` | RelayBus          | Relay board over UART        |
//! |              | DelayPort         | FreeRTOS task delay          |
//! | `mqtt`       | MessageBus        | MQTT broker over TCP         |
//! | `sntp`       | TimeSource        | SNTP / system wall clock     |
//! | `nvs`        | ConfigStorePort   | NVS / in-memory store        |
//! |              | StoragePort       |                              |
//! | `wifi`       | (bring-up only)   | ESP-IDF WiFi STA             |
//!
//! Every adapter carries a `cfg(not(target_os = "espidf"))` simulation
//! backend so the library and its tests build on the host.

pub mod dht;
pub mod mqtt;
pub mod nvs;
pub mod relay_uart;
pub mod sntp;
pub mod wifi;
