//! Climastat firmware library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod actuator;
pub mod app;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod rules;
pub mod state;

// ESP-IDF-backed implementations live here; each file carries a host-side
// simulation backend so the crate compiles and tests everywhere.
pub mod adapters;
