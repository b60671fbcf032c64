//! Application core: ports, events, commands and the control loop.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
