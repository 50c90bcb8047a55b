//! # motobridge-app
//!
//! Application layer — the protocol engine and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `Central` / `Link` — BLE discovery, link and GATT access
//!   - `TransportCapabilities` — platform-specific bond and cache handling
//!   - `TelemetryPublisher` — the message broker sink
//!   - `SampleRecorder` — the recording sink
//! - Implement the protocol core without IO (`engine`): command channel,
//!   register polling state machines, connection state and authorization
//! - Drive that core on a single event loop (`session`) and own the link
//!   lifecycle (`manager`)
//!
//! ## Dependency rule
//! Depends on `motobridge-domain` only (plus `tokio` for channels and timers).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod command_channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod manager;
pub mod poller;
pub mod ports;
pub mod session;
mod timer;

#[cfg(test)]
pub(crate) mod testing;
