//! # motobridge-adapter-ble
//!
//! BLE adapter — implements the transport ports of `motobridge-app` on top
//! of `btleplug`.
//!
//! ## How it works
//!
//! The bridge exposes a Nordic UART service. [`BtleCentral`] scans for
//! peripherals advertising it and opens a [`BtleLink`], which subscribes to
//! the notify characteristic and writes frames to the write characteristic
//! with response, so a write resolves only once the peripheral acknowledged
//! it.
//!
//! | Characteristic | UUID | Direction |
//! |----------------|------|-----------|
//! | Service | `6e400001-…` | |
//! | Write | `6e400002-…` | central → bridge |
//! | Notify | `6e400003-…` | bridge → central |
//!
//! ## Dependency rule
//!
//! Same as other adapters: depends on `motobridge-app` and
//! `motobridge-domain`.

mod capabilities;
mod central;
mod config;
mod error;
mod link;

pub use capabilities::BtleCapabilities;
pub use central::BtleCentral;
pub use config::BleConfig;
pub use error::BleError;
pub use link::BtleLink;
