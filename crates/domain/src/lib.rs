//! # motobridge-domain
//!
//! Pure protocol model for the motorcycle ECU bridge.
//!
//! ## Responsibilities
//! - Foundational types: error conventions, timestamps
//! - **Value codec**: unsigned/signed/ASCII extraction from response frames
//! - **Frames**: outbound register requests and inbound binary responses
//! - **Register tables**: telemetry (RLI) and identification (ECU) ids,
//!   their cycle order, decode rules and scaling
//! - **Notifications**: classification of inbound transport messages into
//!   control tokens, device attributes and binary frames
//! - **Telemetry payloads**: the JSON bodies handed to the telemetry sink
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod time;

pub mod codec;
pub mod control;
pub mod frame;
pub mod gatt;
pub mod notification;
pub mod register;
pub mod telemetry;
pub mod value;
