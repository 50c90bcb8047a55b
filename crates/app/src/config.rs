//! Session configuration.

use std::time::Duration;

use serde::Deserialize;

/// Timing and retry knobs of the connection manager and protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a discovery scan runs before giving up, in milliseconds.
    pub scan_window_ms: u64,
    /// Budget from link open to authorization, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Per-register timeout of the telemetry cycle, in milliseconds.
    pub telemetry_timeout_ms: u64,
    /// Per-register timeout of the identification cycle, in milliseconds.
    pub identification_timeout_ms: u64,
    /// Timeout of text commands awaiting an answer (Wi-Fi), in milliseconds.
    pub control_timeout_ms: u64,
    /// How long to wait for `END` delivery before tearing down, in milliseconds.
    pub end_grace_ms: u64,
    /// How long one transport write may take before it counts as failed,
    /// in milliseconds.
    pub write_timeout_ms: u64,
    /// Writes attempted per command, the first one included.
    pub max_write_attempts: u8,
    /// First segment of every broker topic.
    pub topic_prefix: String,
    /// Only discover peripherals whose local name starts with this prefix.
    pub name_prefix: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_window_ms: 3_000,
            connect_timeout_ms: 10_000,
            telemetry_timeout_ms: 500,
            identification_timeout_ms: 1_000,
            control_timeout_ms: 5_000,
            end_grace_ms: 1_000,
            write_timeout_ms: 1_000,
            max_write_attempts: 3,
            topic_prefix: "Beta".to_string(),
            name_prefix: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_millis(self.telemetry_timeout_ms)
    }

    #[must_use]
    pub fn identification_timeout(&self) -> Duration {
        Duration::from_millis(self.identification_timeout_ms)
    }

    #[must_use]
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    #[must_use]
    pub fn end_grace(&self) -> Duration {
        Duration::from_millis(self.end_grace_ms)
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
