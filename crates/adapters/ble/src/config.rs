//! BLE adapter configuration.

use serde::Deserialize;

/// Configuration for the btleplug transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Which host adapter to use, in the order the platform lists them.
    pub adapter_index: usize,
    /// Notifications buffered between the stack and the session loop.
    pub notification_buffer: usize,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            notification_buffer: 64,
        }
    }
}
