//! MQTT publisher configuration.

use serde::Deserialize;

/// Configuration for the MQTT telemetry publisher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// MQTT broker hostname or IP address.
    pub host: String,
    /// MQTT broker port.
    pub port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    /// First segment of every telemetry topic.
    pub prefix: String,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u16,
    /// Quality of service of published bodies (0, 1 or 2).
    pub qos: u8,
    /// Publish with the retain flag.
    pub retain: bool,
    /// Optional broker credentials.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Requests buffered while the broker is unreachable.
    pub channel_capacity: usize,
    /// Pause between reconnect attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "motobridge".to_string(),
            prefix: "Beta".to_string(),
            keep_alive_secs: 30,
            qos: 1,
            retain: false,
            username: None,
            password: None,
            channel_capacity: 64,
            reconnect_delay_ms: 1_000,
        }
    }
}
