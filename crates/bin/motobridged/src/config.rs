//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `motobridge.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::path::PathBuf;

use motobridge_adapter_ble::BleConfig;
use motobridge_adapter_mqtt::MqttConfig;
use motobridge_app::config::SessionConfig;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth adapter and connection settings.
    pub ble: BleSection,
    /// Register polling and command timing.
    pub polling: PollingConfig,
    /// Broker settings.
    pub mqtt: MqttConfig,
    /// CSV recording of decoded samples.
    pub recording: RecordingConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Bluetooth settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BleSection {
    /// Which host adapter to use.
    pub adapter_index: usize,
    /// Notifications buffered between the stack and the session.
    pub notification_buffer: usize,
    /// How long discovery scans before giving up.
    pub scan_window_ms: u64,
    /// Budget from connect to authorization.
    pub connect_timeout_ms: u64,
    /// Only consider bridges whose advertised name starts with this.
    pub name_prefix: Option<String>,
    /// Password written right after subscribing.
    pub password: Option<String>,
}

/// Polling configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub telemetry_timeout_ms: u64,
    pub identification_timeout_ms: u64,
    pub control_timeout_ms: u64,
    pub end_grace_ms: u64,
    /// Longest a single write may take before it counts as failed.
    pub write_timeout_ms: u64,
    /// Writes per command, the first one included.
    pub max_write_attempts: u8,
}

/// Recording configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub enabled: bool,
    /// CSV file rows are appended to.
    pub path: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from `motobridge.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if a
    /// value fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("motobridge.toml")?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("MOTOBRIDGE_MQTT_HOST") {
            self.mqtt.host = val;
        }
        if let Some(port) = var("MOTOBRIDGE_MQTT_PORT").and_then(|val| val.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(val) = var("MOTOBRIDGE_PASSWORD") {
            self.ble.password = Some(val);
        }
        if let Some(val) = var("MOTOBRIDGE_RECORD") {
            self.recording.enabled = true;
            self.recording.path = PathBuf::from(val);
        }
        if let Some(val) = var("MOTOBRIDGE_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.port == 0 {
            return Err(ConfigError::Validation(
                "mqtt port must be non-zero".to_string(),
            ));
        }
        if self.polling.max_write_attempts == 0 {
            return Err(ConfigError::Validation(
                "max_write_attempts must be at least 1".to_string(),
            ));
        }
        let timeouts = [
            ("scan_window_ms", self.ble.scan_window_ms),
            ("connect_timeout_ms", self.ble.connect_timeout_ms),
            ("telemetry_timeout_ms", self.polling.telemetry_timeout_ms),
            (
                "identification_timeout_ms",
                self.polling.identification_timeout_ms,
            ),
            ("control_timeout_ms", self.polling.control_timeout_ms),
            ("end_grace_ms", self.polling.end_grace_ms),
            ("write_timeout_ms", self.polling.write_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Validation(format!("{name} must be non-zero")));
        }
        Ok(())
    }

    /// Settings of the connection manager and protocol engine.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            scan_window_ms: self.ble.scan_window_ms,
            connect_timeout_ms: self.ble.connect_timeout_ms,
            telemetry_timeout_ms: self.polling.telemetry_timeout_ms,
            identification_timeout_ms: self.polling.identification_timeout_ms,
            control_timeout_ms: self.polling.control_timeout_ms,
            end_grace_ms: self.polling.end_grace_ms,
            write_timeout_ms: self.polling.write_timeout_ms,
            max_write_attempts: self.polling.max_write_attempts,
            topic_prefix: self.mqtt.prefix.clone(),
            name_prefix: self.ble.name_prefix.clone(),
        }
    }

    /// Settings of the btleplug transport.
    #[must_use]
    pub fn ble_config(&self) -> BleConfig {
        BleConfig {
            adapter_index: self.ble.adapter_index,
            notification_buffer: self.ble.notification_buffer,
        }
    }
}

impl Default for BleSection {
    fn default() -> Self {
        let ble = BleConfig::default();
        let session = SessionConfig::default();
        Self {
            adapter_index: ble.adapter_index,
            notification_buffer: ble.notification_buffer,
            scan_window_ms: session.scan_window_ms,
            connect_timeout_ms: session.connect_timeout_ms,
            name_prefix: None,
            password: None,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            telemetry_timeout_ms: session.telemetry_timeout_ms,
            identification_timeout_ms: session.identification_timeout_ms,
            control_timeout_ms: session.control_timeout_ms,
            end_grace_ms: session.end_grace_ms,
            write_timeout_ms: session.write_timeout_ms,
            max_write_attempts: session.max_write_attempts,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("motobridge.csv"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "motobridged=info,motobridge_app=info,motobridge_adapter_ble=info,motobridge_adapter_mqtt=info"
                .to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
