//! MQTT adapter error types.

use motobridge_app::ports::SinkError;

/// Errors specific to the MQTT adapter.
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The configured QoS level does not exist.
    #[error("invalid QoS level {0}")]
    InvalidQos(u8),

    /// The rumqttc client returned an error.
    #[error("MQTT client error")]
    Client(#[source] rumqttc::ClientError),

    /// Failed to serialize a body as JSON.
    #[error("failed to serialize MQTT payload")]
    Serialize(#[source] serde_json::Error),
}

impl From<MqttError> for SinkError {
    fn from(err: MqttError) -> Self {
        SinkError(Box::new(err))
    }
}
