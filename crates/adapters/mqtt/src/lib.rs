//! # motobridge-adapter-mqtt
//!
//! Publishes telemetry bodies to an MQTT broker via `rumqttc`.
//!
//! A background task drives the rumqttc event loop and reconnects after
//! failures. Publishing never waits: a publication either fits in the
//! client's request channel or is refused with [`MqttError::Client`], so a
//! stalled broker cannot hold up the session that produced it.
//!
//! ## Dependency rule
//!
//! Same as other adapters: depends on `motobridge-app` only.

mod config;
mod error;

pub use config::MqttConfig;
pub use error::MqttError;

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;

use motobridge_app::ports::{Publication, SinkError, TelemetryPublisher};

/// Map a numeric QoS level.
///
/// # Errors
///
/// Returns [`MqttError::InvalidQos`] for anything but 0, 1 or 2.
pub fn qos_level(level: u8) -> Result<QoS, MqttError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(MqttError::InvalidQos(other)),
    }
}

/// [`TelemetryPublisher`] backed by a rumqttc client.
#[derive(Debug)]
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    retain: bool,
    driver: JoinHandle<()>,
}

impl MqttPublisher {
    /// Create the client and spawn the task driving its event loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MqttError::InvalidQos`] for an invalid `qos` setting.
    pub fn start(config: &MqttConfig) -> Result<Self, MqttError> {
        let qos = qos_level(config.qos)?;

        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(u64::from(config.keep_alive_secs)));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, config.channel_capacity.max(1));
        let driver = tokio::spawn(drive(
            eventloop,
            Duration::from_millis(config.reconnect_delay_ms),
        ));

        tracing::info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "MQTT publisher started"
        );
        Ok(Self {
            client,
            qos,
            retain: config.retain,
            driver,
        })
    }

    /// Disconnect from the broker once queued publications are sent.
    ///
    /// # Errors
    ///
    /// Returns [`MqttError::Client`] when the event loop is already gone.
    pub async fn shutdown(&self) -> Result<(), MqttError> {
        self.client.disconnect().await.map_err(MqttError::Client)?;
        tracing::info!("MQTT publisher stopped");
        Ok(())
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl TelemetryPublisher for MqttPublisher {
    async fn publish(&self, publication: Publication) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(&publication.payload).map_err(MqttError::Serialize)?;
        tracing::trace!(topic = %publication.topic, bytes = payload.len(), "publishing");
        self.client
            .try_publish(publication.topic, self.qos, self.retain, payload)
            .map_err(MqttError::Client)?;
        Ok(())
    }
}

async fn drive(mut eventloop: EventLoop, reconnect_delay: Duration) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::info!(code = ?ack.code, "connected to MQTT broker");
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => {
                tracing::debug!("MQTT client closed, event loop finished");
                return;
            }
            Err(err) => {
                tracing::warn!(%err, "MQTT connection error, retrying");
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}
