//! # motobridged — motorcycle bridge daemon
//!
//! Composition root that wires all adapters together and streams telemetry.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialize logging
//! - Construct the btleplug transport, the MQTT publisher and the CSV recorder
//! - Construct the connection manager, injecting adapters via port traits
//! - Discover a bridge, connect, read its identification and start streaming
//! - Disconnect cleanly on SIGINT or when the bridge ends the session
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no protocol logic belongs here.

mod config;
mod recorder;

use std::sync::Arc;

use motobridge_adapter_ble::{BtleCapabilities, BtleCentral};
use motobridge_adapter_mqtt::MqttPublisher;
use motobridge_app::error::SessionError;
use motobridge_app::event_bus::SessionEvent;
use motobridge_app::manager::ConnectionManager;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::recorder::CsvRecorder;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    // Adapters
    let central = BtleCentral::new(config.ble_config()).await?;
    let publisher = Arc::new(MqttPublisher::start(&config.mqtt)?);
    let recorder = if config.recording.enabled {
        CsvRecorder::open(&config.recording.path).await?
    } else {
        CsvRecorder::disabled()
    };

    // Session
    let manager = ConnectionManager::new(
        central,
        BtleCapabilities,
        Arc::clone(&publisher),
        Arc::new(recorder),
        config.session_config(),
    );
    tokio::spawn(log_events(manager.subscribe()));

    let devices = manager.discover().await?;
    let device = devices.first().ok_or(SessionError::DeviceNotFound)?;
    let session = manager.connect(device, config.ble.password.clone()).await?;

    match session.read_identification().await {
        Ok(info) => tracing::info!(
            vin = %info.vin,
            ecu_sw = %info.ecu_sw,
            calibration = %info.calibration,
            "bridge identified"
        ),
        Err(err) => tracing::warn!(%err, "identification failed"),
    }
    if config.recording.enabled {
        session.set_recording(true).await?;
    }
    session.start_streaming().await?;
    tracing::info!(device = %device.address, "streaming telemetry");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupted, disconnecting");
        }
        () = session.closed() => {
            tracing::warn!("session closed by the bridge");
        }
    }

    session.disconnect().await?;
    publisher.shutdown().await?;
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::StateChanged(state)) => tracing::info!(?state, "connection state"),
            Ok(SessionEvent::Attribute { token, value }) => {
                tracing::info!(?token, %value, "device attribute");
            }
            Ok(SessionEvent::Sample(sample)) => {
                tracing::debug!(label = sample.label, value = %sample.value, "sample");
            }
            Ok(SessionEvent::Missed { class, id, reason }) => {
                tracing::debug!(?class, ?id, ?reason, "register missed");
            }
            Ok(SessionEvent::CycleComplete(class)) => tracing::debug!(?class, "cycle complete"),
            Ok(SessionEvent::Error(err)) => tracing::warn!(%err, "session error"),
            Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "event log lagging"),
            Err(RecvError::Closed) => return,
        }
    }
}
