//! Connection manager — discovery and the connect sequence.
//!
//! ```text
//! connect: remove bond → open link → discover services → resolve UART
//!          endpoints → subscribe → spawn session → wait for first CNT
//! ```
//!
//! The whole sequence shares one deadline of
//! [`SessionConfig::connect_timeout`]. Whatever budget remains after the link
//! is subscribed becomes the session's authorization timeout.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, timeout_at};

use crate::config::SessionConfig;
use crate::engine::{EngineConfig, ProtocolEngine};
use crate::error::SessionError;
use crate::event_bus::{ConnectionState, SessionEvent, SessionEventBus};
use crate::ports::{
    Central, DeviceInfo, Endpoints, Link, LinkEvent, SampleRecorder, TelemetryPublisher,
    TransportCapabilities,
};
use crate::session::{self, SessionHandle, Startup};

/// How often the discovered list is checked during a discovery window.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Capacity of the session event bus.
const EVENT_BUS_CAPACITY: usize = 256;

/// Discovers bridges and opens authorized sessions to them.
pub struct ConnectionManager<C, K, P, R> {
    central: C,
    capabilities: K,
    publisher: P,
    recorder: R,
    config: SessionConfig,
    bus: SessionEventBus,
}

impl<C, K, P, R> ConnectionManager<C, K, P, R>
where
    C: Central,
    K: TransportCapabilities,
    P: TelemetryPublisher + Clone + 'static,
    R: SampleRecorder + Clone + 'static,
{
    pub fn new(
        central: C,
        capabilities: K,
        publisher: P,
        recorder: R,
        config: SessionConfig,
    ) -> Self {
        Self {
            central,
            capabilities,
            publisher,
            recorder,
            config,
            bus: SessionEventBus::new(EVENT_BUS_CAPACITY),
        }
    }

    /// Subscribe to events of every session this manager opens, including
    /// connect progress.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    /// Start scanning for bridges.
    ///
    /// # Errors
    ///
    /// [`SessionError::PermissionDenied`] when the platform refuses to scan.
    pub async fn start_discovery(&self) -> Result<(), SessionError> {
        self.central.start_scan().await?;
        tracing::info!("discovery started");
        Ok(())
    }

    /// Stop scanning.
    ///
    /// # Errors
    ///
    /// Any transport failure.
    pub async fn stop_discovery(&self) -> Result<(), SessionError> {
        self.central.stop_scan().await?;
        tracing::info!("discovery stopped");
        Ok(())
    }

    /// Scan for at most the configured window and return the matching
    /// bridges, stopping as soon as one is found. The scan is always stopped
    /// before returning.
    ///
    /// # Errors
    ///
    /// [`SessionError::DeviceNotFound`] when the window elapsed without a
    /// match, or the transport failure that interrupted the scan.
    pub async fn discover(&self) -> Result<Vec<DeviceInfo>, SessionError> {
        self.start_discovery().await?;
        let deadline = Instant::now() + self.config.scan_window();
        let found = self.collect_until(deadline).await;
        if let Err(err) = self.stop_discovery().await {
            tracing::warn!(%err, "failed to stop discovery");
        }

        let found = found?;
        if found.is_empty() {
            tracing::info!(window = ?self.config.scan_window(), "no bridge found");
            return Err(SessionError::DeviceNotFound);
        }
        Ok(found)
    }

    async fn collect_until(&self, deadline: Instant) -> Result<Vec<DeviceInfo>, SessionError> {
        loop {
            let found: Vec<DeviceInfo> = self
                .central
                .discovered()
                .await?
                .into_iter()
                .filter(|device| self.accepts(device))
                .collect();
            let now = Instant::now();
            if !found.is_empty() || now >= deadline {
                return Ok(found);
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    fn accepts(&self, device: &DeviceInfo) -> bool {
        match (&self.config.name_prefix, &device.name) {
            (None, _) => true,
            (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            (Some(_), None) => false,
        }
    }

    /// Open a session to `device` and wait until the bridge authorizes it.
    ///
    /// `password`, when given, is written right after subscribing.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ProtocolMismatch`] when the UART service or one of
    ///   its characteristics is missing
    /// - [`SessionError::ConnectionTimeout`] when no counter token arrived
    ///   within the connect budget
    /// - [`SessionError::PermissionDenied`] and other transport failures
    pub async fn connect(
        &self,
        device: &DeviceInfo,
        password: Option<String>,
    ) -> Result<SessionHandle, SessionError> {
        let deadline = Instant::now() + self.config.connect_timeout();
        tracing::info!(device = %device.address, name = ?device.name, "connecting");
        self.bus
            .publish(SessionEvent::StateChanged(ConnectionState::Connecting));

        if let Err(err) = self.capabilities.remove_bond(device).await {
            tracing::warn!(%err, device = %device.address, "failed to remove bond");
        }

        let link = match timeout_at(deadline, self.central.connect(device)).await {
            Ok(Ok(link)) => link,
            Ok(Err(err)) => return Err(self.abort(err.into())),
            Err(_) => return Err(self.abort(SessionError::ConnectionTimeout)),
        };

        self.bus
            .publish(SessionEvent::StateChanged(ConnectionState::DiscoveringServices));
        let events = match timeout_at(deadline, self.open(&link, device)).await {
            Ok(Ok(events)) => events,
            Ok(Err(err)) => {
                close(&link).await;
                return Err(self.abort(err));
            }
            Err(_) => {
                close(&link).await;
                return Err(self.abort(SessionError::ConnectionTimeout));
            }
        };

        let budget = deadline.saturating_duration_since(Instant::now());
        let engine = ProtocolEngine::new(EngineConfig::from(&self.config), device.address.clone());
        let (handle, authorized) = session::spawn(
            engine,
            link,
            events,
            (self.publisher.clone(), self.recorder.clone()),
            self.bus.clone(),
            Startup {
                password,
                budget,
                write_timeout: self.config.write_timeout(),
            },
        );

        match authorized.await {
            Ok(Ok(_)) => Ok(handle),
            Ok(Err(err)) => {
                tracing::warn!(%err, device = %device.address, "session not authorized");
                Err(err)
            }
            Err(_) => Err(SessionError::Closed),
        }
    }

    /// Discover services, resolve the UART endpoints and subscribe.
    async fn open(
        &self,
        link: &C::Link,
        device: &DeviceInfo,
    ) -> Result<tokio::sync::mpsc::Receiver<LinkEvent>, SessionError> {
        let services = link.discover_services().await?;
        let Some(endpoints) = Endpoints::resolve(&services) else {
            tracing::warn!(
                device = %device.address,
                services = services.len(),
                "UART service or characteristics missing"
            );
            // a stale GATT cache is the usual culprit; the next attempt rediscovers
            if let Err(err) = self.capabilities.force_refresh_cache(device).await {
                tracing::debug!(%err, "failed to refresh GATT cache");
            }
            return Err(SessionError::ProtocolMismatch);
        };
        Ok(link.subscribe(endpoints).await?)
    }

    fn abort(&self, err: SessionError) -> SessionError {
        tracing::warn!(%err, "connect failed");
        self.bus
            .publish(SessionEvent::StateChanged(ConnectionState::Disconnected));
        err
    }
}

async fn close<L: Link>(link: &L) {
    if let Err(err) = link.disconnect().await {
        tracing::debug!(%err, "failed to close link after aborted connect");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use motobridge_domain::control::ControlCommand;
    use motobridge_domain::frame::RegisterClass;
    use motobridge_domain::gatt;
    use motobridge_domain::notification::WifiStatus;
    use motobridge_domain::telemetry::GeoFix;

    use super::*;
    use crate::ports::ServiceDescriptor;
    use crate::testing::{FakeCapabilities, FakeCentral, FakeLink, MemoryPublisher, MemoryRecorder, device};

    type Manager = ConnectionManager<
        FakeCentral,
        FakeCapabilities,
        Arc<MemoryPublisher>,
        Arc<MemoryRecorder>,
    >;

    struct Harness {
        manager: Manager,
        link: FakeLink,
        capabilities: FakeCapabilities,
        publisher: Arc<MemoryPublisher>,
        recorder: Arc<MemoryRecorder>,
    }

    fn harness(link: FakeLink) -> Harness {
        let central = FakeCentral::new(vec![device("AA:BB", Some("Bridge-1"))], link.clone());
        let capabilities = FakeCapabilities::default();
        let publisher = Arc::new(MemoryPublisher::default());
        let recorder = Arc::new(MemoryRecorder::default());
        let manager = ConnectionManager::new(
            central,
            capabilities.clone(),
            publisher.clone(),
            recorder.clone(),
            SessionConfig::default(),
        );
        Harness {
            manager,
            link,
            capabilities,
            publisher,
            recorder,
        }
    }

    fn response(class: RegisterClass, id: u16, payload: &[u8]) -> Vec<u8> {
        let len = u8::try_from(payload.len() + 2).unwrap();
        let [hi, lo] = id.to_be_bytes();
        let mut bytes = vec![0xB0, class.code(), 0x00, len, hi, lo];
        bytes.extend_from_slice(payload);
        bytes
    }

    async fn connected(harness: &Harness) -> SessionHandle {
        harness.link.authorize_on_subscribe();
        harness
            .manager
            .connect(&device("AA:BB", Some("Bridge-1")), None)
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn should_discover_matching_device() {
        let harness = harness(FakeLink::uart());
        let found = harness.manager.discover().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, "AA:BB");
    }

    #[tokio::test(start_paused = true)]
    async fn should_give_up_discovery_after_scan_window() {
        let link = FakeLink::uart();
        let central = FakeCentral::new(vec![device("CC:DD", Some("Other"))], link);
        let config = SessionConfig {
            name_prefix: Some("Bridge".into()),
            ..SessionConfig::default()
        };
        let manager = ConnectionManager::new(
            central.clone(),
            FakeCapabilities::default(),
            Arc::new(MemoryPublisher::default()),
            Arc::new(MemoryRecorder::default()),
            config,
        );

        let started = Instant::now();
        let err = manager.discover().await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceNotFound));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(!central.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn should_connect_once_counter_token_arrives() {
        let harness = harness(FakeLink::uart());
        let mut events = harness.manager.subscribe();
        let handle = connected(&harness).await;

        assert_eq!(handle.state(), ConnectionState::Authorized);
        assert!(harness.capabilities.bond_removed("AA:BB"));
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::StateChanged(ConnectionState::Connecting)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_write_password_after_subscribing() {
        let harness = harness(FakeLink::uart());
        harness.link.authorize_on_subscribe();
        harness
            .manager
            .connect(&device("AA:BB", None), Some("0000".into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            harness.link.written(),
            vec![ControlCommand::Password("0000".into()).encode()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn should_fail_with_protocol_mismatch_and_close_link() {
        let link = FakeLink::with_services(vec![ServiceDescriptor {
            uuid: gatt::UART_SERVICE,
            characteristics: vec![gatt::WRITE_CHAR],
        }]);
        let harness = harness(link);
        let err = harness
            .manager
            .connect(&device("AA:BB", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ProtocolMismatch));
        assert!(harness.link.is_closed());
        assert!(harness.capabilities.cache_refreshed("AA:BB"));
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_without_counter_token() {
        let harness = harness(FakeLink::uart());
        let started = Instant::now();
        let err = harness
            .manager
            .connect(&device("AA:BB", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ConnectionTimeout));
        assert!(started.elapsed() >= Duration::from_secs(10));
        tokio::task::yield_now().await;
        assert!(harness.link.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn should_surface_permission_denied() {
        let harness = harness(FakeLink::uart());
        harness.link.deny_connect();
        let err = harness
            .manager
            .connect(&device("AA:BB", None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::PermissionDenied));
    }

    #[tokio::test(start_paused = true)]
    async fn should_reject_commands_after_disconnect() {
        let harness = harness(FakeLink::uart());
        let handle = connected(&harness).await;
        handle.disconnect().await.unwrap();

        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert_eq!(harness.link.written().last().unwrap(), b"END");
        assert!(matches!(
            handle.send_command(b"PING".to_vec()).await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_stream_telemetry_and_publish_enginedata() {
        let harness = harness(FakeLink::uart());
        harness
            .link
            .respond_with(RegisterClass::Telemetry, 0x01, &[0x0B, 0xB8]);
        harness
            .link
            .respond_with(RegisterClass::Telemetry, 0x08, &[0x00, 0xC8]);
        let handle = connected(&harness).await;
        handle.set_recording(true).await.unwrap();
        handle.start_streaming().await.unwrap();

        // six unanswered registers at 500 ms each
        tokio::time::sleep(Duration::from_millis(3_200)).await;
        handle.stop_streaming().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let published = harness.publisher.published();
        let enginedata = published
            .iter()
            .find(|publication| publication.topic == "Beta/AA:BB/enginedata")
            .expect("a completed cycle should be published");
        assert_eq!(enginedata.payload["rpm"], serde_json::json!(3000.0));
        assert_eq!(enginedata.payload["batteryVoltage"], serde_json::json!(12.5));
        assert!(enginedata.payload["engineTemp"].is_null());

        let labels: Vec<_> = harness.recorder.samples().iter().map(|s| s.label).collect();
        assert!(labels.contains(&"Engine speed"));
    }

    #[tokio::test(start_paused = true)]
    async fn should_read_identification_through_handle() {
        let harness = harness(FakeLink::uart());
        harness.link.respond_with(
            RegisterClass::Identification,
            0x90,
            b"ZDM1234567890ABCD",
        );
        let handle = connected(&harness).await;

        let info = handle.read_identification().await.unwrap();
        assert_eq!(info.vin, "ZDM1234567890ABCD");
        assert_eq!(info.calibration, "");
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_wifi_command() {
        let harness = harness(FakeLink::uart());
        let handle = connected(&harness).await;
        let err = handle.disable_wifi().await.unwrap_err();
        assert!(matches!(err, SessionError::ResponseTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn should_resolve_wifi_command_from_status_token() {
        let harness = harness(FakeLink::uart());
        harness.link.reply_to(b"WiFi=OFF", b"WIFI=OFF");
        let handle = connected(&harness).await;
        assert_eq!(handle.disable_wifi().await.unwrap(), WifiStatus::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn should_publish_position_with_latest_rpm() {
        let harness = harness(FakeLink::uart());
        harness
            .link
            .respond_with(RegisterClass::Telemetry, 0x01, &[0x03, 0xE8]);
        let handle = connected(&harness).await;
        handle.start_streaming().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle
            .update_position(GeoFix {
                latitude: 45.46,
                longitude: 9.19,
                speed: Some(42.0),
                altitude: Some(120.0),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let published = harness.publisher.published();
        let position = published
            .iter()
            .find(|publication| publication.topic.ends_with("/position"))
            .unwrap();
        assert_eq!(position.payload["rpm"], serde_json::json!(1000.0));
        assert_eq!(position.payload["speed"], serde_json::json!(42.0));
    }

    #[tokio::test(start_paused = true)]
    async fn should_close_session_when_peripheral_expires_it() {
        let harness = harness(FakeLink::uart());
        let handle = connected(&harness).await;
        let mut events = handle.subscribe();
        harness.link.notify(b"SESSION EXPIRED");
        handle.closed().await;

        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(harness.link.is_closed());
        let mut saw_expired = false;
        while let Ok(event) = events.try_recv() {
            saw_expired |= matches!(event, SessionEvent::Error(SessionError::SessionExpired));
        }
        assert!(saw_expired);
    }

    #[tokio::test(start_paused = true)]
    async fn should_close_session_when_link_drops() {
        let harness = harness(FakeLink::uart());
        let handle = connected(&harness).await;
        harness.link.drop_link();
        handle.closed().await;
        assert!(matches!(
            handle.start_streaming().await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn should_disconnect_within_grace_when_end_write_hangs() {
        let harness = harness(FakeLink::uart());
        harness.link.hang_on(&ControlCommand::End.encode());
        let handle = connected(&harness).await;

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(5), handle.disconnect())
            .await
            .expect("disconnect should not wait on a stuck write")
            .unwrap();
        assert!(started.elapsed() <= Duration::from_millis(1_100));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(harness.link.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn should_keep_polling_when_a_register_write_hangs() {
        let harness = harness(FakeLink::uart());
        harness.link.hang_on(&[0x22, 0x01, 0x02, 0x00, 0x01]);
        harness
            .link
            .respond_with(RegisterClass::Telemetry, 0x08, &[0x00, 0xC8]);
        let handle = connected(&harness).await;
        handle.start_streaming().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;

        let written = harness.link.written();
        assert!(written.contains(&vec![0x22, 0x01, 0x02, 0x00, 0x02]));
        assert!(written.contains(&vec![0x22, 0x01, 0x02, 0x00, 0x08]));
        assert!(harness
            .publisher
            .published()
            .iter()
            .any(|publication| publication.topic == "Beta/AA:BB/enginedata"));
        assert_eq!(handle.state(), ConnectionState::Authorized);
    }

    #[tokio::test(start_paused = true)]
    async fn should_keep_serving_requests_when_publisher_stalls() {
        let harness = harness(FakeLink::uart());
        harness
            .link
            .respond_with(RegisterClass::Telemetry, 0x01, &[0x0B, 0xB8]);
        harness.publisher.stall();
        let handle = connected(&harness).await;
        handle.set_recording(true).await.unwrap();
        handle.start_streaming().await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;

        let fix = GeoFix {
            latitude: 45.46,
            longitude: 9.19,
            speed: None,
            altitude: None,
        };
        tokio::time::timeout(Duration::from_secs(1), handle.update_position(fix))
            .await
            .expect("position update should not wait on the publisher")
            .unwrap();
        assert!(harness.link.written().len() > 8);
        assert!(!harness.recorder.samples().is_empty());
        tokio::time::timeout(Duration::from_secs(5), handle.disconnect())
            .await
            .expect("disconnect should not wait on the publisher")
            .unwrap();
        assert!(harness.publisher.published().is_empty());
    }
}
