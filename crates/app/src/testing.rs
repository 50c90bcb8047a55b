//! In-memory transport and sinks for driving sessions in tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use motobridge_domain::frame::{READ_OPCODE, RegisterClass};
use motobridge_domain::gatt;

use crate::ports::{
    Central, DeviceInfo, Endpoints, Link, LinkEvent, Publication, Sample, SampleRecorder,
    ServiceDescriptor, SinkError, TelemetryPublisher, TransportCapabilities, TransportError,
};

pub(crate) fn device(address: &str, name: Option<&str>) -> DeviceInfo {
    DeviceInfo {
        address: address.to_owned(),
        name: name.map(str::to_owned),
        rssi: Some(-60),
    }
}

#[derive(Debug, Default)]
struct LinkState {
    services: Vec<ServiceDescriptor>,
    written: Vec<Vec<u8>>,
    events: Option<mpsc::Sender<LinkEvent>>,
    authorize_on_subscribe: bool,
    deny_connect: bool,
    /// Register request bytes → response frame.
    responses: HashMap<Vec<u8>, Vec<u8>>,
    /// Exact text command → notification.
    replies: HashMap<Vec<u8>, Vec<u8>>,
    /// Writes of these bytes never complete.
    hangs: HashSet<Vec<u8>>,
    closed: bool,
}

/// A scripted peripheral. Clones share state.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeLink {
    state: Arc<Mutex<LinkState>>,
}

impl FakeLink {
    /// A peripheral exposing the UART service.
    pub(crate) fn uart() -> Self {
        Self::with_services(vec![ServiceDescriptor {
            uuid: gatt::UART_SERVICE,
            characteristics: vec![gatt::WRITE_CHAR, gatt::NOTIFY_CHAR],
        }])
    }

    pub(crate) fn with_services(services: Vec<ServiceDescriptor>) -> Self {
        let link = Self::default();
        link.state.lock().unwrap().services = services;
        link
    }

    /// Send `CNT=1` as soon as the session subscribes.
    pub(crate) fn authorize_on_subscribe(&self) {
        self.state.lock().unwrap().authorize_on_subscribe = true;
    }

    pub(crate) fn deny_connect(&self) {
        self.state.lock().unwrap().deny_connect = true;
    }

    /// Answer every request for `id` with `payload`.
    pub(crate) fn respond_with(&self, class: RegisterClass, id: u16, payload: &[u8]) {
        let [hi, lo] = id.to_be_bytes();
        let request = vec![READ_OPCODE, class.code(), 0x02, hi, lo];
        let len = u8::try_from(payload.len() + 2).unwrap();
        let mut response = vec![0xB0, class.code(), 0x00, len, hi, lo];
        response.extend_from_slice(payload);
        self.state.lock().unwrap().responses.insert(request, response);
    }

    /// Answer the exact `command` with the `notification` text.
    pub(crate) fn reply_to(&self, command: &[u8], notification: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .replies
            .insert(command.to_vec(), notification.to_vec());
    }

    /// Never complete writes of exactly `bytes`. They are still recorded.
    pub(crate) fn hang_on(&self, bytes: &[u8]) {
        self.state.lock().unwrap().hangs.insert(bytes.to_vec());
    }

    /// Push an unsolicited notification.
    pub(crate) fn notify(&self, bytes: &[u8]) {
        self.push(LinkEvent::Notification(bytes.to_vec()));
    }

    /// Simulate the peripheral going away.
    pub(crate) fn drop_link(&self) {
        self.push(LinkEvent::Disconnected);
        self.state.lock().unwrap().events = None;
    }

    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn push(&self, event: LinkEvent) {
        if let Some(events) = &self.state.lock().unwrap().events {
            events.try_send(event).unwrap();
        }
    }
}

impl Link for FakeLink {
    async fn discover_services(&self) -> Result<Vec<ServiceDescriptor>, TransportError> {
        Ok(self.state.lock().unwrap().services.clone())
    }

    async fn subscribe(
        &self,
        endpoints: Endpoints,
    ) -> Result<mpsc::Receiver<LinkEvent>, TransportError> {
        assert_eq!(endpoints.notify, gatt::NOTIFY_CHAR);
        let (sender, receiver) = mpsc::channel(64);
        let mut state = self.state.lock().unwrap();
        if state.authorize_on_subscribe {
            sender
                .try_send(LinkEvent::Notification(b"CNT=1".to_vec()))
                .unwrap();
        }
        state.events = Some(sender);
        Ok(receiver)
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let (answer, hang) = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(TransportError::NotConnected);
            }
            state.written.push(bytes.to_vec());
            let answer = state
                .responses
                .get(bytes)
                .or_else(|| state.replies.get(bytes))
                .cloned();
            (answer, state.hangs.contains(bytes))
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(answer) = answer {
            self.notify(&answer);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.events = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CentralState {
    scanning: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeCentral {
    devices: Vec<DeviceInfo>,
    link: FakeLink,
    state: Arc<Mutex<CentralState>>,
}

impl FakeCentral {
    pub(crate) fn new(devices: Vec<DeviceInfo>, link: FakeLink) -> Self {
        Self {
            devices,
            link,
            state: Arc::default(),
        }
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.state.lock().unwrap().scanning
    }
}

impl Central for FakeCentral {
    type Link = FakeLink;

    async fn start_scan(&self) -> Result<(), TransportError> {
        self.state.lock().unwrap().scanning = true;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.state.lock().unwrap().scanning = false;
        Ok(())
    }

    async fn discovered(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        Ok(self.devices.clone())
    }

    async fn connect(&self, device: &DeviceInfo) -> Result<FakeLink, TransportError> {
        if self.link.state.lock().unwrap().deny_connect {
            return Err(TransportError::PermissionDenied);
        }
        if !self.devices.iter().any(|known| known.address == device.address) {
            return Err(TransportError::DeviceNotFound);
        }
        Ok(self.link.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeCapabilities {
    bonds_removed: Arc<Mutex<HashSet<String>>>,
    caches_refreshed: Arc<Mutex<HashSet<String>>>,
}

impl FakeCapabilities {
    pub(crate) fn bond_removed(&self, address: &str) -> bool {
        self.bonds_removed.lock().unwrap().contains(address)
    }

    pub(crate) fn cache_refreshed(&self, address: &str) -> bool {
        self.caches_refreshed.lock().unwrap().contains(address)
    }
}

impl TransportCapabilities for FakeCapabilities {
    async fn remove_bond(&self, device: &DeviceInfo) -> Result<(), TransportError> {
        self.bonds_removed
            .lock()
            .unwrap()
            .insert(device.address.clone());
        Ok(())
    }

    async fn force_refresh_cache(&self, device: &DeviceInfo) -> Result<(), TransportError> {
        self.caches_refreshed
            .lock()
            .unwrap()
            .insert(device.address.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryPublisher {
    published: Mutex<Vec<Publication>>,
    stalled: AtomicBool,
}

impl MemoryPublisher {
    pub(crate) fn published(&self) -> Vec<Publication> {
        self.published.lock().unwrap().clone()
    }

    /// Make every later publish wait forever, like a broker that stopped
    /// reading.
    pub(crate) fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }
}

impl TelemetryPublisher for MemoryPublisher {
    async fn publish(&self, publication: Publication) -> Result<(), SinkError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.published.lock().unwrap().push(publication);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryRecorder {
    samples: Mutex<Vec<Sample>>,
}

impl MemoryRecorder {
    pub(crate) fn samples(&self) -> Vec<Sample> {
        self.samples.lock().unwrap().clone()
    }
}

impl SampleRecorder for MemoryRecorder {
    async fn record(&self, sample: Sample) -> Result<(), SinkError> {
        self.samples.lock().unwrap().push(sample);
        Ok(())
    }
}
