//! Transport ports — BLE discovery, the GATT link, and platform
//! capabilities.
//!
//! The protocol core never touches a BLE stack directly. An adapter crate
//! (e.g. `adapter_ble`) implements these traits; the [`manager`] drives them.
//!
//! [`manager`]: crate::manager

use std::future::Future;

use tokio::sync::mpsc;
use uuid::Uuid;

use motobridge_domain::gatt;

/// A peripheral seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Platform address (MAC on Linux/Windows).
    pub address: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Signal strength at discovery time.
    pub rssi: Option<i16>,
}

/// A GATT service and the UUIDs of its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// The resolved characteristic pair of the UART service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub service: Uuid,
    pub write: Uuid,
    pub notify: Uuid,
}

impl Endpoints {
    /// Locate the UART service and its write/notify characteristics.
    ///
    /// Returns `None` when the service or either characteristic is missing.
    #[must_use]
    pub fn resolve(services: &[ServiceDescriptor]) -> Option<Self> {
        let service = services.iter().find(|s| s.uuid == gatt::UART_SERVICE)?;
        let has = |uuid: Uuid| service.characteristics.contains(&uuid);
        (has(gatt::WRITE_CHAR) && has(gatt::NOTIFY_CHAR)).then_some(Self {
            service: gatt::UART_SERVICE,
            write: gatt::WRITE_CHAR,
            notify: gatt::NOTIFY_CHAR,
        })
    }
}

/// Something that happened on an established link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The notify characteristic delivered a message.
    Notification(Vec<u8>),
    /// The link dropped (peripheral or platform initiated).
    Disconnected,
}

/// Errors reported by transport adapters.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The platform refused the operation for lack of permission.
    #[error("transport permission denied")]
    PermissionDenied,

    /// No BLE adapter found on the host.
    #[error("no BLE adapter available")]
    NotAvailable,

    /// The requested peripheral is not known to the adapter.
    #[error("device not found")]
    DeviceNotFound,

    /// The link is not connected.
    #[error("peripheral not connected")]
    NotConnected,

    /// A write was not acknowledged in time.
    #[error("transport write timed out")]
    WriteTimeout,

    /// A write was rejected by the stack or the peripheral.
    #[error("transport write failed")]
    Write(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Any other stack error.
    #[error("transport error")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// BLE central role: discovery and link establishment.
pub trait Central: Send + Sync {
    /// The link type produced by [`connect`](Self::connect).
    type Link: Link + 'static;

    /// Start scanning for peripherals advertising the UART service.
    fn start_scan(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Stop scanning.
    fn stop_scan(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Peripherals found so far.
    fn discovered(&self) -> impl Future<Output = Result<Vec<DeviceInfo>, TransportError>> + Send;

    /// Open a low-energy link to `device`.
    fn connect(
        &self,
        device: &DeviceInfo,
    ) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// An open GATT link to one peripheral.
pub trait Link: Send + Sync {
    /// Discover services and characteristics.
    fn discover_services(
        &self,
    ) -> impl Future<Output = Result<Vec<ServiceDescriptor>, TransportError>> + Send;

    /// Subscribe to the notify characteristic and remember the write
    /// characteristic for [`write`](Self::write).
    ///
    /// The returned channel yields notifications and, last, a
    /// [`LinkEvent::Disconnected`] when the link drops.
    fn subscribe(
        &self,
        endpoints: Endpoints,
    ) -> impl Future<Output = Result<mpsc::Receiver<LinkEvent>, TransportError>> + Send;

    /// Write one frame to the write characteristic. Resolves when the
    /// transport has delivered it.
    fn write(&self, bytes: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Tear the link down.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Platform-specific operations the protocol needs but BLE stacks expose
/// unevenly.
pub trait TransportCapabilities: Send + Sync {
    /// Remove any pairing bond with `device`. Bonded peripherals of this
    /// protocol stop delivering notifications on some platforms.
    fn remove_bond(
        &self,
        device: &DeviceInfo,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Drop the platform's cached GATT database for `device`.
    fn force_refresh_cache(
        &self,
        device: &DeviceInfo,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
