//! BLE adapter error types.

use motobridge_app::ports::TransportError;

/// Errors specific to the BLE adapter.
#[derive(Debug, thiserror::Error)]
pub enum BleError {
    /// No BLE adapter found on the host.
    #[error("no BLE adapter available")]
    NotAvailable,

    /// Discovery found no peripheral with this address.
    #[error("peripheral {address} not found")]
    PeripheralNotFound { address: String },

    /// Establishing the GATT connection failed.
    #[error("failed to connect to peripheral")]
    Connect(#[source] btleplug::Error),

    /// A required characteristic is missing after service discovery.
    #[error("characteristic {uuid} not found")]
    CharacteristicNotFound { uuid: uuid::Uuid },

    /// Any other stack failure.
    #[error("BLE stack error")]
    Stack(#[from] btleplug::Error),
}

impl From<BleError> for TransportError {
    fn from(err: BleError) -> Self {
        match err {
            BleError::NotAvailable => Self::NotAvailable,
            BleError::PeripheralNotFound { .. }
            | BleError::Stack(btleplug::Error::DeviceNotFound) => Self::DeviceNotFound,
            BleError::Stack(btleplug::Error::PermissionDenied)
            | BleError::Connect(btleplug::Error::PermissionDenied) => Self::PermissionDenied,
            BleError::Stack(btleplug::Error::NotConnected) => Self::NotConnected,
            other => Self::Other(Box::new(other)),
        }
    }
}
