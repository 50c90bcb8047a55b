//! Platform capabilities btleplug does not expose.
//!
//! btleplug offers no way to remove a bond or invalidate the cached GATT
//! database, so both operations only log. Hosts where bonding breaks
//! notifications need the bond removed out of band (e.g. `bluetoothctl
//! remove <address>`).

use motobridge_app::ports::{DeviceInfo, TransportCapabilities, TransportError};

#[derive(Debug, Clone, Copy, Default)]
pub struct BtleCapabilities;

impl TransportCapabilities for BtleCapabilities {
    async fn remove_bond(&self, device: &DeviceInfo) -> Result<(), TransportError> {
        tracing::debug!(address = %device.address, "bond removal not supported, skipping");
        Ok(())
    }

    async fn force_refresh_cache(&self, device: &DeviceInfo) -> Result<(), TransportError> {
        tracing::debug!(address = %device.address, "GATT cache refresh not supported, skipping");
        Ok(())
    }
}
