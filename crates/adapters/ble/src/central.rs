//! Discovery and link establishment on the host BLE adapter.

use btleplug::api::{Central as _, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};

use motobridge_app::ports::{Central, DeviceInfo, TransportError};
use motobridge_domain::gatt;

use crate::config::BleConfig;
use crate::error::BleError;
use crate::link::BtleLink;

/// The host adapter in the BLE central role.
#[derive(Debug, Clone)]
pub struct BtleCentral {
    adapter: Adapter,
    config: BleConfig,
}

impl BtleCentral {
    /// Open the configured host adapter.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::NotAvailable`] when the host has no adapter at
    /// `config.adapter_index`, or the stack error that prevented listing
    /// adapters.
    pub async fn new(config: BleConfig) -> Result<Self, BleError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(config.adapter_index)
            .ok_or(BleError::NotAvailable)?;

        match adapter.adapter_info().await {
            Ok(info) => tracing::info!(adapter = %info, "BLE adapter ready"),
            Err(err) => tracing::debug!(%err, "BLE adapter info unavailable"),
        }
        Ok(Self { adapter, config })
    }

    async fn find(&self, address: &str) -> Result<Peripheral, BleError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                return Ok(peripheral);
            }
        }
        Err(BleError::PeripheralNotFound {
            address: address.to_owned(),
        })
    }

    async fn list(&self) -> Result<Vec<DeviceInfo>, BleError> {
        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            tracing::trace!(
                address = %properties.address,
                name = ?properties.local_name,
                rssi = ?properties.rssi,
                "peripheral seen"
            );
            found.push(DeviceInfo {
                address: properties.address.to_string(),
                name: properties.local_name,
                rssi: properties.rssi,
            });
        }
        Ok(found)
    }
}

impl Central for BtleCentral {
    type Link = BtleLink;

    async fn start_scan(&self) -> Result<(), TransportError> {
        self.adapter
            .start_scan(ScanFilter {
                services: vec![gatt::UART_SERVICE],
            })
            .await
            .map_err(BleError::from)?;
        tracing::debug!("BLE scan started");
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await.map_err(BleError::from)?;
        tracing::debug!("BLE scan stopped");
        Ok(())
    }

    async fn discovered(&self) -> Result<Vec<DeviceInfo>, TransportError> {
        Ok(self.list().await?)
    }

    async fn connect(&self, device: &DeviceInfo) -> Result<BtleLink, TransportError> {
        let peripheral = self.find(&device.address).await?;
        peripheral.connect().await.map_err(BleError::Connect)?;
        tracing::info!(address = %device.address, "GATT link open");
        Ok(BtleLink::new(
            self.adapter.clone(),
            peripheral,
            self.config.notification_buffer,
        ))
    }
}
