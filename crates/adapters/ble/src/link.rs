//! An open GATT link to one bridge.
//!
//! After [`subscribe`](Link::subscribe) a pump task forwards notifications
//! from the notify characteristic and watches the adapter for the
//! peripheral's disconnection, which it reports as the last event.

use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::{Mutex, OnceLock};

use btleplug::api::{
    Central as _, CentralEvent, Characteristic, Peripheral as _, Service, ValueNotification,
    WriteType,
};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt as _};
use uuid::Uuid;

use motobridge_app::ports::{Endpoints, Link, LinkEvent, ServiceDescriptor, TransportError};

use crate::error::BleError;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;
type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// A connected bridge.
#[derive(Debug)]
pub struct BtleLink {
    adapter: Adapter,
    peripheral: Peripheral,
    buffer: usize,
    write_char: OnceLock<Characteristic>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BtleLink {
    pub(crate) fn new(adapter: Adapter, peripheral: Peripheral, buffer: usize) -> Self {
        Self {
            adapter,
            peripheral,
            buffer: buffer.max(1),
            write_char: OnceLock::new(),
            pump: Mutex::new(None),
        }
    }

    fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<Characteristic, BleError> {
        find_characteristic(&self.peripheral.services(), service, uuid)
            .ok_or(BleError::CharacteristicNotFound { uuid })
    }

    fn stop_pump(&self) {
        let task = match self.pump.lock() {
            Ok(mut pump) => pump.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Link for BtleLink {
    async fn discover_services(&self) -> Result<Vec<ServiceDescriptor>, TransportError> {
        self.peripheral
            .discover_services()
            .await
            .map_err(BleError::from)?;
        let services = describe(&self.peripheral.services());
        tracing::debug!(count = services.len(), "services discovered");
        Ok(services)
    }

    async fn subscribe(
        &self,
        endpoints: Endpoints,
    ) -> Result<mpsc::Receiver<LinkEvent>, TransportError> {
        let notify = self.characteristic(endpoints.service, endpoints.notify)?;
        let write = self.characteristic(endpoints.service, endpoints.write)?;

        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(BleError::from)?;
        let events = self.adapter.events().await.map_err(BleError::from)?;
        self.peripheral
            .subscribe(&notify)
            .await
            .map_err(BleError::from)?;
        let _ = self.write_char.set(write);

        let (sender, receiver) = mpsc::channel(self.buffer);
        let task = tokio::spawn(pump(
            self.peripheral.id(),
            notify.uuid,
            notifications,
            events,
            sender,
        ));
        self.stop_pump();
        if let Ok(mut pump) = self.pump.lock() {
            *pump = Some(task);
        }
        tracing::debug!(notify = %notify.uuid, "notifications enabled");
        Ok(receiver)
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.write_char.get().ok_or(TransportError::NotConnected)?;
        self.peripheral
            .write(characteristic, bytes, WriteType::WithResponse)
            .await
            .map_err(|err| TransportError::Write(Box::new(BleError::from(err))))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.stop_pump();
        self.peripheral.disconnect().await.map_err(BleError::from)?;
        tracing::info!(address = %self.peripheral.address(), "GATT link closed");
        Ok(())
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

async fn pump(
    id: PeripheralId,
    notify: Uuid,
    mut notifications: NotificationStream,
    mut events: EventStream,
    sender: mpsc::Sender<LinkEvent>,
) {
    loop {
        tokio::select! {
            notification = notifications.next() => match notification {
                Some(notification) if notification.uuid == notify => {
                    if sender.send(LinkEvent::Notification(notification.value)).await.is_err() {
                        return;
                    }
                }
                Some(_) => {}
                None => break,
            },
            event = events.next() => match event {
                Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => break,
                Some(_) => {}
                None => break,
            },
        }
    }
    tracing::debug!("peripheral disconnected");
    let _ = sender.send(LinkEvent::Disconnected).await;
}

fn describe(services: &BTreeSet<Service>) -> Vec<ServiceDescriptor> {
    services
        .iter()
        .map(|service| ServiceDescriptor {
            uuid: service.uuid,
            characteristics: service
                .characteristics
                .iter()
                .map(|characteristic| characteristic.uuid)
                .collect(),
        })
        .collect()
}

fn find_characteristic(
    services: &BTreeSet<Service>,
    service: Uuid,
    uuid: Uuid,
) -> Option<Characteristic> {
    services
        .iter()
        .find(|candidate| candidate.uuid == service)?
        .characteristics
        .iter()
        .find(|characteristic| characteristic.uuid == uuid)
        .cloned()
}
