//! btleplug Integration
//!
//! [`BleStack`] backed by the platform's native BLE API through `btleplug`.
//! Uses the first adapter the platform manager reports.

use crate::domain::error::StackError;
use crate::domain::models::{
    CharProperty, Characteristic, Descriptor, NotificationFrame, PeripheralHandle, Service,
    ServiceTree,
};
use crate::infrastructure::bluetooth::stack::{BleStack, Capabilities, GattConnection};
use async_trait::async_trait;
use btleplug::api::{
    self, Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl From<btleplug::Error> for StackError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::PermissionDenied => StackError::Refused("permission denied".into()),
            btleplug::Error::DeviceNotFound => StackError::DeviceNotFound("peripheral".into()),
            btleplug::Error::NotConnected => StackError::NotConnected,
            btleplug::Error::NotSupported(what) => StackError::NotSupported(what),
            btleplug::Error::TimedOut(after) => StackError::Timeout(after),
            other => StackError::Other(other.to_string()),
        }
    }
}

/// BlueZ and WinRT report a rejected CCCD write as a generic error whose text
/// names the GATT status.
fn subscribe_error(e: btleplug::Error) -> StackError {
    let text = e.to_string();
    if text.contains("NotSupported") || text.contains("NotPermitted") {
        return StackError::NotSupported(text);
    }
    StackError::from(e)
}

pub struct BtleplugStack {
    adapter: Adapter,
}

impl BtleplugStack {
    /// Open the first Bluetooth adapter.
    pub async fn new() -> Result<Self, StackError> {
        let manager = Manager::new()
            .await
            .map_err(|e| StackError::Unavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| StackError::Unavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| StackError::Unavailable("no Bluetooth adapter found".into()))?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter: {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }
        Ok(Self { adapter })
    }

    async fn find(&self, address: &str) -> Result<Peripheral, StackError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.id().to_string().eq_ignore_ascii_case(address)
                || peripheral.address().to_string().eq_ignore_ascii_case(address)
            {
                return Ok(peripheral);
            }
        }
        Err(StackError::DeviceNotFound(address.to_string()))
    }
}

/// Stops the scan if the scanning future is dropped early.
struct ScanGuard {
    adapter: Option<Adapter>,
}

impl ScanGuard {
    async fn stop(mut self) {
        if let Some(adapter) = self.adapter.take() {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if let Some(adapter) = self.adapter.take() {
            tokio::spawn(async move {
                let _ = adapter.stop_scan().await;
            });
        }
    }
}

/// Runs `cleanup` if dropped while still armed, e.g. when the owning future is
/// cancelled mid-await.
struct DropGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> DropGuard<F> {
    fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    fn disarm(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for DropGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

/// Disconnect from a synchronous context, if a runtime is still around.
fn spawn_disconnect(peripheral: Peripheral) {
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                debug!("Background disconnect failed: {}", e);
            }
        });
    }
}

#[async_trait]
impl BleStack for BtleplugStack {
    async fn scan(&self, duration: Duration) -> Result<Vec<PeripheralHandle>, StackError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| StackError::Unavailable(e.to_string()))?;
        let guard = ScanGuard {
            adapter: Some(self.adapter.clone()),
        };
        tokio::time::sleep(duration).await;
        guard.stop().await;

        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Skipping {}: {}", peripheral.id(), e);
                    continue;
                }
            };
            found.push(PeripheralHandle {
                name: properties.local_name,
                address: peripheral.id().to_string(),
                signal_strength: properties.rssi.map(i32::from),
            });
        }
        Ok(found)
    }

    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Box<dyn GattConnection>, StackError> {
        let peripheral = self.find(address).await?;

        // Subscribe to adapter events before connecting so an early drop is seen.
        let mut events = self.adapter.events().await?;

        // Cancelled mid-connect: the platform may still bring the link up.
        let pending = peripheral.clone();
        let guard = DropGuard::new(move || spawn_disconnect(pending));
        let connected = tokio::time::timeout(timeout, peripheral.connect()).await;
        guard.disarm();

        match connected {
            Ok(result) => result?,
            Err(_) => {
                // The platform may still complete the pending connect.
                let _ = peripheral.disconnect().await;
                return Err(StackError::Timeout(timeout));
            }
        }

        let (lost_tx, lost_rx) = watch::channel(false);
        let id = peripheral.id();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        info!("Peripheral {} disconnected", gone);
                        let _ = lost_tx.send(true);
                        break;
                    }
                }
            }
        });

        Ok(Box::new(BtleplugConnection {
            address: address.to_string(),
            peripheral,
            lost: lost_rx,
            watcher,
            forwarders: Mutex::new(HashMap::new()),
            released: AtomicBool::new(false),
        }))
    }
}

pub struct BtleplugConnection {
    address: String,
    peripheral: Peripheral,
    lost: watch::Receiver<bool>,
    watcher: JoinHandle<()>,
    forwarders: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    released: AtomicBool,
}

impl BtleplugConnection {
    fn characteristic(&self, uuid: Uuid) -> Result<api::Characteristic, StackError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| {
                StackError::NotSupported(format!("characteristic {} not found on peripheral", uuid))
            })
    }

    fn stop_forwarder(&self, uuid: Uuid) {
        let mut forwarders = self.forwarders.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = forwarders.remove(&uuid) {
            task.abort();
        }
    }

    fn stop_all_forwarders(&self) {
        let mut forwarders = self.forwarders.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in forwarders.drain() {
            task.abort();
        }
    }
}

#[async_trait]
impl GattConnection for BtleplugConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            service_discovery: true,
            cached_services: true,
        }
    }

    async fn is_connected(&self) -> Result<bool, StackError> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn discover_services(&self) -> Result<ServiceTree, StackError> {
        self.peripheral.discover_services().await?;
        Ok(service_tree(&self.peripheral))
    }

    fn cached_services(&self) -> Option<ServiceTree> {
        Some(service_tree(&self.peripheral))
    }

    async fn subscribe(
        &self,
        uuid: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<NotificationFrame>, StackError> {
        let characteristic = self.characteristic(uuid)?;
        let mut notifications = self.peripheral.notifications().await?;
        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(subscribe_error)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                let frame = NotificationFrame {
                    sender: notification.uuid,
                    payload: notification.value,
                };
                if tx.send(frame).is_err() {
                    break;
                }
            }
            debug!("Notification forwarder for {} finished", uuid);
        });

        let previous = self
            .forwarders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uuid, forwarder);
        if let Some(task) = previous {
            task.abort();
        }
        Ok(rx)
    }

    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), StackError> {
        self.stop_forwarder(uuid);
        let characteristic = self.characteristic(uuid)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StackError> {
        self.released.store(true, Ordering::SeqCst);
        self.stop_all_forwarders();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    fn link_lost(&self) -> watch::Receiver<bool> {
        self.lost.clone()
    }
}

impl Drop for BtleplugConnection {
    fn drop(&mut self) {
        self.watcher.abort();
        self.stop_all_forwarders();
        // Dropped mid-pipeline (e.g. cancelled during connect): do not leave the link up.
        if !self.released.load(Ordering::SeqCst) {
            spawn_disconnect(self.peripheral.clone());
        }
    }
}

fn service_tree(peripheral: &Peripheral) -> ServiceTree {
    let services = peripheral
        .services()
        .into_iter()
        .map(|service| Service {
            uuid: service.uuid,
            characteristics: service
                .characteristics
                .into_iter()
                .map(|c| Characteristic {
                    uuid: c.uuid,
                    properties: properties(c.properties),
                    descriptors: c
                        .descriptors
                        .into_iter()
                        .map(|d| Descriptor {
                            uuid: d.uuid,
                            handle: None,
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();
    ServiceTree::new(services)
}

fn properties(flags: CharPropFlags) -> std::collections::BTreeSet<CharProperty> {
    [
        (CharPropFlags::BROADCAST, CharProperty::Broadcast),
        (CharPropFlags::READ, CharProperty::Read),
        (
            CharPropFlags::WRITE_WITHOUT_RESPONSE,
            CharProperty::WriteWithoutResponse,
        ),
        (CharPropFlags::WRITE, CharProperty::Write),
        (CharPropFlags::NOTIFY, CharProperty::Notify),
        (CharPropFlags::INDICATE, CharProperty::Indicate),
        (
            CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
            CharProperty::AuthenticatedSignedWrites,
        ),
        (
            CharPropFlags::EXTENDED_PROPERTIES,
            CharProperty::ExtendedProperties,
        ),
    ]
    .into_iter()
    .filter(|(flag, _)| flags.contains(*flag))
    .map(|(_, property)| property)
    .collect()
}
