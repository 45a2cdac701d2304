//! In-memory BLE stack for tests

use crate::domain::error::StackError;
use crate::domain::models::{
    CharProperty, Characteristic, Descriptor, NotificationFrame, PeripheralHandle, Service,
    ServiceTree,
};
use crate::infrastructure::bluetooth::stack::{BleStack, Capabilities, GattConnection};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

pub const NOTIFY_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// One service with a single notify-capable characteristic
pub fn notify_tree() -> ServiceTree {
    ServiceTree::new(vec![Service {
        uuid: SERVICE_UUID,
        characteristics: vec![Characteristic {
            uuid: NOTIFY_UUID,
            properties: [CharProperty::Notify].into(),
            descriptors: vec![Descriptor {
                uuid: Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb),
                handle: Some(0x000e),
            }],
        }],
    }])
}

pub fn advert(name: &str, address: &str, rssi: i32) -> PeripheralHandle {
    PeripheralHandle {
        name: Some(name.to_string()),
        address: address.to_string(),
        signal_strength: Some(rssi),
    }
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub connect: AtomicUsize,
    pub connect_cleanup: AtomicUsize,
    pub discover: AtomicUsize,
    pub subscribe: AtomicUsize,
    pub unsubscribe: AtomicUsize,
    pub disconnect: AtomicUsize,
}

impl CallCounts {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Test-side handle onto the simulated peripheral
#[derive(Debug)]
pub struct MockControl {
    pub calls: CallCounts,
    frames: Mutex<Option<mpsc::UnboundedSender<NotificationFrame>>>,
    link: watch::Sender<bool>,
}

impl MockControl {
    fn new() -> Self {
        let (link, _) = watch::channel(false);
        Self {
            calls: CallCounts::default(),
            frames: Mutex::new(None),
            link,
        }
    }

    /// Deliver a notification as the peripheral would.
    pub fn push_frame(&self, sender: Uuid, payload: &[u8]) -> bool {
        let frames = self.frames.lock().unwrap();
        match frames.as_ref() {
            Some(tx) => tx
                .send(NotificationFrame {
                    sender,
                    payload: payload.to_vec(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Simulate the peripheral going away.
    pub fn drop_link(&self) {
        self.link.send_replace(true);
    }

    pub fn close_stream(&self) {
        self.frames.lock().unwrap().take();
    }

    pub fn connects(&self) -> usize {
        CallCounts::get(&self.calls.connect)
    }

    /// Pending connects the stack abandoned after its own timeout
    pub fn connect_cleanups(&self) -> usize {
        CallCounts::get(&self.calls.connect_cleanup)
    }

    pub fn discovers(&self) -> usize {
        CallCounts::get(&self.calls.discover)
    }

    pub fn subscribes(&self) -> usize {
        CallCounts::get(&self.calls.subscribe)
    }

    pub fn unsubscribes(&self) -> usize {
        CallCounts::get(&self.calls.unsubscribe)
    }

    pub fn disconnects(&self) -> usize {
        CallCounts::get(&self.calls.disconnect)
    }
}

#[derive(Debug, Clone)]
pub struct MockPeripheral {
    pub capabilities: Capabilities,
    pub discovered: Result<ServiceTree, StackError>,
    pub discover_delay: Option<Duration>,
    pub cached: Option<ServiceTree>,
    pub reports_connected: bool,
    pub subscribe_delay: Option<Duration>,
    pub subscribe_error: Option<StackError>,
    pub unsubscribe_error: Option<StackError>,
    pub disconnect_error: Option<StackError>,
}

impl Default for MockPeripheral {
    fn default() -> Self {
        Self {
            capabilities: Capabilities {
                service_discovery: true,
                cached_services: true,
            },
            discovered: Ok(notify_tree()),
            discover_delay: None,
            cached: Some(notify_tree()),
            reports_connected: true,
            subscribe_delay: None,
            subscribe_error: None,
            unsubscribe_error: None,
            disconnect_error: None,
        }
    }
}

pub struct MockStack {
    pub advertisements: Vec<PeripheralHandle>,
    pub scan_error: Option<StackError>,
    /// Overrides how long a scan takes, regardless of the requested duration
    pub scan_time: Option<Duration>,
    /// Errors returned by successive connect attempts before one succeeds
    pub connect_errors: Mutex<VecDeque<StackError>>,
    pub connect_delay: Option<Duration>,
    /// Device lookup succeeds but the link never comes up; the stack's own
    /// timeout then abandons the attempt
    pub connect_stalls: bool,
    pub peripheral: MockPeripheral,
    pub control: Arc<MockControl>,
}

impl MockStack {
    pub fn new(advertisements: Vec<PeripheralHandle>) -> Self {
        Self::with_peripheral(advertisements, MockPeripheral::default())
    }

    pub fn with_peripheral(advertisements: Vec<PeripheralHandle>, peripheral: MockPeripheral) -> Self {
        Self {
            advertisements,
            scan_error: None,
            scan_time: None,
            connect_errors: Mutex::new(VecDeque::new()),
            connect_delay: None,
            connect_stalls: false,
            peripheral,
            control: Arc::new(MockControl::new()),
        }
    }

    pub fn fail_connects(self, errors: Vec<StackError>) -> Self {
        *self.connect_errors.lock().unwrap() = errors.into();
        self
    }

    /// Connection that skips the scan/connect stages
    pub fn connection(&self, address: &str) -> Box<dyn GattConnection> {
        Box::new(MockConnection {
            address: address.to_string(),
            peripheral: self.peripheral.clone(),
            control: self.control.clone(),
        })
    }
}

#[async_trait]
impl BleStack for MockStack {
    async fn scan(&self, duration: Duration) -> Result<Vec<PeripheralHandle>, StackError> {
        if let Some(err) = &self.scan_error {
            return Err(err.clone());
        }
        tokio::time::sleep(self.scan_time.unwrap_or(duration)).await;
        Ok(self.advertisements.clone())
    }

    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Box<dyn GattConnection>, StackError> {
        self.control.calls.connect.fetch_add(1, Ordering::SeqCst);
        if self.connect_stalls {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let stalled = tokio::time::timeout(timeout, std::future::pending::<()>()).await;
            if stalled.is_err() {
                self.control.calls.connect_cleanup.fetch_add(1, Ordering::SeqCst);
                return Err(StackError::Timeout(timeout));
            }
        }
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.advertisements.iter().any(|a| a.address == address) {
            return Err(StackError::DeviceNotFound(address.to_string()));
        }
        if let Some(err) = self.connect_errors.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.connection(address))
    }
}

pub struct MockConnection {
    address: String,
    peripheral: MockPeripheral,
    control: Arc<MockControl>,
}

#[async_trait]
impl GattConnection for MockConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn capabilities(&self) -> Capabilities {
        self.peripheral.capabilities
    }

    async fn is_connected(&self) -> Result<bool, StackError> {
        Ok(self.peripheral.reports_connected && !*self.control.link.borrow())
    }

    async fn discover_services(&self) -> Result<ServiceTree, StackError> {
        self.control.calls.discover.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.peripheral.discover_delay {
            tokio::time::sleep(delay).await;
        }
        self.peripheral.discovered.clone()
    }

    fn cached_services(&self) -> Option<ServiceTree> {
        self.peripheral.cached.clone()
    }

    async fn subscribe(
        &self,
        _uuid: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<NotificationFrame>, StackError> {
        self.control.calls.subscribe.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.peripheral.subscribe_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.peripheral.subscribe_error {
            return Err(err.clone());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.control.frames.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, _uuid: Uuid) -> Result<(), StackError> {
        self.control.calls.unsubscribe.fetch_add(1, Ordering::SeqCst);
        match &self.peripheral.unsubscribe_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> Result<(), StackError> {
        self.control.calls.disconnect.fetch_add(1, Ordering::SeqCst);
        self.control.close_stream();
        match &self.peripheral.disconnect_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn link_lost(&self) -> watch::Receiver<bool> {
        self.control.link.subscribe()
    }
}
