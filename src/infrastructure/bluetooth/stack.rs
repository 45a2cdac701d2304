//! Platform BLE Stack Interface
//!
//! The operations the client needs from the underlying BLE stack. Each
//! integration declares up front which optional operations it implements via
//! [`Capabilities`]; nothing is probed per call.

use crate::domain::error::StackError;
use crate::domain::models::{NotificationFrame, PeripheralHandle, ServiceTree};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Optional operations a connection supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// [`GattConnection::discover_services`] performs a live discovery
    pub service_discovery: bool,
    /// [`GattConnection::cached_services`] exposes services populated at connect time
    pub cached_services: bool,
}

#[async_trait]
pub trait BleStack: Send + Sync {
    /// Scan for advertisements for `duration`, then stop the radio.
    async fn scan(&self, duration: Duration) -> Result<Vec<PeripheralHandle>, StackError>;

    /// Open a GATT connection to `address`.
    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Box<dyn GattConnection>, StackError>;
}

#[async_trait]
pub trait GattConnection: Send + Sync {
    fn address(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    async fn is_connected(&self) -> Result<bool, StackError>;

    async fn discover_services(&self) -> Result<ServiceTree, StackError> {
        Err(StackError::NotSupported("service discovery".into()))
    }

    fn cached_services(&self) -> Option<ServiceTree> {
        None
    }

    /// Register for notifications; frames arrive on the returned receiver in
    /// the order the peripheral sent them.
    async fn subscribe(
        &self,
        uuid: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<NotificationFrame>, StackError>;

    async fn unsubscribe(&self, uuid: Uuid) -> Result<(), StackError>;

    async fn disconnect(&self) -> Result<(), StackError>;

    /// Flips to `true` when the peripheral drops the link.
    fn link_lost(&self) -> watch::Receiver<bool>;
}
