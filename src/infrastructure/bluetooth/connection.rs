//! BLE Connection Module
//!
//! Establishes and owns the GATT connection to one peripheral.

use crate::domain::error::{BleError, StackError};
use crate::domain::models::{
    AppEvent, ConnectionState, MessageSeverity, NotificationFrame, StatusMessage,
    SubscriptionHandle,
};
use crate::domain::settings::SessionConfig;
use crate::infrastructure::bluetooth::stack::{BleStack, GattConnection};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Extra time granted to the stack beyond its own connect timeout
const CONNECT_GRACE: Duration = Duration::from_secs(2);

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub timeout: Duration,
    /// Total attempts, including the first
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl From<&SessionConfig> for ConnectionConfig {
    fn from(config: &SessionConfig) -> Self {
        Self {
            timeout: config.connect_timeout,
            attempts: config.connect_attempts,
            retry_delay: config.connect_retry_delay,
        }
    }
}

/// Opens connections with bounded timeouts and explicit state verification
pub struct BleConnector {
    stack: Arc<dyn BleStack>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    config: ConnectionConfig,
}

impl BleConnector {
    pub fn new(
        stack: Arc<dyn BleStack>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            stack,
            event_sender,
            config,
        }
    }

    /// Connect to a device by address, retrying transient failures.
    pub async fn connect(&self, address: &str) -> Result<ConnectionHandle, BleError> {
        info!("Connecting to {} ...", address);
        self.send_state(ConnectionState::Connecting);

        let attempts = self.config.attempts.max(1);
        let mut attempt = 1;
        let err = loop {
            match self.connect_once(address).await {
                Ok(connection) => {
                    info!("Connected to {}", address);
                    self.send_state(ConnectionState::Connected);
                    return Ok(connection);
                }
                Err(e @ BleError::DeviceNotFound(_)) => break e,
                Err(e) => {
                    warn!("Connection attempt {} to {} failed: {}", attempt, address, e);
                    if attempt >= attempts {
                        break e;
                    }
                    self.send_log(
                        &format!("Connect failed, retrying ({}/{})...", attempt + 1, attempts),
                        MessageSeverity::Warning,
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
            }
        };

        self.send_state(ConnectionState::Failed(err.to_string()));
        Err(err)
    }

    async fn connect_once(&self, address: &str) -> Result<ConnectionHandle, BleError> {
        let timeout = self.config.timeout;
        // The stack enforces `timeout` itself and cleans up a pending connect;
        // this outer bound only catches a stack that never returns.
        let guard = timeout + CONNECT_GRACE;
        let link = match tokio::time::timeout(guard, self.stack.connect(address, timeout)).await
        {
            Err(_) | Ok(Err(StackError::Timeout(_))) => {
                return Err(BleError::ConnectTimeout {
                    address: address.to_string(),
                    timeout,
                })
            }
            Ok(Err(StackError::DeviceNotFound(a))) => return Err(BleError::DeviceNotFound(a)),
            Ok(Err(StackError::Refused(reason))) | Ok(Err(StackError::NotSupported(reason))) => {
                return Err(BleError::ConnectRefused {
                    address: address.to_string(),
                    reason,
                })
            }
            Ok(Err(e)) => return Err(BleError::Transport(e.to_string())),
            Ok(Ok(link)) => link,
        };

        // Some stacks return from connect without an established link.
        let verified = link.is_connected().await;
        match verified {
            Ok(true) => Ok(ConnectionHandle::new(link)),
            Ok(false) => {
                release_quietly(link.as_ref()).await;
                Err(BleError::ConnectRefused {
                    address: address.to_string(),
                    reason: "stack reports not connected after connect".to_string(),
                })
            }
            Err(e) => {
                release_quietly(link.as_ref()).await;
                Err(BleError::Transport(e.to_string()))
            }
        }
    }

    fn send_state(&self, state: ConnectionState) {
        let _ = self.event_sender.send(AppEvent::ConnectionState(state));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

async fn release_quietly(link: &dyn GattConnection) {
    if let Err(e) = link.disconnect().await {
        debug!("Ignoring disconnect error on half-open link: {}", e);
    }
}

/// Exclusive owner of one live connection
pub struct ConnectionHandle {
    link: Box<dyn GattConnection>,
    lost: watch::Receiver<bool>,
    released: bool,
    subscriptions: HashSet<Uuid>,
}

impl ConnectionHandle {
    pub fn new(link: Box<dyn GattConnection>) -> Self {
        let lost = link.link_lost();
        Self {
            link,
            lost,
            released: false,
            subscriptions: HashSet::new(),
        }
    }

    pub fn address(&self) -> &str {
        self.link.address()
    }

    pub fn link(&self) -> &dyn GattConnection {
        self.link.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        if self.released || self.is_link_lost() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Connected
        }
    }

    pub fn is_link_lost(&self) -> bool {
        *self.lost.borrow()
    }

    /// Resolves when the peripheral drops the link.
    ///
    /// Never resolves if the stack stops reporting link events.
    pub async fn link_lost(&self) {
        let mut lost = self.lost.clone();
        if lost.wait_for(|lost| *lost).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Register for notifications on `uuid`.
    ///
    /// A characteristic already subscribed on this connection is rejected.
    pub async fn subscribe(
        &mut self,
        uuid: Uuid,
    ) -> Result<(SubscriptionHandle, mpsc::UnboundedReceiver<NotificationFrame>), BleError> {
        if self.state() != ConnectionState::Connected {
            return Err(BleError::NotConnected);
        }
        if self.subscriptions.contains(&uuid) {
            return Err(BleError::AlreadySubscribed(uuid));
        }

        let frames = self.link.subscribe(uuid).await.map_err(|e| match e {
            StackError::NotSupported(reason) | StackError::Refused(reason) => {
                BleError::SubscribeUnsupported { uuid, reason }
            }
            StackError::NotConnected => BleError::NotConnected,
            other => BleError::Transport(other.to_string()),
        })?;

        self.subscriptions.insert(uuid);
        Ok((SubscriptionHandle::new(uuid), frames))
    }

    pub async fn unsubscribe(&mut self, handle: SubscriptionHandle) -> Result<(), StackError> {
        let uuid = handle.characteristic();
        self.subscriptions.remove(&uuid);
        self.link.unsubscribe(uuid).await
    }

    /// Disconnect. A second call is a no-op.
    pub async fn disconnect(&mut self) -> Result<(), StackError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.subscriptions.clear();
        self.link.disconnect().await
    }

    /// Best-effort disconnect, for error paths before a session exists
    pub async fn release(mut self) {
        if let Err(e) = self.disconnect().await {
            warn!("Disconnect from {} failed: {}", self.address(), e);
        }
    }
}
