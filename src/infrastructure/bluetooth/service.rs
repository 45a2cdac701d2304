//! Bluetooth Service Module
//!
//! Main service that runs the client pipeline: scan, connect, resolve
//! services, select a characteristic, then stream notifications.

use crate::domain::error::BleError;
use crate::domain::models::{
    AppEvent, ConnectionState, MessageSeverity, NotificationFrame, PeripheralHandle,
    StatusMessage,
};
use crate::domain::selector;
use crate::domain::settings::SessionConfig;
use crate::infrastructure::bluetooth::{
    cancel::CancelHandle,
    connection::{BleConnector, ConnectionConfig},
    discovery::ServiceResolver,
    scanner::BleScanner,
    session::{NotificationSession, SessionSummary},
    stack::BleStack,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService {
    stack: Arc<dyn BleStack>,
    config: SessionConfig,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    cancel: CancelHandle,
}

impl BluetoothService {
    pub fn new(
        stack: Arc<dyn BleStack>,
        config: SessionConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        cancel: CancelHandle,
    ) -> Self {
        Self {
            stack,
            config,
            event_sender,
            cancel,
        }
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Scan for advertising devices
    pub async fn scan(&self) -> Result<Vec<PeripheralHandle>, BleError> {
        let scanner = BleScanner::new(self.stack.clone());
        let devices = self
            .cancel
            .run(scanner.scan(self.config.scan_duration))
            .await?;
        let _ = self
            .event_sender
            .send(AppEvent::ScanResults(devices.clone()));
        Ok(devices)
    }

    /// Connect, resolve services and subscribe.
    ///
    /// Any failure after the connection is up releases it before returning.
    pub async fn open_session(
        &self,
        address: &str,
        preferred: Option<Uuid>,
    ) -> Result<NotificationSession, BleError> {
        let connector = BleConnector::new(
            self.stack.clone(),
            self.event_sender.clone(),
            ConnectionConfig::from(&self.config),
        );
        let connection = self.cancel.run(connector.connect(address)).await?;

        let resolver = ServiceResolver::new(self.config.resolve_timeout);
        let selected = async {
            let tree = self.cancel.run(resolver.resolve(connection.link())).await?;
            let _ = self
                .event_sender
                .send(AppEvent::ServicesResolved(tree.clone()));
            selector::select(&tree, preferred)
        }
        .await;

        let uuid = match selected {
            Ok(uuid) => uuid,
            Err(e) => {
                connection.release().await;
                self.send_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let mut session = NotificationSession::new(connection, self.config.teardown_timeout);
        match self.cancel.run(session.subscribe(uuid)).await {
            Ok(()) => {
                let _ = self.event_sender.send(AppEvent::Subscribed(uuid));
                Ok(session)
            }
            Err(e) => {
                // Also covers a subscribe interrupted by cancellation.
                session.close().await;
                self.send_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Run the session on `address` until cancelled or disconnected.
    pub async fn run_session<F>(
        &self,
        address: &str,
        preferred: Option<Uuid>,
        on_frame: F,
    ) -> Result<SessionSummary, BleError>
    where
        F: FnMut(&NotificationFrame),
    {
        let mut session = self.open_session(address, preferred).await?;
        self.send_log(
            "Listening for notifications. Press Ctrl-C to quit.",
            MessageSeverity::Info,
        );

        let result = session.listen(&self.cancel, on_frame).await;
        if result.is_err() {
            session.close().await;
        }
        self.send_state(ConnectionState::Disconnected);

        let summary = result?;
        for warning in &summary.teardown.warnings {
            self.send_log(&warning.to_string(), MessageSeverity::Warning);
        }
        info!(
            "Session on {} ended: {}",
            summary.characteristic, summary.stop_reason
        );
        Ok(summary)
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
