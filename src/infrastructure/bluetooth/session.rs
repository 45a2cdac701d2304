//! Notification Session
//!
//! Subscribes to one characteristic, forwards frames to a handler until the
//! session is cancelled, the peripheral disconnects or the stream ends, and
//! then tears the connection down.
//!
//! ```text
//! Idle -> Subscribing -> Listening -> Unsubscribing -> Disconnecting -> Closed
//!              |                 \____ (link lost) ____/
//!              +-- (failure) --> Closed
//! ```
//!
//! Teardown is best-effort: each step is bounded by a timeout and its failure
//! is logged as a [`TeardownWarning`], never returned as an error.

use crate::domain::error::{BleError, StackError, TeardownStep, TeardownWarning};
use crate::domain::models::{NotificationFrame, SessionState, StopReason, SubscriptionHandle};
use crate::infrastructure::bluetooth::cancel::CancelHandle;
use crate::infrastructure::bluetooth::connection::ConnectionHandle;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub warnings: Vec<TeardownWarning>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub characteristic: Uuid,
    pub frames_received: u64,
    pub stop_reason: StopReason,
    pub teardown: TeardownReport,
}

pub struct NotificationSession {
    connection: ConnectionHandle,
    state: SessionState,
    subscription: Option<SubscriptionHandle>,
    frames: Option<mpsc::UnboundedReceiver<NotificationFrame>>,
    teardown_timeout: Duration,
}

impl NotificationSession {
    /// Take ownership of `connection`. The session releases it on close.
    pub fn new(connection: ConnectionHandle, teardown_timeout: Duration) -> Self {
        Self {
            connection,
            state: SessionState::Idle,
            subscription: None,
            frames: None,
            teardown_timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn characteristic(&self) -> Option<Uuid> {
        self.subscription.as_ref().map(SubscriptionHandle::characteristic)
    }

    /// Enable notifications on `uuid`.
    ///
    /// On failure the connection is released and the session is closed.
    /// Subscribing again while a subscription is active is rejected.
    pub async fn subscribe(&mut self, uuid: Uuid) -> Result<(), BleError> {
        match self.state {
            SessionState::Idle => {}
            // One subscription target per session.
            SessionState::Listening => {
                return Err(BleError::AlreadySubscribed(
                    self.characteristic().unwrap_or(uuid),
                ));
            }
            _ => return Err(BleError::NotConnected),
        }

        self.set_state(SessionState::Subscribing);
        info!("Subscribing to notifications on: {}", uuid);

        match self.connection.subscribe(uuid).await {
            Ok((handle, frames)) => {
                self.subscription = Some(handle);
                self.frames = Some(frames);
                self.set_state(SessionState::Listening);
                Ok(())
            }
            Err(e) => {
                warn!("Subscribe to {} failed: {}", uuid, e);
                self.release().await;
                Err(e)
            }
        }
    }

    /// Deliver frames to `on_frame` until cancelled, disconnected or the
    /// stream ends, then tear down.
    ///
    /// Frames are handed over in arrival order, one call per frame.
    pub async fn listen<F>(
        &mut self,
        cancel: &CancelHandle,
        mut on_frame: F,
    ) -> Result<SessionSummary, BleError>
    where
        F: FnMut(&NotificationFrame),
    {
        let characteristic = self.characteristic().ok_or(BleError::NotConnected)?;
        let mut frames = match (self.state, self.frames.take()) {
            (SessionState::Listening, Some(frames)) => frames,
            _ => return Err(BleError::NotConnected),
        };

        info!("Listening for notifications on {}", characteristic);
        let mut received = 0u64;
        let stop_reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => break StopReason::Cancelled,
                _ = self.connection.link_lost() => break StopReason::PeripheralDisconnected,
                frame = frames.recv() => match frame {
                    Some(frame) => {
                        received += 1;
                        on_frame(&frame);
                    }
                    None => break StopReason::StreamClosed,
                },
            }
        };
        drop(frames);

        info!(
            "Stopped listening ({}), {} frame(s) received",
            stop_reason, received
        );
        let teardown = self.teardown(stop_reason).await;

        Ok(SessionSummary {
            characteristic,
            frames_received: received,
            stop_reason,
            teardown,
        })
    }

    /// Tear down. Calling this on a closed session does nothing.
    pub async fn close(&mut self) -> TeardownReport {
        self.teardown(StopReason::Cancelled).await
    }

    async fn teardown(&mut self, reason: StopReason) -> TeardownReport {
        match self.state {
            SessionState::Closed => return TeardownReport::default(),
            SessionState::Idle | SessionState::Subscribing => return self.release().await,
            _ => {}
        }

        let mut report = TeardownReport::default();
        self.frames = None;
        let link_gone =
            reason == StopReason::PeripheralDisconnected || self.connection.is_link_lost();

        if let Some(subscription) = self.subscription.take() {
            if link_gone {
                debug!("Link already gone, skipping unsubscribe");
            } else {
                self.set_state(SessionState::Unsubscribing);
                let result = best_effort(
                    self.teardown_timeout,
                    self.connection.unsubscribe(subscription),
                )
                .await;
                record(&mut report, TeardownStep::Unsubscribe, result);
            }
        }

        self.set_state(SessionState::Disconnecting);
        let result = best_effort(self.teardown_timeout, self.connection.disconnect()).await;
        record(&mut report, TeardownStep::Disconnect, result);

        self.set_state(SessionState::Closed);
        report
    }

    /// Disconnect without unsubscribing: nothing was registered.
    async fn release(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        self.subscription = None;
        self.frames = None;
        let result = best_effort(self.teardown_timeout, self.connection.disconnect()).await;
        record(&mut report, TeardownStep::Disconnect, result);
        self.set_state(SessionState::Closed);
        report
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("Session state: {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            warn!(
                "Notification session for {} dropped in state {:?} without teardown",
                self.connection.address(),
                self.state
            );
        }
    }
}

async fn best_effort<F>(timeout: Duration, step: F) -> Result<(), StackError>
where
    F: Future<Output = Result<(), StackError>>,
{
    match tokio::time::timeout(timeout, step).await {
        Ok(result) => result,
        Err(_) => Err(StackError::Timeout(timeout)),
    }
}

fn record(report: &mut TeardownReport, step: TeardownStep, result: Result<(), StackError>) {
    if let Err(error) = result {
        let warning = TeardownWarning { step, error };
        warn!("{}", warning);
        report.warnings.push(warning);
    }
}
