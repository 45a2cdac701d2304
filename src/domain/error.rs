//! Error types
//!
//! [`StackError`] is what the platform BLE stack reports. Each pipeline stage
//! maps it into a [`BleError`] kind the operator can act on.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failure reported by the platform BLE stack
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StackError {
    #[error("bluetooth adapter unavailable: {0}")]
    Unavailable(String),
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("operation not supported: {0}")]
    NotSupported(String),
    #[error("request refused: {0}")]
    Refused(String),
    #[error("not connected")]
    NotConnected,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

/// Terminal errors of a client run
#[derive(Debug, Error)]
pub enum BleError {
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("invalid device selection: {0}")]
    InvalidSelection(String),
    #[error("no response from {address} within {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },
    #[error("connection to {address} refused: {reason}")]
    ConnectRefused { address: String, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unable to obtain services (tried: {})", .attempts.join(", "))]
    ServicesUnavailable { attempts: Vec<String> },
    #[error("no characteristic with 'notify' or 'indicate' found")]
    NoNotifiableCharacteristic,
    #[error("subscription to {uuid} rejected by peripheral: {reason}")]
    SubscribeUnsupported { uuid: Uuid, reason: String },
    #[error("characteristic {0} is already subscribed on this connection")]
    AlreadySubscribed(Uuid),
    #[error("not connected")]
    NotConnected,
    #[error("cancelled")]
    Cancelled,
}

impl BleError {
    /// Follow-up hint printed under the error, if any
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Scan(_) => Some("Check that Bluetooth is enabled and the adapter is accessible."),
            Self::DeviceNotFound(_) => Some("Make sure the peripheral is powered and advertising."),
            Self::NoNotifiableCharacteristic => Some(
                "If you expect notifications, ensure the peripheral creates the characteristic with notify enabled.",
            ),
            Self::SubscribeUnsupported { .. } => {
                Some("The peripheral likely does not support notifications on that characteristic.")
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    Unsubscribe,
    Disconnect,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsubscribe => write!(f, "unsubscribe"),
            Self::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Non-fatal failure during teardown. Logged, never raised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{step} failed during teardown: {error}")]
pub struct TeardownWarning {
    pub step: TeardownStep,
    pub error: StackError,
}
