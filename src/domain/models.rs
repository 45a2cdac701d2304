use crate::domain::error::BleError;
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// A device seen during an advertisement scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    pub name: Option<String>,
    /// Transport-level identifier, unique per peripheral
    pub address: String,
    /// RSSI at advertisement time (dBm)
    pub signal_strength: Option<i32>,
}

impl PeripheralHandle {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// GATT characteristic property bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CharProperty {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
}

impl CharProperty {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Read => "read",
            Self::WriteWithoutResponse => "write-without-response",
            Self::Write => "write",
            Self::Notify => "notify",
            Self::Indicate => "indicate",
            Self::AuthenticatedSignedWrites => "authenticated-signed-writes",
            Self::ExtendedProperties => "extended-properties",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid,
    /// Attribute handle, when the stack exposes one
    pub handle: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: BTreeSet<CharProperty>,
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    /// True if the peripheral can push values for this characteristic
    pub fn can_push(&self) -> bool {
        self.properties.contains(&CharProperty::Notify)
            || self.properties.contains(&CharProperty::Indicate)
    }

    pub fn property_labels(&self) -> Vec<&'static str> {
        self.properties.iter().map(CharProperty::label).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    pub characteristics: Vec<Characteristic>,
}

/// Services discovered on one connection, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceTree {
    pub services: Vec<Service>,
}

impl ServiceTree {
    pub fn new(services: Vec<Service>) -> Self {
        Self { services }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Service-then-characteristic order
    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }
}

/// An active notification registration on one connection
#[derive(Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    characteristic: Uuid,
}

impl SubscriptionHandle {
    pub(crate) fn new(characteristic: Uuid) -> Self {
        Self { characteristic }
    }

    pub fn characteristic(&self) -> Uuid {
        self.characteristic
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    pub sender: Uuid,
    pub payload: Vec<u8>,
}

impl fmt::Display for NotificationFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sender, hex::encode(&self.payload))
    }
}

/// Operator's choice among scan results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelection {
    Index(usize),
    Address(String),
}

impl DeviceSelection {
    /// All-digit input is an index, anything else is taken as an address.
    pub fn parse(input: &str) -> Result<Self, BleError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(BleError::InvalidSelection("no device selected".to_string()));
        }
        if input.chars().all(|c| c.is_ascii_digit()) {
            return input.parse().map(Self::Index).map_err(|_| {
                BleError::InvalidSelection(format!("index {} out of range", input))
            });
        }
        Ok(Self::Address(input.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Subscribing,
    Listening,
    Unsubscribing,
    Disconnecting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    PeripheralDisconnected,
    StreamClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::PeripheralDisconnected => write!(f, "peripheral disconnected"),
            Self::StreamClosed => write!(f, "notification stream closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    ScanResults(Vec<PeripheralHandle>),
    ConnectionState(ConnectionState),
    ServicesResolved(ServiceTree),
    Subscribed(Uuid),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
