//! GATT identifiers
//!
//! Well-known UUIDs and parsing of the UUID forms operators type in.

use anyhow::{Context, Result};
use uuid::Uuid;

/// Nordic UART Service
pub const NUS_SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";

/// Nordic UART TX characteristic - peripheral to host notifications
pub const NUS_TX_CHAR_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// Client Characteristic Configuration descriptor
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Bluetooth Base UUID, into which 16/32-bit short UUIDs are expanded
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Parse a full UUID, or a 16/32-bit short form such as `2a37` or `0x2A37`.
pub fn parse_uuid(s: &str) -> Result<Uuid> {
    let s = s.trim();
    let short = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);

    if (short.len() == 4 || short.len() == 8) && short.chars().all(|c| c.is_ascii_hexdigit()) {
        let value = u32::from_str_radix(short, 16)
            .with_context(|| format!("Invalid short UUID: {}", s))?;
        return Ok(Uuid::from_u128(BASE_UUID | (u128::from(value) << 96)));
    }

    Uuid::parse_str(s).with_context(|| format!("Invalid UUID: {}", s))
}

/// Human-readable name for common assigned UUIDs
pub fn known_name(uuid: &Uuid) -> Option<&'static str> {
    if *uuid == CCCD_UUID {
        return Some("Client Characteristic Configuration");
    }
    match uuid.to_string().as_str() {
        NUS_SERVICE_UUID => Some("Nordic UART Service"),
        NUS_TX_CHAR_UUID => Some("Nordic UART TX"),
        "6e400002-b5a3-f393-e0a9-e50e24dcca9e" => Some("Nordic UART RX"),
        "0000180f-0000-1000-8000-00805f9b34fb" => Some("Battery Service"),
        "00002a19-0000-1000-8000-00805f9b34fb" => Some("Battery Level"),
        "0000180a-0000-1000-8000-00805f9b34fb" => Some("Device Information"),
        "00002901-0000-1000-8000-00805f9b34fb" => Some("Characteristic User Description"),
        _ => None,
    }
}
