//! BLE Scanner Module
//!
//! Time-bounded advertisement discovery and device selection.

use crate::domain::error::BleError;
use crate::domain::models::{DeviceSelection, PeripheralHandle};
use crate::infrastructure::bluetooth::stack::BleStack;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Extra time granted to the stack beyond the requested scan duration
const SCAN_GRACE: Duration = Duration::from_secs(2);

/// BLE Scanner for discovering advertising peripherals
pub struct BleScanner {
    stack: Arc<dyn BleStack>,
}

impl BleScanner {
    pub fn new(stack: Arc<dyn BleStack>) -> Self {
        Self { stack }
    }

    /// Scan for `duration`.
    ///
    /// Returns an empty list if nothing advertised. Results are de-duplicated
    /// by address, keeping first-seen position and the latest name/RSSI.
    pub async fn scan(&self, duration: Duration) -> Result<Vec<PeripheralHandle>, BleError> {
        info!("Scanning for {:?}...", duration);

        let seen = tokio::time::timeout(duration + SCAN_GRACE, self.stack.scan(duration))
            .await
            .map_err(|_| {
                BleError::Scan(format!("scan did not complete within {:?}", duration + SCAN_GRACE))
            })?
            .map_err(|e| BleError::Scan(e.to_string()))?;

        let devices = dedup_by_address(seen);
        info!("Scan finished: {} device(s) found", devices.len());
        Ok(devices)
    }
}

fn dedup_by_address(seen: Vec<PeripheralHandle>) -> Vec<PeripheralHandle> {
    let mut devices: Vec<PeripheralHandle> = Vec::with_capacity(seen.len());
    for handle in seen {
        match devices
            .iter_mut()
            .find(|d| d.address.eq_ignore_ascii_case(&handle.address))
        {
            Some(existing) => {
                debug!("Duplicate advertisement from {}", handle.address);
                if handle.name.is_some() {
                    existing.name = handle.name;
                }
                if handle.signal_strength.is_some() {
                    existing.signal_strength = handle.signal_strength;
                }
            }
            None => devices.push(handle),
        }
    }
    devices
}

/// First device advertising exactly `name`, if any
pub fn find_by_name<'a>(handles: &'a [PeripheralHandle], name: &str) -> Option<&'a PeripheralHandle> {
    handles.iter().find(|h| h.name.as_deref() == Some(name))
}

impl DeviceSelection {
    /// Turn the operator's choice into a device address.
    pub fn resolve(&self, handles: &[PeripheralHandle]) -> Result<String, BleError> {
        match self {
            Self::Index(idx) => handles.get(*idx).map(|h| h.address.clone()).ok_or_else(|| {
                BleError::InvalidSelection(format!(
                    "index {} out of range (0..{})",
                    idx,
                    handles.len()
                ))
            }),
            Self::Address(address) => Ok(address.clone()),
        }
    }
}
