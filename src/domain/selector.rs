//! Characteristic Selection
//!
//! Picks which characteristic a session subscribes to.

use crate::domain::error::BleError;
use crate::domain::models::ServiceTree;
use uuid::Uuid;

/// Select the characteristic to subscribe to.
///
/// A preferred UUID wins without checking it against the tree; an unknown
/// UUID fails later at subscribe time. Otherwise the first notify/indicate
/// characteristic in service-then-characteristic order is chosen.
pub fn select(tree: &ServiceTree, preferred: Option<Uuid>) -> Result<Uuid, BleError> {
    if let Some(uuid) = preferred {
        return Ok(uuid);
    }

    tree.characteristics()
        .find(|c| c.can_push())
        .map(|c| c.uuid)
        .ok_or(BleError::NoNotifiableCharacteristic)
}
