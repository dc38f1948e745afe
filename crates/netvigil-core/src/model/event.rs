// ── Status-change events ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::DeviceStatus;
use super::entity_id::EntityId;

/// Emitted whenever a device's derived status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub device_id: EntityId,
    pub device_name: String,
    pub old: DeviceStatus,
    pub new: DeviceStatus,
    pub at: DateTime<Utc>,
    /// Whether notification channels should be told about it.
    pub notify: bool,
}

/// One line of the device event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub device_id: EntityId,
    pub at: DateTime<Utc>,
    pub message: String,
}

impl From<&StatusChange> for EventLogEntry {
    fn from(change: &StatusChange) -> Self {
        Self {
            device_id: change.device_id.clone(),
            at: change.at,
            message: format!(
                "{} changed from {} to {}",
                change.device_name, change.old, change.new
            ),
        }
    }
}
