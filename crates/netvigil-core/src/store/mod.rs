// ── Storage collaborator ──
//
// The engine never owns device records. It reads them through
// `DeviceStore` at the start of every cycle and writes probe results
// back as narrow patch updates, so records edited or deleted by an
// operator mid-cycle are never clobbered wholesale.

mod collection;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::EngineSettings;
use crate::error::CoreError;
use crate::model::{
    Connection, Device, DeviceCredentials, DeviceData, DeviceStatus, EntityId, EventLogEntry,
    LinkStats, MonitorSide,
};

pub use memory::MemoryStore;

/// Probe result for one device, applied as a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProbeUpdate {
    pub device_id: EntityId,
    pub status: DeviceStatus,
    /// Set only when `status` differs from the stored one.
    pub status_changed_at: Option<DateTime<Utc>>,
    /// Set only on a successful probe.
    pub last_seen: Option<DateTime<Utc>>,
    pub failure_count: u32,
    /// `None` keeps the previous snapshot.
    pub device_data: Option<DeviceData>,
}

/// An ifIndex the traffic engine resolved, tagged with the endpoint it
/// was resolved for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIndex {
    pub side: MonitorSide,
    pub port: String,
    pub index: u32,
}

/// Traffic result for one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionTrafficUpdate {
    pub connection_id: EntityId,
    pub link_stats: LinkStats,
    /// Applied only if the connection still monitors the same endpoint.
    pub resolved_index: Option<ResolvedIndex>,
}

/// Everything the probing engine needs from persistent storage.
///
/// Implementations return `CoreError::DeviceNotFound` /
/// `CoreError::ConnectionNotFound` for records deleted since they were
/// listed; the engine drops those results silently.
#[async_trait]
pub trait DeviceStore: Send + Sync + 'static {
    async fn list_devices(&self) -> Result<Vec<Device>, CoreError>;

    async fn get_device(&self, id: &EntityId) -> Result<Device, CoreError>;

    /// Connections whose `monitor_interface` is not `None`.
    async fn list_monitored_connections(&self) -> Result<Vec<Connection>, CoreError>;

    async fn get_connection(&self, id: &EntityId) -> Result<Connection, CoreError>;

    async fn resolve_credentials(&self, device: &Device) -> Result<DeviceCredentials, CoreError>;

    async fn update_device_probe(&self, update: DeviceProbeUpdate) -> Result<(), CoreError>;

    async fn update_connection_traffic(
        &self,
        update: ConnectionTrafficUpdate,
    ) -> Result<(), CoreError>;

    async fn settings(&self) -> Result<EngineSettings, CoreError>;

    async fn append_event(&self, entry: EventLogEntry) -> Result<(), CoreError>;
}
