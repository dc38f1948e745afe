// ── In-memory DeviceStore ──
//
// Backs the CLI and the test suite. Devices and connections live in
// entity collections; credentials are kept out of the records and
// never serialized.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;

use super::collection::EntityCollection;
use super::{ConnectionTrafficUpdate, DeviceProbeUpdate, DeviceStore};
use crate::config::EngineSettings;
use crate::error::CoreError;
use crate::model::{
    Connection, CredentialsRef, Device, DeviceCredentials, EntityId, EventLogEntry, MonitorSide,
};

const DEFAULT_EVENT_CAPACITY: usize = 1000;

pub struct MemoryStore {
    devices: EntityCollection<Device>,
    connections: EntityCollection<Connection>,
    profiles: DashMap<String, DeviceCredentials>,
    inline: DashMap<EntityId, DeviceCredentials>,
    settings: ArcSwap<EngineSettings>,
    events: Mutex<VecDeque<EventLogEntry>>,
    event_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl MemoryStore {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            devices: EntityCollection::new(),
            connections: EntityCollection::new(),
            profiles: DashMap::new(),
            inline: DashMap::new(),
            settings: ArcSwap::from_pointee(settings),
            events: Mutex::new(VecDeque::new()),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    // ── Devices ──────────────────────────────────────────────────────

    pub fn upsert_device(&self, device: Device) -> bool {
        self.devices.upsert(device.id.clone(), device)
    }

    pub fn remove_device(&self, id: &EntityId) -> Option<Arc<Device>> {
        self.inline.remove(id);
        self.devices.remove(id)
    }

    pub fn device(&self, id: &EntityId) -> Option<Arc<Device>> {
        self.devices.get(id)
    }

    pub fn devices(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    // ── Connections ──────────────────────────────────────────────────

    pub fn upsert_connection(&self, connection: Connection) -> bool {
        self.connections.upsert(connection.id.clone(), connection)
    }

    pub fn remove_connection(&self, id: &EntityId) -> Option<Arc<Connection>> {
        self.connections.remove(id)
    }

    pub fn connection(&self, id: &EntityId) -> Option<Arc<Connection>> {
        self.connections.get(id)
    }

    pub fn connections(&self) -> Arc<Vec<Arc<Connection>>> {
        self.connections.snapshot()
    }

    /// Edit a connection in place through its setters.
    pub fn edit_connection(
        &self,
        id: &EntityId,
        f: impl FnOnce(&mut Connection),
    ) -> Result<(), CoreError> {
        self.connections
            .update(id, f)
            .ok_or_else(|| CoreError::ConnectionNotFound {
                identifier: id.to_string(),
            })
    }

    /// Replace the inventory, dropping records that are no longer listed.
    ///
    /// Engine-owned state (status, counters) of devices that survive the
    /// reload is carried over.
    pub fn load_inventory(&self, devices: Vec<Device>, connections: Vec<Connection>) {
        let devices = devices
            .into_iter()
            .map(|mut d| {
                if let Some(prev) = self.devices.get(&d.id) {
                    d.status = prev.status;
                    d.status_changed_at = prev.status_changed_at;
                    d.last_seen = prev.last_seen;
                    d.failure_count = prev.failure_count;
                    d.device_data.clone_from(&prev.device_data);
                }
                (d.id.clone(), d)
            })
            .collect();
        self.devices.replace_all(devices);
        self.connections
            .replace_all(connections.into_iter().map(|c| (c.id.clone(), c)).collect());
    }

    // ── Credentials ──────────────────────────────────────────────────

    pub fn add_profile(&self, name: impl Into<String>, credentials: DeviceCredentials) {
        self.profiles.insert(name.into(), credentials);
    }

    pub fn set_inline_credentials(&self, id: EntityId, credentials: DeviceCredentials) {
        self.inline.insert(id, credentials);
    }

    // ── Settings / events ────────────────────────────────────────────

    pub fn set_settings(&self, settings: EngineSettings) {
        self.settings.store(Arc::new(settings));
    }

    /// Logged events, oldest first.
    pub fn events(&self) -> Vec<EventLogEntry> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn list_devices(&self) -> Result<Vec<Device>, CoreError> {
        Ok(self.devices.snapshot().iter().map(|d| Device::clone(d)).collect())
    }

    async fn get_device(&self, id: &EntityId) -> Result<Device, CoreError> {
        self.devices
            .get(id)
            .map(|d| Device::clone(&d))
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: id.to_string(),
            })
    }

    async fn list_monitored_connections(&self) -> Result<Vec<Connection>, CoreError> {
        Ok(self
            .connections
            .snapshot()
            .iter()
            .filter(|c| c.monitor_interface() != MonitorSide::None)
            .map(|c| Connection::clone(c))
            .collect())
    }

    async fn get_connection(&self, id: &EntityId) -> Result<Connection, CoreError> {
        self.connections
            .get(id)
            .map(|c| Connection::clone(&c))
            .ok_or_else(|| CoreError::ConnectionNotFound {
                identifier: id.to_string(),
            })
    }

    async fn resolve_credentials(&self, device: &Device) -> Result<DeviceCredentials, CoreError> {
        match &device.credentials {
            CredentialsRef::Profile(name) => self
                .profiles
                .get(name)
                .map(|c| c.value().clone())
                .ok_or_else(|| CoreError::ProfileNotFound { name: name.clone() }),
            CredentialsRef::Inline => Ok(self
                .inline
                .get(&device.id)
                .map(|c| c.value().clone())
                .unwrap_or_default()),
            CredentialsRef::None => Ok(DeviceCredentials::default()),
        }
    }

    async fn update_device_probe(&self, update: DeviceProbeUpdate) -> Result<(), CoreError> {
        let id = update.device_id.clone();
        self.devices
            .update(&id, move |d| {
                d.status = update.status;
                if let Some(at) = update.status_changed_at {
                    d.status_changed_at = Some(at);
                }
                if let Some(at) = update.last_seen {
                    d.last_seen = Some(at);
                }
                d.failure_count = update.failure_count;
                if let Some(data) = update.device_data {
                    d.device_data = Some(data);
                }
            })
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: id.to_string(),
            })
    }

    async fn update_connection_traffic(
        &self,
        update: ConnectionTrafficUpdate,
    ) -> Result<(), CoreError> {
        let id = update.connection_id.clone();
        self.connections
            .update(&id, move |c| {
                c.link_stats = update.link_stats;
                if let Some(resolved) = update.resolved_index {
                    let still_same = c.monitor_interface() == resolved.side
                        && c.monitored_endpoint().is_some_and(|ep| ep.port == resolved.port);
                    if still_same {
                        c.cache_snmp_index(resolved.index);
                    }
                }
            })
            .ok_or_else(|| CoreError::ConnectionNotFound {
                identifier: id.to_string(),
            })
    }

    async fn settings(&self) -> Result<EngineSettings, CoreError> {
        Ok(EngineSettings::clone(&self.settings.load()))
    }

    async fn append_event(&self, entry: EventLogEntry) -> Result<(), CoreError> {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() >= self.event_capacity {
            events.pop_front();
        }
        events.push_back(entry);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DeviceStatus, DeviceType, LinkStats};
    use crate::store::ResolvedIndex;
    use netvigil_proto::SnmpCredentials;

    fn device(id: &str) -> Device {
        Device::new(id, id, "10.0.0.1", DeviceType::Snmp)
    }

    #[tokio::test]
    async fn update_on_deleted_device_is_not_found() {
        let store = MemoryStore::default();
        store.upsert_device(device("a"));
        store.remove_device(&EntityId::from("a"));
        let err = store
            .update_device_probe(DeviceProbeUpdate {
                device_id: EntityId::from("a"),
                status: DeviceStatus::Online,
                status_changed_at: None,
                last_seen: None,
                failure_count: 0,
                device_data: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn profile_credentials_resolve() {
        let store = MemoryStore::default();
        store.add_profile("lab", DeviceCredentials::snmp(SnmpCredentials::community("lab")));
        let mut d = device("a");
        d.credentials = CredentialsRef::Profile("lab".into());
        assert!(store.resolve_credentials(&d).await.unwrap().snmp.is_some());

        d.credentials = CredentialsRef::Profile("missing".into());
        assert!(store.resolve_credentials(&d).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn resolved_index_is_dropped_after_endpoint_edit() {
        let store = MemoryStore::default();
        let id = EntityId::from("l1");
        store.upsert_connection(
            Connection::new("l1", ("a", Some("ether1".into())), ("b", Some("ether2".into())))
                .with_monitor(MonitorSide::Source),
        );
        store
            .edit_connection(&id, |c| c.set_source_port(Some("ether3".into())))
            .unwrap();
        store
            .update_connection_traffic(ConnectionTrafficUpdate {
                connection_id: id.clone(),
                link_stats: LinkStats::default(),
                resolved_index: Some(ResolvedIndex {
                    side: MonitorSide::Source,
                    port: "ether1".into(),
                    index: 4,
                }),
            })
            .await
            .unwrap();
        assert_eq!(store.connection(&id).unwrap().monitor_snmp_index(), None);
    }

    #[tokio::test]
    async fn event_log_is_bounded() {
        let mut store = MemoryStore::default();
        store.event_capacity = 2;
        for i in 0..3 {
            store
                .append_event(EventLogEntry {
                    device_id: EntityId::from("a"),
                    at: chrono::Utc::now(),
                    message: format!("event {i}"),
                })
                .await
                .unwrap();
        }
        let events = store.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "event 1");
    }

    #[tokio::test]
    async fn reload_keeps_engine_state() {
        let store = MemoryStore::default();
        let mut d = device("a");
        d.status = DeviceStatus::Online;
        d.failure_count = 2;
        store.upsert_device(d);
        store.upsert_device(device("b"));

        let mut fresh = device("a");
        fresh.name = "renamed".into();
        store.load_inventory(vec![fresh], Vec::new());

        let a = store.device(&EntityId::from("a")).unwrap();
        assert_eq!(a.name, "renamed");
        assert_eq!(a.status, DeviceStatus::Online);
        assert_eq!(a.failure_count, 2);
        assert_eq!(store.device_count(), 1);
    }
}
