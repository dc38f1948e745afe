// ── [[devices]] / [[connections]] ──

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use netvigil_core::{
    Connection, CredentialsRef, Device, DeviceCredentials, DeviceType, EntityId, MemoryStore,
    MonitorSide, RouterRole,
};

use crate::profiles::{ProfileEntry, SecretResolver};
use crate::{Config, ConfigError};

/// How a device is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[serde(alias = "router_api", alias = "mikrotik")]
    Routeros,
    Snmp,
    #[serde(alias = "ping_only")]
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub id: String,

    /// Display name; defaults to the id.
    pub name: Option<String>,

    pub address: String,

    #[serde(rename = "type")]
    pub kind: DeviceKind,

    /// RouterOS only.
    pub role: Option<RouterRole>,

    /// Name of a `[profiles.<name>]` table.
    pub profile: Option<String>,

    /// Inline credentials, used instead of a profile.
    pub credentials: Option<ProfileEntry>,

    /// Seconds; overrides `engine.probe_timeout`.
    pub probe_timeout: Option<u64>,

    pub offline_threshold: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionEntry {
    pub id: String,
    pub source: String,
    pub source_port: Option<String>,
    pub target: String,
    pub target_port: Option<String>,

    /// Which end's counters feed the traffic engine.
    #[serde(default)]
    pub monitor: MonitorSide,

    /// Nominal speed, e.g. `1Gbps`. Enables utilization.
    pub link_speed: Option<String>,
}

/// A validated inventory with every secret resolved.
#[derive(Debug, Default)]
pub struct Inventory {
    pub devices: Vec<Device>,
    pub connections: Vec<Connection>,
    pub profiles: HashMap<String, DeviceCredentials>,
    pub inline: Vec<(EntityId, DeviceCredentials)>,
}

impl Inventory {
    pub fn build(config: &Config, resolver: &SecretResolver) -> Result<Self, ConfigError> {
        let mut inventory = Self::default();

        for (name, profile) in &config.profiles {
            let creds = profile.to_credentials(name, resolver)?;
            inventory.profiles.insert(name.clone(), creds);
        }

        let mut ids = HashSet::new();
        for entry in &config.devices {
            if !ids.insert(entry.id.as_str()) {
                return Err(ConfigError::invalid(
                    format!("devices.{}", entry.id),
                    "duplicate device id",
                ));
            }
            let device = inventory.device(entry, resolver)?;
            inventory.devices.push(device);
        }

        let mut connection_ids = HashSet::new();
        for entry in &config.connections {
            if !connection_ids.insert(entry.id.as_str()) {
                return Err(ConfigError::invalid(
                    format!("connections.{}", entry.id),
                    "duplicate connection id",
                ));
            }
            inventory.connections.push(entry.to_connection(&ids)?);
        }

        Ok(inventory)
    }

    fn device(
        &mut self,
        entry: &DeviceEntry,
        resolver: &SecretResolver,
    ) -> Result<Device, ConfigError> {
        let field = format!("devices.{}", entry.id);
        if entry.id.trim().is_empty() {
            return Err(ConfigError::invalid("devices.id", "must not be empty"));
        }
        netvigil_proto::validate_address(&entry.address)
            .map_err(|e| ConfigError::invalid(format!("{field}.address"), e.to_string()))?;

        let device_type = match entry.kind {
            DeviceKind::Routeros => DeviceType::RouterApi {
                role: entry.role.unwrap_or_default(),
            },
            DeviceKind::Snmp => DeviceType::Snmp,
            DeviceKind::Ping => DeviceType::PingOnly,
        };

        let (credentials, resolved) = match (&entry.profile, &entry.credentials) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::invalid(
                    field,
                    "set either profile or credentials, not both",
                ));
            }
            (Some(name), None) => {
                let creds = self.profiles.get(name).ok_or_else(|| {
                    ConfigError::invalid(format!("{field}.profile"), format!("unknown profile '{name}'"))
                })?;
                (CredentialsRef::Profile(name.clone()), Some(creds.clone()))
            }
            (None, Some(inline)) => {
                let creds = inline.to_credentials(&entry.id, resolver)?;
                self.inline.push((EntityId::from(entry.id.as_str()), creds.clone()));
                (CredentialsRef::Inline, Some(creds))
            }
            (None, None) => (CredentialsRef::None, None),
        };

        match (entry.kind, &resolved) {
            (DeviceKind::Routeros, creds) if creds.as_ref().is_none_or(|c| c.router.is_none()) => {
                return Err(ConfigError::invalid(field, "RouterOS devices need a username"));
            }
            (DeviceKind::Snmp, creds) if creds.as_ref().is_none_or(|c| c.snmp.is_none()) => {
                return Err(ConfigError::invalid(field, "SNMP devices need SNMP credentials"));
            }
            _ => {}
        }

        let mut device = Device::new(
            entry.id.as_str(),
            entry.name.clone().unwrap_or_else(|| entry.id.clone()),
            entry.address.trim(),
            device_type,
        );
        device.credentials = credentials;
        device.probe_timeout = entry.probe_timeout;
        device.offline_threshold = entry.offline_threshold;
        Ok(device)
    }

    /// Load everything into `store`, keeping live status of devices that
    /// were already there.
    pub fn seed(self, store: &MemoryStore) {
        for (name, creds) in self.profiles {
            store.add_profile(name, creds);
        }
        for (id, creds) in self.inline {
            store.set_inline_credentials(id, creds);
        }
        store.load_inventory(self.devices, self.connections);
    }
}

impl ConnectionEntry {
    fn to_connection(&self, devices: &HashSet<&str>) -> Result<Connection, ConfigError> {
        let field = format!("connections.{}", self.id);
        for (side, id) in [("source", &self.source), ("target", &self.target)] {
            if !devices.contains(id.as_str()) {
                return Err(ConfigError::invalid(
                    format!("{field}.{side}"),
                    format!("unknown device '{id}'"),
                ));
            }
        }
        let monitored_port = match self.monitor {
            MonitorSide::Source => Some(&self.source_port),
            MonitorSide::Target => Some(&self.target_port),
            MonitorSide::None => None,
        };
        if monitored_port.is_some_and(Option::is_none) {
            return Err(ConfigError::invalid(
                format!("{field}.monitor"),
                format!("the {} side has no port", self.monitor),
            ));
        }

        let mut connection = Connection::new(
            self.id.as_str(),
            (self.source.as_str(), self.source_port.clone()),
            (self.target.as_str(), self.target_port.clone()),
        )
        .with_monitor(self.monitor);
        connection.link_speed.clone_from(&self.link_speed);
        Ok(connection)
    }
}
