// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::entity_id::{EntityId, MacAddress};

/// Derived device status.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceStatus {
    Online,
    /// Reachable but partially degraded (adapter decides).
    Warning,
    /// Answers ping, but not the management protocol.
    Stale,
    Offline,
    #[default]
    Unknown,
}

impl DeviceStatus {
    /// Whether the device was answering its management protocol.
    pub fn is_up(self) -> bool {
        matches!(self, Self::Online | Self::Warning)
    }
}

/// Which adapter speaks to a device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AdapterKind {
    RouterApi,
    Snmp,
    PingOnly,
}

/// What a RouterOS device is doing on the map.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RouterRole {
    #[default]
    Router,
    Switch,
    AccessPoint,
}

/// Device type. Closed set; each variant maps to one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceType {
    RouterApi { role: RouterRole },
    Snmp,
    PingOnly,
}

impl DeviceType {
    pub fn adapter(self) -> AdapterKind {
        match self {
            Self::RouterApi { .. } => AdapterKind::RouterApi,
            Self::Snmp => AdapterKind::Snmp,
            Self::PingOnly => AdapterKind::PingOnly,
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RouterApi { role } => write!(f, "routeros/{role}"),
            Self::Snmp => f.write_str("snmp"),
            Self::PingOnly => f.write_str("ping"),
        }
    }
}

/// Where a device's secrets come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialsRef {
    /// A named credential profile.
    Profile(String),
    /// Stored with the device record.
    Inline,
    #[default]
    None,
}

// ── Ports ───────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PortStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

/// One interface on a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    /// Factory name, stable across renames (`ether1`).
    pub default_name: Option<String>,
    pub status: PortStatus,
    /// Negotiated speed, e.g. `"1Gbps"`. Best effort, carried between cycles.
    pub speed: Option<String>,
    /// Resolved `ifIndex`. Never cleared implicitly once learned.
    pub snmp_index: Option<u32>,
    pub mac: Option<MacAddress>,
}

impl Port {
    pub fn new(name: impl Into<String>, status: PortStatus) -> Self {
        Self {
            name: name.into(),
            status,
            ..Self::default()
        }
    }

    /// Same physical port: matched by `name`, or by `default_name`.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.default_name.as_deref() == Some(name)
    }
}

/// Find a port by `name` first, then by `default_name`.
pub fn find_port<'a>(ports: &'a [Port], name: &str) -> Option<&'a Port> {
    ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.default_name.as_deref() == Some(name)))
}

/// The previous record for `port`: by `default_name` first, then `name`.
pub fn previous_port<'a>(previous: &'a [Port], port: &Port) -> Option<&'a Port> {
    port.default_name
        .as_deref()
        .and_then(|d| previous.iter().find(|p| p.default_name.as_deref() == Some(d)))
        .or_else(|| previous.iter().find(|p| p.name == port.name))
}

/// Whether any port was down in `previous` and is up in `current`.
pub fn any_port_came_up(previous: &[Port], current: &[Port]) -> bool {
    current.iter().any(|port| {
        port.status == PortStatus::Up
            && previous_port(previous, port).is_some_and(|p| p.status == PortStatus::Down)
    })
}

// ── Probe snapshot ──────────────────────────────────────────────────

/// Snapshot from the last successful probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceData {
    pub identity: Option<String>,
    pub model: Option<String>,
    pub version: Option<String>,
    pub uptime_secs: Option<u64>,
    pub cpu_pct: Option<f64>,
    pub memory_pct: Option<f64>,
    pub disk_pct: Option<f64>,
    pub ping_rtt_ms: Option<f64>,
    pub ports: Vec<Port>,
}

impl DeviceData {
    pub fn port(&self, name: &str) -> Option<&Port> {
        find_port(&self.ports, name)
    }
}

// ── Device ──────────────────────────────────────────────────────────

/// A monitored target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: EntityId,
    pub name: String,
    pub ip_address: String,
    pub device_type: DeviceType,
    #[serde(default)]
    pub credentials: CredentialsRef,

    // Engine-owned state
    #[serde(default)]
    pub status: DeviceStatus,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_count: u32,
    pub device_data: Option<DeviceData>,

    // Per-device overrides
    /// Seconds.
    pub probe_timeout: Option<u64>,
    pub offline_threshold: Option<u32>,
}

impl Device {
    pub fn new(
        id: impl Into<EntityId>,
        name: impl Into<String>,
        ip_address: impl Into<String>,
        device_type: DeviceType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ip_address: ip_address.into(),
            device_type,
            credentials: CredentialsRef::None,
            status: DeviceStatus::Unknown,
            status_changed_at: None,
            last_seen: None,
            failure_count: 0,
            device_data: None,
            probe_timeout: None,
            offline_threshold: None,
        }
    }

    pub fn ports(&self) -> &[Port] {
        self.device_data.as_ref().map_or(&[], |d| d.ports.as_slice())
    }

    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.probe_timeout
            .filter(|s| *s > 0)
            .map_or(default, Duration::from_secs)
    }

    pub fn effective_threshold(&self, default: u32) -> u32 {
        self.offline_threshold.filter(|t| *t > 0).unwrap_or(default)
    }
}
