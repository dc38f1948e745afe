// ── Connection (link between two device ports) ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_id::EntityId;

/// Which end of a connection carries the traffic counters.
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
pub enum MonitorSide {
    #[default]
    None,
    Source,
    Target,
}

/// Latest bandwidth figures for one monitored link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    pub in_bytes_per_sec: f64,
    pub out_bytes_per_sec: f64,
    pub in_bits_per_sec: f64,
    pub out_bits_per_sec: f64,
    pub utilization_pct: u8,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub previous_in_octets: Option<u64>,
    pub previous_out_octets: Option<u64>,
    pub previous_sample_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
}

/// A link drawn between two device ports.
///
/// Endpoint fields are private so that every change goes through a setter
/// that drops the cached `monitor_snmp_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: EntityId,
    pub source_device_id: EntityId,
    source_port: Option<String>,
    pub target_device_id: EntityId,
    target_port: Option<String>,
    #[serde(default)]
    monitor_interface: MonitorSide,
    monitor_snmp_index: Option<u32>,
    /// Nominal capacity, e.g. `"1G"`, `"10G"`, `"100M"`.
    pub link_speed: Option<String>,
    #[serde(default)]
    pub link_stats: LinkStats,
}

/// The device and port whose counters a connection reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredEndpoint<'a> {
    pub device_id: &'a EntityId,
    pub port: &'a str,
}

impl Connection {
    pub fn new(
        id: impl Into<EntityId>,
        source: (impl Into<EntityId>, Option<String>),
        target: (impl Into<EntityId>, Option<String>),
    ) -> Self {
        Self {
            id: id.into(),
            source_device_id: source.0.into(),
            source_port: source.1,
            target_device_id: target.0.into(),
            target_port: target.1,
            monitor_interface: MonitorSide::None,
            monitor_snmp_index: None,
            link_speed: None,
            link_stats: LinkStats::default(),
        }
    }

    pub fn with_monitor(mut self, side: MonitorSide) -> Self {
        self.set_monitor_interface(side);
        self
    }

    pub fn source_port(&self) -> Option<&str> {
        self.source_port.as_deref()
    }

    pub fn target_port(&self) -> Option<&str> {
        self.target_port.as_deref()
    }

    pub fn monitor_interface(&self) -> MonitorSide {
        self.monitor_interface
    }

    pub fn monitor_snmp_index(&self) -> Option<u32> {
        self.monitor_snmp_index
    }

    // ── Mutators ─────────────────────────────────────────────────────

    pub fn set_monitor_interface(&mut self, side: MonitorSide) {
        if self.monitor_interface != side {
            self.monitor_interface = side;
            self.monitor_snmp_index = None;
        }
    }

    pub fn set_source_port(&mut self, port: Option<String>) {
        if self.source_port != port {
            self.source_port = port;
            self.monitor_snmp_index = None;
        }
    }

    pub fn set_target_port(&mut self, port: Option<String>) {
        if self.target_port != port {
            self.target_port = port;
            self.monitor_snmp_index = None;
        }
    }

    /// Record the index the traffic engine resolved for the monitored port.
    pub fn cache_snmp_index(&mut self, index: u32) {
        self.monitor_snmp_index = Some(index);
    }

    /// The endpoint to read counters from, if monitoring is configured.
    pub fn monitored_endpoint(&self) -> Option<MonitoredEndpoint<'_>> {
        let (device_id, port) = match self.monitor_interface {
            MonitorSide::None => return None,
            MonitorSide::Source => (&self.source_device_id, self.source_port.as_deref()?),
            MonitorSide::Target => (&self.target_device_id, self.target_port.as_deref()?),
        };
        Some(MonitoredEndpoint { device_id, port })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn link() -> Connection {
        let mut c = Connection::new(
            "l1",
            ("core", Some("sfp1".into())),
            ("edge", Some("ether1".into())),
        )
        .with_monitor(MonitorSide::Source);
        c.cache_snmp_index(7);
        c
    }

    #[test]
    fn monitored_endpoint_follows_side() {
        let mut c = link();
        let ep = c.monitored_endpoint().unwrap();
        assert_eq!(ep.device_id, &EntityId::from("core"));
        assert_eq!(ep.port, "sfp1");

        c.set_monitor_interface(MonitorSide::Target);
        assert_eq!(c.monitored_endpoint().unwrap().port, "ether1");

        c.set_monitor_interface(MonitorSide::None);
        assert!(c.monitored_endpoint().is_none());
    }

    #[test]
    fn changing_monitored_side_clears_cached_index() {
        let mut c = link();
        c.set_monitor_interface(MonitorSide::Target);
        assert_eq!(c.monitor_snmp_index(), None);
    }

    #[test]
    fn changing_either_port_clears_cached_index() {
        let mut c = link();
        c.set_target_port(Some("ether2".into()));
        assert_eq!(c.monitor_snmp_index(), None);

        let mut c = link();
        c.set_source_port(Some("sfp2".into()));
        assert_eq!(c.monitor_snmp_index(), None);
    }

    #[test]
    fn unchanged_values_keep_cached_index() {
        let mut c = link();
        c.set_source_port(Some("sfp1".into()));
        c.set_monitor_interface(MonitorSide::Source);
        assert_eq!(c.monitor_snmp_index(), Some(7));
    }

    #[test]
    fn missing_port_means_nothing_to_monitor() {
        let c = Connection::new("l2", ("a", None), ("b", None)).with_monitor(MonitorSide::Source);
        assert!(c.monitored_endpoint().is_none());
    }
}
