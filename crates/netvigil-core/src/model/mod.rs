pub mod connection;
pub mod device;
pub mod entity_id;
pub mod event;

pub use connection::{Connection, LinkStats, MonitorSide, MonitoredEndpoint};
pub use device::{
    AdapterKind, CredentialsRef, Device, DeviceData, DeviceStatus, DeviceType, Port, PortStatus,
    RouterRole, any_port_came_up, find_port, previous_port,
};
pub use entity_id::{EntityId, MacAddress};
pub use event::{EventLogEntry, StatusChange};

use netvigil_proto::{RouterCredentials, SnmpCredentials};

/// Resolved secrets for one device. Never serialized.
#[derive(Debug, Clone, Default)]
pub struct DeviceCredentials {
    pub router: Option<RouterCredentials>,
    pub snmp: Option<SnmpCredentials>,
}

impl DeviceCredentials {
    pub fn router(creds: RouterCredentials) -> Self {
        Self {
            router: Some(creds),
            snmp: None,
        }
    }

    pub fn snmp(creds: SnmpCredentials) -> Self {
        Self {
            router: None,
            snmp: Some(creds),
        }
    }

    pub fn with_snmp(mut self, creds: SnmpCredentials) -> Self {
        self.snmp = Some(creds);
        self
    }
}
