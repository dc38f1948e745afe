// ── Identity types ──
//
// Devices and connections are keyed by an opaque id. Inventory files use
// short human keys ("core-rtr"); ids that parse as UUIDs are kept as
// UUIDs. Both live behind one type so the store and engine never care which.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ── EntityId ────────────────────────────────────────────────────────

/// Opaque identity of a device or connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Uuid(Uuid),
    Key(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Key(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_owned()))
    }
}

impl From<Uuid> for EntityId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        match Uuid::parse_str(&s) {
            Ok(u) => Self::Uuid(u),
            Err(_) => Self::Key(s),
        }
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Normalize colon-separated, dash-separated or upper-case input.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().to_lowercase().replace('-', ":"))
    }

    /// From a raw six-byte `ifPhysAddress`. Other lengths are not MACs.
    pub fn from_octets(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 6 || bytes.iter().all(|b| *b == 0) {
            return None;
        }
        let parts: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Some(Self(parts.join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_from_uuid_string() {
        let id = EntityId::from("550e8400-e29b-41d4-a716-446655440000".to_owned());
        assert!(matches!(id, EntityId::Uuid(_)));
    }

    #[test]
    fn entity_id_from_inventory_key() {
        let id = EntityId::from("core-rtr");
        assert_eq!(id, EntityId::Key("core-rtr".into()));
        assert_eq!(id.to_string(), "core-rtr");
    }

    #[test]
    fn entity_id_serializes_untagged() {
        let id = EntityId::from("edge-sw");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"edge-sw\"");
    }

    #[test]
    fn mac_address_normalizes_dashes_and_case() {
        let mac: MacAddress = "AA-BB-CC-DD-EE-FF".parse().unwrap();
        assert_eq!(mac.as_str(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn mac_from_octets() {
        let mac = MacAddress::from_octets(&[0x4C, 0x5E, 0x0C, 0x01, 0x02, 0x03]).unwrap();
        assert_eq!(mac.to_string(), "4c:5e:0c:01:02:03");
        assert!(MacAddress::from_octets(&[0; 6]).is_none());
        assert!(MacAddress::from_octets(&[1, 2, 3]).is_none());
    }
}
