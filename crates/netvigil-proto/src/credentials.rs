// ── Protocol credentials ──
//
// Resolved secret material for one device. These types never touch disk;
// `netvigil-config` builds them from profiles and hands them in.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Default RouterOS API port (plain TCP).
pub const ROUTEROS_API_PORT: u16 = 8728;

/// Default SNMP agent port.
pub const SNMP_PORT: u16 = 161;

/// Login material for the RouterOS API.
#[derive(Debug, Clone)]
pub struct RouterCredentials {
    pub username: String,
    pub password: SecretString,
    pub port: u16,
}

impl RouterCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            port: ROUTEROS_API_PORT,
        }
    }
}

/// SNMP protocol version.
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
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
    V3,
}

impl SnmpVersion {
    /// Wire value of the `version` field in the message header.
    pub(crate) fn wire(self) -> i64 {
        match self {
            Self::V1 => 0,
            Self::V2c => 1,
            Self::V3 => 3,
        }
    }
}

/// USM authentication protocol.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AuthProtocol {
    Md5,
    #[strum(serialize = "sha", serialize = "sha1")]
    #[serde(alias = "sha1")]
    Sha,
    Sha256,
}

/// USM privacy protocol.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PrivProtocol {
    Des,
    #[strum(serialize = "aes", serialize = "aes128")]
    #[serde(alias = "aes128")]
    Aes,
}

/// SNMPv3 user-based security model parameters.
#[derive(Debug, Clone)]
pub struct UsmCredentials {
    pub username: String,
    pub auth: Option<(AuthProtocol, SecretString)>,
    pub privacy: Option<(PrivProtocol, SecretString)>,
}

/// Everything needed to open an SNMP session to one agent.
#[derive(Debug, Clone)]
pub struct SnmpCredentials {
    pub version: SnmpVersion,
    pub port: u16,
    /// Community string for v1/v2c. Ignored for v3.
    pub community: SecretString,
    /// USM parameters. Required for v3.
    pub usm: Option<UsmCredentials>,
}

impl SnmpCredentials {
    /// v2c credentials with the given community.
    pub fn community(community: impl Into<String>) -> Self {
        Self {
            version: SnmpVersion::V2c,
            port: SNMP_PORT,
            community: SecretString::from(community.into()),
            usm: None,
        }
    }
}

impl Default for SnmpCredentials {
    fn default() -> Self {
        Self::community("public")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_protocol_names_case_insensitively() {
        assert_eq!("SHA".parse::<AuthProtocol>().unwrap(), AuthProtocol::Sha);
        assert_eq!("sha1".parse::<AuthProtocol>().unwrap(), AuthProtocol::Sha);
        assert_eq!("AES128".parse::<PrivProtocol>().unwrap(), PrivProtocol::Aes);
        assert_eq!("v2c".parse::<SnmpVersion>().unwrap(), SnmpVersion::V2c);
    }

    #[test]
    fn version_wire_values() {
        assert_eq!(SnmpVersion::V1.wire(), 0);
        assert_eq!(SnmpVersion::V2c.wire(), 1);
        assert_eq!(SnmpVersion::V3.wire(), 3);
    }
}
