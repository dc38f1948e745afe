// ── Credential profiles ──
//
// `[profiles.<name>]` tables and inline `credentials` on a device share this
// shape. Secrets resolve env var → keyring → plaintext.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use netvigil_core::DeviceCredentials;
use netvigil_proto::{
    AuthProtocol, PrivProtocol, ROUTEROS_API_PORT, RouterCredentials, SNMP_PORT, SnmpCredentials,
    SnmpVersion, UsmCredentials,
};

use crate::{ConfigError, KEYRING_SERVICE};

/// One set of login material. Any subset of RouterOS and SNMP fields may be
/// present; the device type decides which half is used.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProfileEntry {
    /// RouterOS API user.
    pub username: Option<String>,

    /// RouterOS API password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable holding the RouterOS password.
    pub password_env: Option<String>,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    pub snmp_version: Option<SnmpVersion>,

    /// v1/v2c community (plaintext).
    pub community: Option<String>,

    pub community_env: Option<String>,

    #[serde(default = "default_snmp_port")]
    pub snmp_port: u16,

    /// SNMPv3 user.
    pub usm: Option<UsmEntry>,
}

/// `usm` sub-table of a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UsmEntry {
    pub username: String,
    pub auth_protocol: Option<AuthProtocol>,
    pub auth_password: Option<String>,
    pub auth_password_env: Option<String>,
    pub priv_protocol: Option<PrivProtocol>,
    pub priv_password: Option<String>,
    pub priv_password_env: Option<String>,
}

impl Default for ProfileEntry {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            password_env: None,
            api_port: ROUTEROS_API_PORT,
            snmp_version: None,
            community: None,
            community_env: None,
            snmp_port: SNMP_PORT,
            usm: None,
        }
    }
}

fn default_api_port() -> u16 {
    ROUTEROS_API_PORT
}

fn default_snmp_port() -> u16 {
    SNMP_PORT
}

// ── Secret resolution ───────────────────────────────────────────────

/// Looks a secret up in the environment, then the system keyring, then
/// falls back to the plaintext value from the file.
#[derive(Debug, Clone, Copy)]
pub struct SecretResolver {
    use_keyring: bool,
}

impl SecretResolver {
    pub fn new(use_keyring: bool) -> Self {
        Self { use_keyring }
    }

    /// `key` is the keyring account, e.g. `core-rtr/password`.
    pub fn resolve(
        &self,
        env_name: Option<&str>,
        key: &str,
        plaintext: Option<&str>,
    ) -> Option<SecretString> {
        // 1. Environment variable
        if let Some(name) = env_name {
            if let Ok(value) = std::env::var(name) {
                if !value.is_empty() {
                    return Some(SecretString::from(value));
                }
            }
        }

        // 2. System keyring
        if self.use_keyring {
            if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, key) {
                if let Ok(secret) = entry.get_password() {
                    return Some(SecretString::from(secret));
                }
            }
        }

        // 3. Plaintext in config
        plaintext.map(|p| SecretString::from(p.to_owned()))
    }
}

// ── Translation ─────────────────────────────────────────────────────

impl ProfileEntry {
    fn has_snmp(&self) -> bool {
        self.snmp_version.is_some()
            || self.community.is_some()
            || self.community_env.is_some()
            || self.usm.is_some()
    }

    /// Resolve every secret this profile names. `owner` is the profile name
    /// or device id and prefixes keyring accounts.
    pub fn to_credentials(
        &self,
        owner: &str,
        resolver: &SecretResolver,
    ) -> Result<DeviceCredentials, ConfigError> {
        let mut creds = DeviceCredentials::default();

        if let Some(ref username) = self.username {
            let password = resolver
                .resolve(
                    self.password_env.as_deref(),
                    &format!("{owner}/password"),
                    self.password.as_deref(),
                )
                .ok_or_else(|| ConfigError::NoCredentials {
                    owner: owner.into(),
                    secret: "password".into(),
                })?;
            creds.router = Some(RouterCredentials {
                username: username.clone(),
                password,
                port: self.api_port,
            });
        }

        if self.has_snmp() {
            creds.snmp = Some(self.snmp_credentials(owner, resolver)?);
        }

        Ok(creds)
    }

    fn snmp_credentials(
        &self,
        owner: &str,
        resolver: &SecretResolver,
    ) -> Result<SnmpCredentials, ConfigError> {
        let version = self.snmp_version.unwrap_or_else(|| {
            if self.usm.is_some() {
                SnmpVersion::V3
            } else {
                SnmpVersion::V2c
            }
        });

        let community = resolver
            .resolve(
                self.community_env.as_deref(),
                &format!("{owner}/community"),
                self.community.as_deref(),
            )
            .unwrap_or_else(|| SecretString::from("public"));

        let usm = match (&self.usm, version) {
            (Some(usm), _) => Some(usm.to_credentials(owner, resolver)?),
            (None, SnmpVersion::V3) => {
                return Err(ConfigError::invalid(
                    format!("{owner}.usm"),
                    "SNMPv3 requires a usm table",
                ));
            }
            (None, _) => None,
        };

        Ok(SnmpCredentials {
            version,
            port: self.snmp_port,
            community,
            usm,
        })
    }
}

impl UsmEntry {
    fn to_credentials(
        &self,
        owner: &str,
        resolver: &SecretResolver,
    ) -> Result<UsmCredentials, ConfigError> {
        if self.username.is_empty() {
            return Err(ConfigError::invalid(format!("{owner}.usm.username"), "must not be empty"));
        }

        let auth = match self.auth_protocol {
            Some(protocol) => {
                let secret = resolver
                    .resolve(
                        self.auth_password_env.as_deref(),
                        &format!("{owner}/auth-password"),
                        self.auth_password.as_deref(),
                    )
                    .ok_or_else(|| ConfigError::NoCredentials {
                        owner: owner.into(),
                        secret: "usm auth password".into(),
                    })?;
                Some((protocol, secret))
            }
            None => None,
        };

        let privacy = match self.priv_protocol {
            Some(_) if auth.is_none() => {
                return Err(ConfigError::invalid(
                    format!("{owner}.usm.priv_protocol"),
                    "privacy requires an auth_protocol",
                ));
            }
            Some(protocol) => {
                let secret = resolver
                    .resolve(
                        self.priv_password_env.as_deref(),
                        &format!("{owner}/priv-password"),
                        self.priv_password.as_deref(),
                    )
                    .ok_or_else(|| ConfigError::NoCredentials {
                        owner: owner.into(),
                        secret: "usm privacy password".into(),
                    })?;
                Some((protocol, secret))
            }
            None => None,
        };

        Ok(UsmCredentials {
            username: self.username.clone(),
            auth,
            privacy,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    fn resolver() -> SecretResolver {
        SecretResolver::new(false)
    }

    #[test]
    fn router_profile_uses_plaintext_password() {
        let profile = ProfileEntry {
            username: Some("monitor".into()),
            password: Some("hunter2".into()),
            ..ProfileEntry::default()
        };
        let creds = profile.to_credentials("core", &resolver()).unwrap();
        let router = creds.router.unwrap();
        assert_eq!(router.username, "monitor");
        assert_eq!(router.password.expose_secret(), "hunter2");
        assert!(creds.snmp.is_none());
    }

    #[test]
    fn missing_password_is_reported() {
        let profile = ProfileEntry {
            username: Some("monitor".into()),
            ..ProfileEntry::default()
        };
        let err = profile.to_credentials("core", &resolver()).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { ref owner, .. } if owner == "core"));
    }

    #[test]
    fn env_var_wins_over_plaintext() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("EDGE_COMMUNITY", "from-env");
            let profile = ProfileEntry {
                community: Some("from-file".into()),
                community_env: Some("EDGE_COMMUNITY".into()),
                ..ProfileEntry::default()
            };
            let snmp = profile.to_credentials("edge", &resolver()).unwrap().snmp.unwrap();
            assert_eq!(snmp.community.expose_secret(), "from-env");
            assert_eq!(snmp.version, SnmpVersion::V2c);
            assert_eq!(snmp.port, SNMP_PORT);
            Ok(())
        });
    }

    #[test]
    fn community_defaults_to_public() {
        let profile = ProfileEntry {
            snmp_version: Some(SnmpVersion::V1),
            ..ProfileEntry::default()
        };
        let snmp = profile.to_credentials("edge", &resolver()).unwrap().snmp.unwrap();
        assert_eq!(snmp.community.expose_secret(), "public");
        assert_eq!(snmp.version, SnmpVersion::V1);
    }

    #[test]
    fn usm_implies_v3() {
        let profile = ProfileEntry {
            usm: Some(UsmEntry {
                username: "ops".into(),
                auth_protocol: Some(AuthProtocol::Sha),
                auth_password: Some("authpass1".into()),
                ..UsmEntry::default()
            }),
            ..ProfileEntry::default()
        };
        let snmp = profile.to_credentials("edge", &resolver()).unwrap().snmp.unwrap();
        assert_eq!(snmp.version, SnmpVersion::V3);
        let usm = snmp.usm.unwrap();
        assert_eq!(usm.auth.unwrap().0, AuthProtocol::Sha);
        assert!(usm.privacy.is_none());
    }

    #[test]
    fn v3_without_usm_is_invalid() {
        let profile = ProfileEntry {
            snmp_version: Some(SnmpVersion::V3),
            ..ProfileEntry::default()
        };
        assert!(matches!(
            profile.to_credentials("edge", &resolver()),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn privacy_without_auth_is_invalid() {
        let profile = ProfileEntry {
            usm: Some(UsmEntry {
                username: "ops".into(),
                priv_protocol: Some(PrivProtocol::Aes),
                priv_password: Some("privpass1".into()),
                ..UsmEntry::default()
            }),
            ..ProfileEntry::default()
        };
        let err = profile.to_credentials("edge", &resolver()).unwrap_err();
        assert!(err.to_string().contains("priv_protocol"), "{err}");
    }
}
