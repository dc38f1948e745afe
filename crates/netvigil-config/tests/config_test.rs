#![allow(clippy::unwrap_used)]
// Loading, validating and saving netvigil configuration files.

use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;

use netvigil_config::{
    Config, ConfigError, DeviceEntry, DeviceKind, ProfileEntry, load_config_from, save_config,
};
use netvigil_core::{EngineSettings, PoolConfig};

// ── Helpers ─────────────────────────────────────────────────────────

const SAMPLE: &str = r#"
keyring = false

[engine]
polling_interval = 15
concurrency = 4
detailed_every = 5

[pool]
cooldown = 120

[profiles.ops]
username = "monitor"
password = "pw"

[[devices]]
id = "core"
address = "192.0.2.1"
type = "routeros"
profile = "ops"
"#;

// ── Loading ─────────────────────────────────────────────────────────

#[test]
fn missing_file_yields_defaults() {
    figment::Jail::expect_with(|_jail| {
        let config = load_config_from(Path::new("absent.toml")).unwrap();
        assert_eq!(config.engine.to_settings(), EngineSettings::default());
        assert_eq!(config.pool.to_pool_config(), PoolConfig::default());
        assert!(config.keyring);
        assert!(config.devices.is_empty());
        Ok(())
    });
}

#[test]
fn file_values_override_defaults() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("netvigil.toml", SAMPLE)?;
        let config = load_config_from(Path::new("netvigil.toml")).unwrap();

        let settings = config.engine.to_settings();
        assert_eq!(settings.polling_interval, Duration::from_secs(15));
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.detailed_every, 5);
        assert_eq!(settings.offline_threshold, EngineSettings::default().offline_threshold);
        assert_eq!(config.pool.to_pool_config().cooldown, Duration::from_secs(120));

        let inventory = config.inventory().unwrap();
        assert_eq!(inventory.devices.len(), 1);
        assert!(inventory.profiles["ops"].router.is_some());
        Ok(())
    });
}

#[test]
fn environment_overrides_file() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("netvigil.toml", SAMPLE)?;
        jail.set_env("NETVIGIL_ENGINE__POLLING_INTERVAL", "45");
        jail.set_env("NETVIGIL_POOL__MAX_ERROR_COUNT", "5");
        let config = load_config_from(Path::new("netvigil.toml")).unwrap();
        assert_eq!(config.engine.polling_interval, 45);
        assert_eq!(config.engine.concurrency, 4);
        assert_eq!(config.pool.max_error_count, 5);
        Ok(())
    });
}

#[test]
fn invalid_engine_value_names_the_field() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("netvigil.toml", "[engine]\nconcurrency = 0\n")?;
        let err = load_config_from(Path::new("netvigil.toml")).unwrap_err();
        match err {
            ConfigError::Validation { field, .. } => assert_eq!(field, "engine.concurrency"),
            other => panic!("expected validation error, got {other:?}"),
        }
        Ok(())
    });
}

#[test]
fn malformed_toml_is_a_load_error() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("netvigil.toml", "[engine\npolling_interval = 1")?;
        let err = load_config_from(Path::new("netvigil.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Figment(_)), "{err:?}");
        Ok(())
    });
}

// ── Saving ──────────────────────────────────────────────────────────

#[test]
fn saved_config_loads_back() {
    figment::Jail::expect_with(|_jail| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config {
            keyring: false,
            ..Config::default()
        };
        config.engine.polling_interval = 20;
        config.profiles.insert(
            "lab".into(),
            ProfileEntry {
                community: Some("lab-ro".into()),
                ..ProfileEntry::default()
            },
        );
        config.devices.push(DeviceEntry {
            id: "lab-sw".into(),
            name: Some("Lab switch".into()),
            address: "198.51.100.7".into(),
            kind: DeviceKind::Snmp,
            role: None,
            profile: Some("lab".into()),
            credentials: None,
            probe_timeout: None,
            offline_threshold: Some(5),
        });

        save_config(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();

        assert_eq!(loaded.engine, config.engine);
        assert_eq!(loaded.profiles, config.profiles);
        assert_eq!(loaded.devices, config.devices);
        assert!(!loaded.keyring);

        let inventory = loaded.inventory().unwrap();
        assert_eq!(inventory.devices[0].offline_threshold, Some(5));
        Ok(())
    });
}
