// ── [engine] and [pool] tables ──

use std::time::Duration;

use serde::{Deserialize, Serialize};

use netvigil_core::{EngineSettings, PoolConfig};

use crate::ConfigError;

/// `[engine]`: probing engine tuning. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSection {
    pub polling_interval: u64,
    pub probe_timeout: u64,
    pub offline_threshold: u32,
    pub concurrency: usize,
    pub ping_fallback: bool,
    pub ping_timeout: u64,
    pub pool_enabled: bool,
    pub traffic_interval: u64,
    pub traffic_concurrency: usize,
    pub detailed_every: u32,
    pub manual_probe_timeout: u64,
    pub scan_concurrency: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for EngineSection {
    fn from(s: &EngineSettings) -> Self {
        Self {
            polling_interval: s.polling_interval.as_secs(),
            probe_timeout: s.probe_timeout.as_secs(),
            offline_threshold: s.offline_threshold,
            concurrency: s.concurrency,
            ping_fallback: s.ping_fallback,
            ping_timeout: s.ping_timeout.as_secs(),
            pool_enabled: s.pool_enabled,
            traffic_interval: s.traffic_interval.as_secs(),
            traffic_concurrency: s.traffic_concurrency,
            detailed_every: s.detailed_every,
            manual_probe_timeout: s.manual_probe_timeout.as_secs(),
            scan_concurrency: s.scan_concurrency,
        }
    }
}

impl EngineSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("engine.polling_interval", self.polling_interval),
            ("engine.probe_timeout", self.probe_timeout),
            ("engine.ping_timeout", self.ping_timeout),
            ("engine.traffic_interval", self.traffic_interval),
            ("engine.manual_probe_timeout", self.manual_probe_timeout),
            ("engine.offline_threshold", u64::from(self.offline_threshold)),
            ("engine.detailed_every", u64::from(self.detailed_every)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        for (field, value) in [
            ("engine.concurrency", self.concurrency),
            ("engine.traffic_concurrency", self.traffic_concurrency),
            ("engine.scan_concurrency", self.scan_concurrency),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1"));
            }
        }
        Ok(())
    }

    pub fn to_settings(&self) -> EngineSettings {
        EngineSettings {
            polling_interval: Duration::from_secs(self.polling_interval),
            probe_timeout: Duration::from_secs(self.probe_timeout),
            offline_threshold: self.offline_threshold,
            concurrency: self.concurrency,
            ping_fallback: self.ping_fallback,
            ping_timeout: Duration::from_secs(self.ping_timeout),
            pool_enabled: self.pool_enabled,
            traffic_interval: Duration::from_secs(self.traffic_interval),
            traffic_concurrency: self.traffic_concurrency,
            detailed_every: self.detailed_every,
            manual_probe_timeout: Duration::from_secs(self.manual_probe_timeout),
            scan_concurrency: self.scan_concurrency,
        }
    }
}

/// `[pool]`: router session pool tuning. Seconds unless suffixed `_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSection {
    pub busy_wait_ms: u64,
    pub busy_poll_ms: u64,
    pub liveness_timeout: u64,
    pub idle_timeout: u64,
    pub sweep_interval: u64,
    pub max_error_count: u32,
    pub cooldown: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        let d = PoolConfig::default();
        Self {
            busy_wait_ms: u64::try_from(d.busy_wait.as_millis()).unwrap_or(u64::MAX),
            busy_poll_ms: u64::try_from(d.busy_poll.as_millis()).unwrap_or(u64::MAX),
            liveness_timeout: d.liveness_timeout.as_secs(),
            idle_timeout: d.idle_timeout.as_secs(),
            sweep_interval: d.sweep_interval.as_secs(),
            max_error_count: d.max_error_count,
            cooldown: d.cooldown.as_secs(),
        }
    }
}

impl PoolSection {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.busy_poll_ms == 0 {
            return Err(ConfigError::invalid("pool.busy_poll_ms", "must be greater than zero"));
        }
        if self.sweep_interval == 0 {
            return Err(ConfigError::invalid("pool.sweep_interval", "must be greater than zero"));
        }
        if self.max_error_count == 0 {
            return Err(ConfigError::invalid("pool.max_error_count", "must be at least 1"));
        }
        Ok(())
    }

    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            busy_wait: Duration::from_millis(self.busy_wait_ms),
            busy_poll: Duration::from_millis(self.busy_poll_ms),
            liveness_timeout: Duration::from_secs(self.liveness_timeout),
            idle_timeout: Duration::from_secs(self.idle_timeout),
            sweep_interval: Duration::from_secs(self.sweep_interval),
            max_error_count: self.max_error_count,
            cooldown: Duration::from_secs(self.cooldown),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_to_core_settings() {
        assert_eq!(EngineSection::default().to_settings(), EngineSettings::default());
        assert_eq!(PoolSection::default().to_pool_config(), PoolConfig::default());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let section = EngineSection {
            polling_interval: 0,
            ..EngineSection::default()
        };
        let err = section.validate().unwrap_err();
        assert!(err.to_string().contains("engine.polling_interval"), "{err}");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let section = EngineSection {
            traffic_concurrency: 0,
            ..EngineSection::default()
        };
        assert!(section.validate().is_err());
    }
}
