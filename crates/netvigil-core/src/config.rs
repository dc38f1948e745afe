// ── Runtime engine configuration ──
//
// Tuning knobs for the probing engine and the router session pool.
// These never touch disk: `netvigil-config` builds them from TOML and
// environment, and the store hands `EngineSettings` back each cycle so
// operators can change them without restarting the engine.

use std::time::Duration;

/// Settings read by the engine at the start of every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Target period between device probing cycles.
    pub polling_interval: Duration,
    /// Per-attempt probe deadline unless a device overrides it.
    pub probe_timeout: Duration,
    /// Consecutive failures before a device leaves its last good status.
    pub offline_threshold: u32,
    /// Ceiling on devices probed at once.
    pub concurrency: usize,
    /// Ping a failing device before declaring it offline.
    pub ping_fallback: bool,
    /// Deadline for a single verification ping.
    pub ping_timeout: Duration,
    /// Reuse authenticated router sessions between cycles.
    pub pool_enabled: bool,
    /// Period between traffic counter cycles.
    pub traffic_interval: Duration,
    pub traffic_concurrency: usize,
    /// Every Nth device cycle (counting the first) is detailed.
    pub detailed_every: u32,
    /// Deadline for an operator-triggered probe.
    pub manual_probe_timeout: Duration,
    /// Ceiling on hosts pinged at once by a range scan.
    pub scan_concurrency: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            offline_threshold: 3,
            concurrency: 10,
            ping_fallback: true,
            ping_timeout: Duration::from_secs(2),
            pool_enabled: true,
            traffic_interval: Duration::from_secs(10),
            traffic_concurrency: 5,
            detailed_every: 10,
            manual_probe_timeout: Duration::from_secs(30),
            scan_concurrency: 50,
        }
    }
}

/// Router session pool tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// How long to wait for a busy session before opening a temporary one.
    pub busy_wait: Duration,
    pub busy_poll: Duration,
    /// Deadline for the liveness command sent to an idle session.
    pub liveness_timeout: Duration,
    /// Idle sessions older than this are closed by the sweeper.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// Consecutive connect failures before the entry cools down.
    pub max_error_count: u32,
    pub cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            busy_wait: Duration::from_secs(3),
            busy_poll: Duration::from_millis(100),
            liveness_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            max_error_count: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}
