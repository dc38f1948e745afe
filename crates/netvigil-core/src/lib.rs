//! Health-probing engine between `netvigil-proto` and the CLI.
//!
//! This crate owns the monitoring logic for a fleet of network devices:
//!
//! - **[`ProbingEngine`]**: Central facade. [`start()`](ProbingEngine::start)
//!   spawns a self-paced device loop (bounded concurrency, every Nth cycle
//!   detailed, one retry on timeout) and a traffic loop sampling monitored
//!   links. [`probe_now()`](ProbingEngine::probe_now) runs an out-of-band
//!   detailed probe.
//!
//! - **Adapters** ([`adapter`]): One per device type: RouterOS API, SNMP,
//!   and ping. Each folds transport failures into a [`ProbeOutcome`].
//!
//! - **[`ConnectionPool`]**: Reuses RouterOS sessions per
//!   address/port/user, with exclusive leases, liveness checks and a
//!   cooldown after repeated failures.
//!
//! - **Status machine** ([`status`]): Pure transition rules: failure
//!   hysteresis, ping fallback to `stale`, and which transitions notify.
//!
//! - **Traffic engine** ([`traffic`]): Octet counters to bandwidth rates
//!   with 32-bit wrap handling, a 100 Gbps plausibility clamp and a short
//!   per-link history.
//!
//! - **[`DeviceStore`]**: The storage seam. [`MemoryStore`] backs the CLI
//!   and the tests.

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod pool;
pub mod scan;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod traffic;

// ── Primary re-exports ──────────────────────────────────────────────
pub use adapter::{AdapterTable, Pinger, ProbeAdapter, ProbeOutcome, ProbeRequest, SystemPinger};
pub use config::{EngineSettings, PoolConfig};
pub use engine::{CycleReport, EngineBuilder, EngineState, Notifier, ProbingEngine, TrafficReport};
pub use error::CoreError;
pub use pool::{ConnectionPool, PoolStats, RouterConnector};
pub use scan::ScanHit;
pub use store::{DeviceStore, MemoryStore};
pub use traffic::{CounterSource, SnmpCounterSource, TrafficPoint};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AdapterKind, Connection, CredentialsRef, Device, DeviceCredentials, DeviceData, DeviceStatus,
    DeviceType, EntityId, EventLogEntry, LinkStats, MacAddress, MonitorSide, Port, PortStatus,
    RouterRole, StatusChange,
};
