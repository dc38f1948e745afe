// ── Protocol probe adapters ──
//
// One adapter per `AdapterKind`. An adapter performs a single round of
// information gathering and never errors outward: every failure is folded
// into a `ProbeOutcome` carrying the coarse `ErrorKind`, which the engine
// reads to decide on a retry.

mod ping;
mod router;
mod snmp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use netvigil_proto::{ErrorKind, PingReply};

use crate::model::{AdapterKind, DeviceCredentials, DeviceData, Port};
use crate::pool::{ConnectionPool, RouterConnector};

pub use ping::PingAdapter;
pub use router::{RouterAdapter, parse_uptime};
pub use snmp::{SnmpAdapter, format_speed};

/// Everything an adapter needs for one probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeRequest<'a> {
    pub address: &'a str,
    pub credentials: &'a DeviceCredentials,
    /// Measure per-interface speeds instead of reusing cached ones.
    pub detailed: bool,
    /// Ports from the last successful probe.
    pub previous_ports: &'a [Port],
    /// Resolve `ifIndex` for every port.
    pub needs_index_resolution: bool,
    pub timeout: Duration,
}

/// Why a probe produced no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Normalized result of one probe.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProbeOutcome {
    pub data: Option<DeviceData>,
    pub success: bool,
    /// Only an ICMP echo answered; no management data.
    pub ping_only: bool,
    /// Reachable but some information could not be gathered.
    pub degraded: bool,
    pub failure: Option<ProbeFailure>,
}

impl ProbeOutcome {
    pub fn ok(data: DeviceData) -> Self {
        Self {
            data: Some(data),
            success: true,
            ..Self::default()
        }
    }

    pub fn degraded(data: DeviceData) -> Self {
        Self {
            degraded: true,
            ..Self::ok(data)
        }
    }

    pub fn ping(reply: PingReply) -> Self {
        Self {
            data: Some(DeviceData {
                ping_rtt_ms: reply.rtt_ms(),
                ..DeviceData::default()
            }),
            success: true,
            ping_only: true,
            ..Self::default()
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            failure: Some(ProbeFailure {
                kind,
                message: message.into(),
            }),
            ..Self::default()
        }
    }

    pub fn from_error(err: &netvigil_proto::Error) -> Self {
        Self::failed(err.kind(), err.to_string())
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    pub fn is_timeout(&self) -> bool {
        self.failure_kind() == Some(ErrorKind::Timeout)
    }
}

/// One round of probing for one device type.
#[async_trait]
pub trait ProbeAdapter: Send + Sync + 'static {
    async fn probe(&self, request: &ProbeRequest<'_>, cancel: &CancellationToken) -> ProbeOutcome;
}

// ── Ping seam ───────────────────────────────────────────────────────

/// ICMP echo, abstracted so the engine's fallback path can be faked.
#[async_trait]
pub trait Pinger: Send + Sync + 'static {
    async fn ping(
        &self,
        address: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PingReply, netvigil_proto::Error>;
}

/// Pings through the system `ping` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPinger;

#[async_trait]
impl Pinger for SystemPinger {
    async fn ping(
        &self,
        address: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<PingReply, netvigil_proto::Error> {
        netvigil_proto::guarded(
            timeout + Duration::from_secs(1),
            cancel,
            netvigil_proto::ping(address, timeout),
        )
        .await
    }
}

// ── Dispatch ────────────────────────────────────────────────────────

/// Maps each `AdapterKind` to its adapter.
#[derive(Clone)]
pub struct AdapterTable {
    router: Arc<dyn ProbeAdapter>,
    snmp: Arc<dyn ProbeAdapter>,
    ping: Arc<dyn ProbeAdapter>,
}

impl AdapterTable {
    pub fn new(
        router: Arc<dyn ProbeAdapter>,
        snmp: Arc<dyn ProbeAdapter>,
        ping: Arc<dyn ProbeAdapter>,
    ) -> Self {
        Self { router, snmp, ping }
    }

    /// The production adapters.
    pub fn standard(pool: Arc<ConnectionPool<RouterConnector>>, pinger: Arc<dyn Pinger>) -> Self {
        Self::new(
            Arc::new(RouterAdapter::new(pool)),
            Arc::new(SnmpAdapter),
            Arc::new(PingAdapter::new(pinger)),
        )
    }

    pub fn get(&self, kind: AdapterKind) -> &dyn ProbeAdapter {
        match kind {
            AdapterKind::RouterApi => self.router.as_ref(),
            AdapterKind::Snmp => self.snmp.as_ref(),
            AdapterKind::PingOnly => self.ping.as_ref(),
        }
    }
}

impl std::fmt::Debug for AdapterTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterTable").finish_non_exhaustive()
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// `(total - free) / total` as a percentage rounded to one decimal.
#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
pub(crate) fn percent_used(total: u64, free: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(free) as f64;
    Some(round1(used / total as f64 * 100.0))
}

pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_used_handles_zero_total() {
        assert_eq!(percent_used(0, 0), None);
        assert_eq!(percent_used(1000, 250), Some(75.0));
        assert_eq!(percent_used(3, 2), Some(33.3));
    }

    #[test]
    fn timeout_outcome_is_retryable() {
        let outcome =
            ProbeOutcome::from_error(&netvigil_proto::Error::Timeout(Duration::from_secs(1)));
        assert!(outcome.is_timeout());
        assert!(!outcome.success);
    }
}
