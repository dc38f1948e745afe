// ── Device status state machine ──
//
// Pure transition rules. The engine feeds in probe outcomes and ping
// verdicts; nothing here does I/O or reads the clock.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::adapter::ProbeOutcome;
use crate::model::{AdapterKind, Device, DeviceStatus, DeviceType};

/// Status after a probe that returned data.
///
/// A management device that only answered ping is `Stale`; an adapter
/// that flagged partial failure yields `Warning`.
pub fn on_success(device_type: DeviceType, outcome: &ProbeOutcome) -> DeviceStatus {
    if outcome.ping_only && device_type.adapter() != AdapterKind::PingOnly {
        DeviceStatus::Stale
    } else if outcome.degraded {
        DeviceStatus::Warning
    } else {
        DeviceStatus::Online
    }
}

/// What a failed probe means for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStep {
    /// Below the threshold: keep the previous status.
    Hold { failure_count: u32 },
    /// Threshold reached: a ping decides between stale and offline.
    Verify { failure_count: u32 },
    /// Threshold reached and no ping fallback applies.
    Offline { failure_count: u32 },
}

impl FailureStep {
    pub fn failure_count(self) -> u32 {
        match self {
            Self::Hold { failure_count }
            | Self::Verify { failure_count }
            | Self::Offline { failure_count } => failure_count,
        }
    }
}

/// Count one more failure and decide what happens next.
pub fn on_failure(device: &Device, threshold: u32, ping_fallback: bool) -> FailureStep {
    let failure_count = device.failure_count.saturating_add(1);
    if failure_count < threshold.max(1) {
        FailureStep::Hold { failure_count }
    } else if ping_fallback && device.device_type.adapter() != AdapterKind::PingOnly {
        FailureStep::Verify { failure_count }
    } else {
        FailureStep::Offline { failure_count }
    }
}

/// Status once the fallback ping has answered (or not).
pub fn after_ping(ping_ok: bool) -> DeviceStatus {
    if ping_ok {
        DeviceStatus::Stale
    } else {
        DeviceStatus::Offline
    }
}

/// Whether a device should be re-verified by ping before this cycle.
///
/// Applies to devices still believed reachable whose last successful
/// probe is older than twice the polling interval.
pub fn needs_stale_check(device: &Device, now: DateTime<Utc>, interval: Duration) -> bool {
    if device.device_type.adapter() == AdapterKind::PingOnly {
        return false;
    }
    if !matches!(
        device.status,
        DeviceStatus::Online | DeviceStatus::Warning | DeviceStatus::Stale
    ) {
        return false;
    }
    let Some(last_seen) = device.last_seen else {
        return false;
    };
    let limit = chrono::Duration::from_std(interval.saturating_mul(2))
        .unwrap_or(chrono::TimeDelta::MAX);
    now.signed_duration_since(last_seen) > limit
}

/// Whether notification channels hear about a transition.
///
/// Quiet transitions: into `stale`, and `stale` back to online/warning.
pub fn should_notify(old: DeviceStatus, new: DeviceStatus) -> bool {
    if old == new || new == DeviceStatus::Stale {
        return false;
    }
    !(old == DeviceStatus::Stale && new.is_up())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DeviceData, RouterRole};

    fn router(status: DeviceStatus, failures: u32) -> Device {
        let mut d = Device::new(
            "r1",
            "r1",
            "10.0.0.1",
            DeviceType::RouterApi {
                role: RouterRole::Router,
            },
        );
        d.status = status;
        d.failure_count = failures;
        d
    }

    #[test]
    fn hysteresis_holds_until_threshold() {
        let mut d = router(DeviceStatus::Online, 0);
        let first = on_failure(&d, 3, true);
        assert_eq!(first, FailureStep::Hold { failure_count: 1 });
        d.failure_count = first.failure_count();
        let second = on_failure(&d, 3, true);
        assert_eq!(second, FailureStep::Hold { failure_count: 2 });
        d.failure_count = second.failure_count();
        assert_eq!(on_failure(&d, 3, true), FailureStep::Verify { failure_count: 3 });
        assert_eq!(on_failure(&d, 3, false), FailureStep::Offline { failure_count: 3 });
    }

    #[test]
    fn ping_only_devices_skip_fallback() {
        let mut d = router(DeviceStatus::Online, 2);
        d.device_type = DeviceType::PingOnly;
        assert_eq!(on_failure(&d, 3, true), FailureStep::Offline { failure_count: 3 });
    }

    #[test]
    fn zero_threshold_acts_as_one() {
        let d = router(DeviceStatus::Online, 0);
        assert_eq!(on_failure(&d, 0, false), FailureStep::Offline { failure_count: 1 });
    }

    #[test]
    fn ping_verdicts() {
        assert_eq!(after_ping(true), DeviceStatus::Stale);
        assert_eq!(after_ping(false), DeviceStatus::Offline);
    }

    #[test]
    fn success_statuses() {
        let t = DeviceType::Snmp;
        let ok = ProbeOutcome::ok(DeviceData::default());
        assert_eq!(on_success(t, &ok), DeviceStatus::Online);
        let degraded = ProbeOutcome::degraded(DeviceData::default());
        assert_eq!(on_success(t, &degraded), DeviceStatus::Warning);
        let ping = ProbeOutcome::ping(netvigil_proto::PingReply { rtt: None });
        assert_eq!(on_success(t, &ping), DeviceStatus::Stale);
        assert_eq!(on_success(DeviceType::PingOnly, &ping), DeviceStatus::Online);
    }

    #[test]
    fn notification_rules() {
        use DeviceStatus::{Offline, Online, Stale, Unknown, Warning};
        assert!(!should_notify(Online, Stale));
        assert!(!should_notify(Stale, Online));
        assert!(!should_notify(Stale, Warning));
        assert!(should_notify(Stale, Offline));
        assert!(should_notify(Online, Offline));
        assert!(should_notify(Offline, Online));
        assert!(should_notify(Online, Warning));
        assert!(should_notify(Unknown, Offline));
        assert!(!should_notify(Online, Online));
    }

    #[test]
    fn first_verdict_from_unknown_is_announced() {
        use DeviceStatus::{Online, Unknown, Warning};
        assert!(should_notify(Unknown, Online));
        assert!(should_notify(Unknown, Warning));
        assert!(!should_notify(Unknown, DeviceStatus::Stale));
    }

    #[test]
    fn stale_check_after_two_intervals() {
        let now = Utc::now();
        let mut d = router(DeviceStatus::Online, 1);
        d.last_seen = Some(now - chrono::Duration::seconds(59));
        assert!(!needs_stale_check(&d, now, Duration::from_secs(30)));
        d.last_seen = Some(now - chrono::Duration::seconds(61));
        assert!(needs_stale_check(&d, now, Duration::from_secs(30)));
        d.status = DeviceStatus::Offline;
        assert!(!needs_stale_check(&d, now, Duration::from_secs(30)));
    }
}
