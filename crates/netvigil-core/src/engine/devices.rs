// ── Device probing cycle ──

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use netvigil_proto::ErrorKind;

use super::{CycleReport, ProbingEngine};
use crate::adapter::{Pinger, ProbeOutcome, ProbeRequest};
use crate::config::EngineSettings;
use crate::error::CoreError;
use crate::model::{
    AdapterKind, Device, DeviceCredentials, DeviceData, DeviceStatus, EntityId, StatusChange,
    any_port_came_up, find_port,
};
use crate::scheduler::{Deadline, is_detailed_cycle, run_bounded, with_deadline};
use crate::status::{self, FailureStep};
use crate::store::DeviceProbeUpdate;

/// How to probe one device.
#[derive(Debug, Clone, Copy)]
struct ProbeMode {
    detailed: bool,
    resolve_indexes: bool,
    timeout: Duration,
    /// Ping stale devices before spending a full probe on them.
    stale_precheck: bool,
}

/// Port names read by monitored connections, keyed by device.
type MonitoredPorts = HashMap<EntityId, Vec<String>>;

impl ProbeMode {
    /// Indexes are resolved on any cycle while a monitored port of the
    /// device has no `snmp_index` yet.
    fn scheduled(
        device: &Device,
        settings: &EngineSettings,
        detailed: bool,
        monitored: &[String],
    ) -> Self {
        let ports = device.ports();
        Self {
            detailed,
            resolve_indexes: monitored
                .iter()
                .any(|name| find_port(ports, name).is_none_or(|p| p.snmp_index.is_none())),
            timeout: device.effective_timeout(settings.probe_timeout),
            stale_precheck: settings.ping_fallback,
        }
    }

    fn manual(settings: &EngineSettings) -> Self {
        Self {
            detailed: true,
            resolve_indexes: true,
            timeout: settings.manual_probe_timeout,
            stale_precheck: false,
        }
    }

    fn escalated(self) -> Self {
        Self {
            detailed: true,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tally {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy)]
struct Processed {
    tally: Tally,
    changed: bool,
}

impl Processed {
    const SKIPPED: Self = Self {
        tally: Tally::Skipped,
        changed: false,
    };
}

/// Ping verdicts shared by every device in one cycle, so devices behind
/// the same address are pinged once.
struct PingVerifier {
    pinger: Arc<dyn Pinger>,
    timeout: Duration,
    verdicts: Mutex<HashMap<String, bool>>,
}

impl PingVerifier {
    fn new(pinger: Arc<dyn Pinger>, timeout: Duration) -> Self {
        Self {
            pinger,
            timeout,
            verdicts: Mutex::new(HashMap::new()),
        }
    }

    async fn reachable(&self, address: &str, cancel: &CancellationToken) -> bool {
        let cached = self
            .verdicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .copied();
        if let Some(verdict) = cached {
            return verdict;
        }
        let ok = match self.pinger.ping(address, self.timeout, cancel).await {
            Ok(_) => true,
            Err(e) => {
                debug!(address, error = %e, "ping verification failed");
                false
            }
        };
        self.verdicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_owned(), ok);
        ok
    }
}

struct CycleContext<'a> {
    settings: &'a EngineSettings,
    verifier: PingVerifier,
    cancel: &'a CancellationToken,
}

impl ProbingEngine {
    pub(super) async fn device_cycle(
        &self,
        settings: &EngineSettings,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CoreError> {
        let _running = super::exclusive(&self.inner.device_cycle_lock, cancel).await?;
        let cycle = self.inner.cycles.fetch_add(1, Ordering::Relaxed);
        let detailed = is_detailed_cycle(cycle, settings.detailed_every);
        let started_at = Utc::now();
        let started = Instant::now();

        if let Some(pool) = &self.inner.pool {
            pool.set_enabled(settings.pool_enabled).await;
        }
        let devices = self.inner.store.list_devices().await?;
        let monitored = self.monitored_ports().await;
        let total = devices.len();
        debug!(cycle, detailed, devices = total, "device cycle starting");

        let ctx = CycleContext {
            settings,
            verifier: PingVerifier::new(Arc::clone(&self.inner.pinger), settings.ping_timeout),
            cancel,
        };
        let ctx = &ctx;
        let monitored = &monitored;
        let results = run_bounded(devices, settings.concurrency, move |device| {
            let ports = monitored.get(&device.id).map_or(&[][..], Vec::as_slice);
            let mode = ProbeMode::scheduled(&device, settings, detailed, ports);
            self.process_device(device, mode, ctx)
        })
        .await;

        let count = |t: Tally| results.iter().filter(|r| r.tally == t).count();
        let succeeded = count(Tally::Succeeded);
        let failed = count(Tally::Failed);
        let report = CycleReport {
            cycle,
            detailed,
            started_at,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            devices: total,
            succeeded,
            failed,
            skipped: count(Tally::Skipped),
            status_changes: results.iter().filter(|r| r.changed).count(),
        };

        let attempted = succeeded + failed;
        if attempted > 1 && failed * 2 > attempted {
            warn!(
                cycle,
                failed, attempted, "more than half of all probes failed; check the monitoring host's network"
            );
        }
        info!(
            cycle,
            detailed,
            devices = total,
            succeeded,
            failed,
            elapsed_ms = report.elapsed_ms,
            "device cycle complete"
        );
        self.inner.last_cycle.send_replace(Some(report.clone()));
        Ok(report)
    }

    /// Which ports each device must be able to map to an `ifIndex`.
    async fn monitored_ports(&self) -> MonitoredPorts {
        let connections = match self.inner.store.list_monitored_connections().await {
            Ok(connections) => connections,
            Err(e) => {
                warn!(error = %e, "cannot list monitored connections, no index resolution this cycle");
                return MonitoredPorts::new();
            }
        };
        let mut ports = MonitoredPorts::new();
        for connection in &connections {
            if let Some(endpoint) = connection.monitored_endpoint() {
                ports
                    .entry(endpoint.device_id.clone())
                    .or_default()
                    .push(endpoint.port.to_owned());
            }
        }
        ports
    }

    /// `probe_now` path: one detailed probe with the manual timeout.
    pub(super) async fn probe_manually(
        &self,
        device: Device,
        settings: &EngineSettings,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let id = device.id.clone();
        let ctx = CycleContext {
            settings,
            verifier: PingVerifier::new(Arc::clone(&self.inner.pinger), settings.ping_timeout),
            cancel,
        };
        let processed = self
            .process_device(device, ProbeMode::manual(settings), &ctx)
            .await;
        if processed.tally == Tally::Skipped {
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            return Err(CoreError::DeviceNotFound {
                identifier: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Per-device pipeline ──────────────────────────────────────

    async fn process_device(
        &self,
        device: Device,
        mode: ProbeMode,
        ctx: &CycleContext<'_>,
    ) -> Processed {
        let settings = ctx.settings;

        if mode.stale_precheck
            && status::needs_stale_check(&device, Utc::now(), settings.polling_interval)
        {
            if !ctx.verifier.reachable(&device.ip_address, ctx.cancel).await {
                if ctx.cancel.is_cancelled() {
                    return Processed::SKIPPED;
                }
                debug!(device = %device.name, "stale device failed ping pre-check");
                let failure_count = device.failure_count.saturating_add(1);
                return self
                    .commit(&device, DeviceStatus::Offline, failure_count, None, None)
                    .await
                    .map_or(Processed::SKIPPED, |changed| Processed {
                        tally: Tally::Failed,
                        changed,
                    });
            }
        }

        let outcome = match self.inner.store.resolve_credentials(&device).await {
            Ok(credentials) => {
                let Some(outcome) = self.probe_device(&device, &credentials, mode, ctx.cancel).await
                else {
                    return Processed::SKIPPED;
                };
                outcome
            }
            Err(e) => ProbeOutcome::failed(ErrorKind::Validation, e.to_string()),
        };

        let now = Utc::now();
        let (tally, committed) = if outcome.success {
            let status = status::on_success(device.device_type, &outcome);
            let keep_previous =
                outcome.ping_only && device.device_type.adapter() != AdapterKind::PingOnly;
            let data = if keep_previous { None } else { outcome.data };
            let committed = self.commit(&device, status, 0, Some(now), data).await;
            (Tally::Succeeded, committed)
        } else {
            if let Some(failure) = &outcome.failure {
                debug!(
                    device = %device.name,
                    kind = %failure.kind,
                    error = %failure.message,
                    "probe failed"
                );
            }
            let threshold = device.effective_threshold(settings.offline_threshold);
            let step = status::on_failure(&device, threshold, settings.ping_fallback);
            let status = match step {
                FailureStep::Hold { .. } => device.status,
                FailureStep::Verify { .. } => {
                    let ok = ctx.verifier.reachable(&device.ip_address, ctx.cancel).await;
                    if ctx.cancel.is_cancelled() {
                        return Processed::SKIPPED;
                    }
                    status::after_ping(ok)
                }
                FailureStep::Offline { .. } => DeviceStatus::Offline,
            };
            let committed = self
                .commit(&device, status, step.failure_count(), None, None)
                .await;
            (Tally::Failed, committed)
        };

        committed.map_or(Processed::SKIPPED, |changed| Processed { tally, changed })
    }

    /// Probe with one retry on timeout, then escalate to a detailed probe
    /// if a port came up since the last snapshot. `None` on shutdown.
    async fn probe_device(
        &self,
        device: &Device,
        credentials: &DeviceCredentials,
        mode: ProbeMode,
        cancel: &CancellationToken,
    ) -> Option<ProbeOutcome> {
        let outcome = self.probe_with_retry(device, credentials, mode, cancel).await?;
        if mode.detailed || !outcome.success || !came_up(device, outcome.data.as_ref()) {
            return Some(outcome);
        }

        info!(device = %device.name, "interface came up, re-probing in detail");
        let detailed = self
            .probe_with_retry(device, credentials, mode.escalated(), cancel)
            .await?;
        Some(if detailed.success { detailed } else { outcome })
    }

    async fn probe_with_retry(
        &self,
        device: &Device,
        credentials: &DeviceCredentials,
        mode: ProbeMode,
        cancel: &CancellationToken,
    ) -> Option<ProbeOutcome> {
        let first = self.probe_once(device, credentials, mode, cancel).await?;
        if !first.is_timeout() {
            return Some(first);
        }
        debug!(device = %device.name, "probe timed out, retrying once");
        self.probe_once(device, credentials, mode, cancel).await
    }

    async fn probe_once(
        &self,
        device: &Device,
        credentials: &DeviceCredentials,
        mode: ProbeMode,
        cancel: &CancellationToken,
    ) -> Option<ProbeOutcome> {
        let adapter = self.inner.adapters.get(device.device_type.adapter());
        let request = ProbeRequest {
            address: &device.ip_address,
            credentials,
            detailed: mode.detailed,
            previous_ports: device.ports(),
            needs_index_resolution: mode.resolve_indexes,
            timeout: mode.timeout,
        };
        let started = Instant::now();
        let outcome = match with_deadline(mode.timeout, cancel, |child| async move {
            adapter.probe(&request, &child).await
        })
        .await
        {
            Deadline::Done(outcome) => outcome,
            Deadline::TimedOut => ProbeOutcome::failed(
                ErrorKind::Timeout,
                format!("no answer within {}ms", mode.timeout.as_millis()),
            ),
            Deadline::Cancelled => return None,
        };
        debug!(
            device = %device.name,
            adapter = %device.device_type.adapter(),
            detailed = mode.detailed,
            success = outcome.success,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "probe finished"
        );
        Some(outcome)
    }

    /// Write the result back. `None` if the device vanished or the write
    /// failed; otherwise whether the status changed.
    async fn commit(
        &self,
        device: &Device,
        status: DeviceStatus,
        failure_count: u32,
        last_seen: Option<DateTime<Utc>>,
        device_data: Option<DeviceData>,
    ) -> Option<bool> {
        let now = Utc::now();
        let changed = status != device.status;
        let update = DeviceProbeUpdate {
            device_id: device.id.clone(),
            status,
            status_changed_at: changed.then_some(now),
            last_seen,
            failure_count,
            device_data,
        };
        match self.inner.store.update_device_probe(update).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(device = %device.id, "device removed mid-cycle, result dropped");
                return None;
            }
            Err(e) => {
                warn!(device = %device.name, error = %e, "failed to store probe result");
                return None;
            }
        }

        if changed {
            self.emit(StatusChange {
                device_id: device.id.clone(),
                device_name: device.name.clone(),
                old: device.status,
                new: status,
                at: now,
                notify: status::should_notify(device.status, status),
            })
            .await;
        }
        Some(changed)
    }
}

fn came_up(device: &Device, data: Option<&DeviceData>) -> bool {
    data.is_some_and(|d| any_port_came_up(device.ports(), &d.ports))
}
