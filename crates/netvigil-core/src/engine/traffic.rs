// ── Link traffic cycle ──

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ProbingEngine;
use crate::config::EngineSettings;
use crate::error::CoreError;
use crate::model::{Connection, Device, DeviceStatus, EntityId};
use crate::scheduler::{Deadline, run_bounded, with_deadline};
use crate::store::{ConnectionTrafficUpdate, ResolvedIndex};
use crate::traffic::{CounterReading, IndexHints, apply_sample, mark_stale};

/// Summary of one traffic cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficReport {
    pub connections: usize,
    /// Produced a rate point.
    pub sampled: usize,
    /// Read but produced no rate: a first reading or a rejected pair.
    pub rebased: usize,
    /// Counters could not be read.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sample {
    Recorded,
    Rebased,
    Failed,
    Skipped,
}

impl ProbingEngine {
    pub(super) async fn traffic_cycle(
        &self,
        settings: &EngineSettings,
        cancel: &CancellationToken,
    ) -> Result<TrafficReport, CoreError> {
        let _running = super::exclusive(&self.inner.traffic_cycle_lock, cancel).await?;
        let connections = self.inner.store.list_monitored_connections().await?;
        let live: HashSet<EntityId> = connections.iter().map(|c| c.id.clone()).collect();
        self.inner.history.retain(&live);

        let total = connections.len();
        let results = run_bounded(connections, settings.traffic_concurrency, move |c| {
            self.sample_connection(c, settings, cancel)
        })
        .await;

        let count = |s: Sample| results.iter().filter(|r| **r == s).count();
        let report = TrafficReport {
            connections: total,
            sampled: count(Sample::Recorded),
            rebased: count(Sample::Rebased),
            failed: count(Sample::Failed),
        };
        debug!(?report, "traffic cycle complete");
        Ok(report)
    }

    async fn sample_connection(
        &self,
        connection: Connection,
        settings: &EngineSettings,
        cancel: &CancellationToken,
    ) -> Sample {
        let Some(endpoint) = connection.monitored_endpoint() else {
            return Sample::Skipped;
        };
        let side = connection.monitor_interface();
        let port = endpoint.port.to_owned();
        let device = match self.inner.store.get_device(endpoint.device_id).await {
            Ok(device) => device,
            Err(e) => {
                if !e.is_not_found() {
                    warn!(connection = %connection.id, error = %e, "cannot load monitored device");
                }
                return Sample::Skipped;
            }
        };

        let (link_stats, resolved_index, sample) =
            match self.read_endpoint(&connection, &device, &port, settings, cancel).await {
                Ok(reading) => {
                    let (stats, point) = apply_sample(
                        &connection.link_stats,
                        &reading,
                        connection.link_speed.as_deref(),
                    );
                    let sample = match point {
                        Some(point) => {
                            self.inner.history.push(&connection.id, point);
                            Sample::Recorded
                        }
                        None => Sample::Rebased,
                    };
                    let resolved = (connection.monitor_snmp_index() != Some(reading.if_index))
                        .then(|| ResolvedIndex {
                            side,
                            port,
                            index: reading.if_index,
                        });
                    (stats, resolved, sample)
                }
                Err(CoreError::Cancelled) => return Sample::Skipped,
                Err(e) => {
                    debug!(connection = %connection.id, device = %device.name, error = %e, "counter read failed");
                    let mut stats = connection.link_stats.clone();
                    mark_stale(&mut stats, Utc::now());
                    (stats, None, Sample::Failed)
                }
            };

        let update = ConnectionTrafficUpdate {
            connection_id: connection.id.clone(),
            link_stats,
            resolved_index,
        };
        match self.inner.store.update_connection_traffic(update).await {
            Ok(()) => sample,
            Err(e) if e.is_not_found() => {
                debug!(connection = %connection.id, "connection removed mid-cycle, sample dropped");
                Sample::Skipped
            }
            Err(e) => {
                warn!(connection = %connection.id, error = %e, "failed to store traffic sample");
                Sample::Skipped
            }
        }
    }

    async fn read_endpoint(
        &self,
        connection: &Connection,
        device: &Device,
        port: &str,
        settings: &EngineSettings,
        cancel: &CancellationToken,
    ) -> Result<CounterReading, CoreError> {
        if device.status == DeviceStatus::Offline {
            return Err(CoreError::ConnectionFailed {
                address: device.ip_address.clone(),
                reason: "device is offline".into(),
            });
        }
        let credentials = self.inner.store.resolve_credentials(device).await?;
        let snmp = credentials
            .snmp
            .ok_or_else(|| CoreError::MissingCredentials {
                device: device.name.clone(),
                protocol: "snmp".into(),
            })?;
        let hints = IndexHints {
            port_index: device
                .device_data
                .as_ref()
                .and_then(|d| d.port(port))
                .and_then(|p| p.snmp_index),
            cached_index: connection.monitor_snmp_index(),
        };

        let timeout = device.effective_timeout(settings.probe_timeout);
        let counters = &self.inner.counters;
        match with_deadline(timeout, cancel, |child| async move {
            counters
                .read_counters(&device.ip_address, port, &snmp, hints, timeout, &child)
                .await
        })
        .await
        {
            Deadline::Done(reading) => reading,
            Deadline::TimedOut => Err(CoreError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Deadline::Cancelled => Err(CoreError::Cancelled),
        }
    }
}
