// ── RouterOS API adapter ──

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use netvigil_proto::{
    Command, ErrorKind, Oid, RouterOsSession, Row, SnmpCredentials, SnmpSession, guarded,
    validate_address,
};

use super::{ProbeAdapter, ProbeOutcome, ProbeRequest, percent_used};
use crate::model::{DeviceData, MacAddress, Port, PortStatus, previous_port};
use crate::pool::{ConnectionPool, RouterConnector};

/// `IF-MIB::ifDescr`. RouterOS reports interface names here.
const IF_DESCR: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 2];

pub struct RouterAdapter {
    pool: Arc<ConnectionPool<RouterConnector>>,
}

impl RouterAdapter {
    pub fn new(pool: Arc<ConnectionPool<RouterConnector>>) -> Self {
        Self { pool }
    }
}

/// What one pass over the session produced.
struct Collected {
    data: DeviceData,
    degraded: bool,
}

#[async_trait]
impl ProbeAdapter for RouterAdapter {
    async fn probe(&self, request: &ProbeRequest<'_>, cancel: &CancellationToken) -> ProbeOutcome {
        let Some(creds) = request.credentials.router.as_ref() else {
            return ProbeOutcome::failed(ErrorKind::Validation, "no RouterOS API credentials");
        };

        let mut lease = match self
            .pool
            .acquire(request.address, creds, request.timeout, cancel)
            .await
        {
            Ok(lease) => lease,
            Err(e) => {
                return ProbeOutcome::failed(
                    e.kind().unwrap_or(ErrorKind::Connect),
                    e.to_string(),
                );
            }
        };

        let result = guarded(request.timeout, cancel, collect(lease.session(), request)).await;
        match result {
            Ok(mut collected) => {
                self.pool.release(lease, true).await;
                if request.needs_index_resolution {
                    if let Some(snmp) = request.credentials.snmp.as_ref() {
                        resolve_indexes(request, snmp, &mut collected.data.ports, cancel).await;
                    }
                }
                if collected.degraded {
                    ProbeOutcome::degraded(collected.data)
                } else {
                    ProbeOutcome::ok(collected.data)
                }
            }
            Err(e) => {
                self.pool.release(lease, !e.is_connection_loss()).await;
                ProbeOutcome::from_error(&e)
            }
        }
    }
}

async fn collect(
    session: &mut RouterOsSession,
    request: &ProbeRequest<'_>,
) -> Result<Collected, netvigil_proto::Error> {
    let mut results = session
        .run_batch(vec![
            Command::new("/system/identity/print"),
            Command::new("/system/resource/print"),
            Command::new("/interface/print"),
        ])
        .await?
        .into_iter();

    let mut degraded = false;
    let mut failed = 0;
    let mut next = |what: &str| match results.next() {
        Some(Ok(rows)) => rows,
        Some(Err(e)) => {
            debug!(address = request.address, what, error = %e, "router command failed");
            degraded = true;
            failed += 1;
            Vec::new()
        }
        None => Vec::new(),
    };
    let identity = next("identity");
    let resource = next("resource");
    let interfaces = next("interfaces");
    if failed == 3 {
        return Err(netvigil_proto::Error::Protocol {
            message: "router rejected every status command".into(),
        });
    }

    let mut data = DeviceData {
        identity: identity.first().and_then(|r| r.get("name").cloned()),
        ports: interfaces.iter().filter_map(port_from_row).collect(),
        ..DeviceData::default()
    };
    if let Some(res) = resource.first() {
        apply_resource(&mut data, res);
    }

    carry_over(&mut data.ports, request.previous_ports);
    if request.detailed {
        measure_speeds(session, &mut data.ports).await?;
    }

    Ok(Collected { data, degraded })
}

fn apply_resource(data: &mut DeviceData, res: &Row) {
    let num = |key: &str| res.get(key).and_then(|v| v.parse::<u64>().ok());
    data.cpu_pct = num("cpu-load")
        .and_then(|v| u32::try_from(v.min(100)).ok())
        .map(f64::from);
    data.memory_pct = num("total-memory").and_then(|t| percent_used(t, num("free-memory")?));
    data.disk_pct = num("total-hdd-space").and_then(|t| percent_used(t, num("free-hdd-space")?));
    data.uptime_secs = res.get("uptime").and_then(|u| parse_uptime(u));
    data.version = res.get("version").cloned();
    data.model = res.get("board-name").cloned();
}

fn port_from_row(row: &Row) -> Option<Port> {
    let name = row.get("name")?;
    let running = row.get("running").is_some_and(|v| v == "true");
    let disabled = row.get("disabled").is_some_and(|v| v == "true");
    Some(Port {
        name: name.clone(),
        default_name: row.get("default-name").cloned(),
        status: if running && !disabled {
            PortStatus::Up
        } else {
            PortStatus::Down
        },
        speed: None,
        snmp_index: None,
        mac: row.get("mac-address").map(MacAddress::new),
    })
}

/// Keep cached speed and `ifIndex` from the previous probe.
fn carry_over(ports: &mut [Port], previous: &[Port]) {
    for port in ports.iter_mut() {
        if let Some(prev) = previous_port(previous, port) {
            port.speed.clone_from(&prev.speed);
            port.snmp_index = prev.snmp_index;
        }
    }
}

/// `/interface/ethernet/monitor once` for each running port.
///
/// A trap on one port (not an ethernet interface, say) keeps its cached
/// speed; only connection loss fails the probe.
async fn measure_speeds(
    session: &mut RouterOsSession,
    ports: &mut [Port],
) -> Result<(), netvigil_proto::Error> {
    let targets: Vec<usize> = ports
        .iter()
        .enumerate()
        .filter(|(_, p)| p.status == PortStatus::Up)
        .map(|(i, _)| i)
        .collect();
    if targets.is_empty() {
        return Ok(());
    }
    let cmds = targets
        .iter()
        .filter_map(|&i| ports.get(i))
        .map(|p| {
            Command::new("/interface/ethernet/monitor")
                .attr("numbers", &p.name)
                .attr("once", "")
        })
        .collect();
    let results = session.run_batch(cmds).await?;
    for (idx, result) in targets.into_iter().zip(results) {
        let Ok(rows) = result else { continue };
        let rate = rows.first().and_then(|r| r.get("rate")).cloned();
        if let (Some(rate), Some(port)) = (rate, ports.get_mut(idx)) {
            port.speed = Some(rate);
        }
    }
    Ok(())
}

/// Walk `ifDescr` once and map port names to their `ifIndex`.
async fn resolve_indexes(
    request: &ProbeRequest<'_>,
    snmp: &SnmpCredentials,
    ports: &mut [Port],
    cancel: &CancellationToken,
) {
    let walked = guarded(request.timeout, cancel, async {
        let ip = validate_address(request.address)?;
        let mut session = SnmpSession::connect(ip, snmp, request.timeout / 2).await?;
        session.walk(&Oid::from_arcs(&IF_DESCR)).await
    })
    .await;
    let rows = match walked {
        Ok(rows) => rows,
        Err(e) => {
            debug!(address = request.address, error = %e, "ifIndex resolution failed");
            return;
        }
    };
    let by_name: HashMap<String, u32> = rows
        .iter()
        .filter_map(|vb| Some((vb.value.as_text()?, vb.oid.last()?)))
        .collect();
    for port in ports.iter_mut() {
        let index = by_name.get(&port.name).or_else(|| {
            port.default_name
                .as_ref()
                .and_then(|d| by_name.get(d))
        });
        if let Some(&index) = index {
            port.snmp_index = Some(index);
        }
    }
}

/// Parse RouterOS durations such as `1w2d3h4m5s` into seconds.
pub fn parse_uptime(raw: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut digits = String::new();
    for ch in raw.trim().chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let unit = match ch {
            'w' => 604_800,
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        let n: u64 = digits.parse().ok()?;
        total = total.checked_add(n.checked_mul(unit)?)?;
        digits.clear();
    }
    digits.is_empty().then_some(total)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn uptime_units() {
        assert_eq!(parse_uptime("1w2d3h4m5s"), Some(788_645));
        assert_eq!(parse_uptime("45s"), Some(45));
        assert_eq!(parse_uptime("3h"), Some(10_800));
        assert_eq!(parse_uptime("12"), None);
        assert_eq!(parse_uptime("5x"), None);
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn resource_percentages() {
        let mut data = DeviceData::default();
        apply_resource(
            &mut data,
            &row(&[
                ("cpu-load", "17"),
                ("total-memory", "1000"),
                ("free-memory", "250"),
                ("total-hdd-space", "200"),
                ("free-hdd-space", "150"),
                ("uptime", "2d"),
                ("version", "7.14.2 (stable)"),
                ("board-name", "CCR2004"),
            ]),
        );
        assert_eq!(data.cpu_pct, Some(17.0));
        assert_eq!(data.memory_pct, Some(75.0));
        assert_eq!(data.disk_pct, Some(25.0));
        assert_eq!(data.uptime_secs, Some(172_800));
        assert_eq!(data.model.as_deref(), Some("CCR2004"));
    }

    #[test]
    fn disabled_interface_is_down() {
        let p = port_from_row(&row(&[
            ("name", "ether3"),
            ("running", "true"),
            ("disabled", "true"),
        ]))
        .unwrap();
        assert_eq!(p.status, PortStatus::Down);
    }

    #[test]
    fn cached_speed_follows_renamed_port() {
        let previous = vec![Port {
            default_name: Some("ether1".into()),
            speed: Some("1Gbps".into()),
            snmp_index: Some(1),
            ..Port::new("ether1", PortStatus::Up)
        }];
        let mut ports = vec![Port {
            default_name: Some("ether1".into()),
            ..Port::new("uplink", PortStatus::Up)
        }];
        carry_over(&mut ports, &previous);
        assert_eq!(ports[0].speed.as_deref(), Some("1Gbps"));
        assert_eq!(ports[0].snmp_index, Some(1));
    }
}
