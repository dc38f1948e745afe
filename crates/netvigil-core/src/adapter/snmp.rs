// ── Generic SNMP adapter ──
//
// System group via GET, then table walks for CPU (HOST-RESOURCES-MIB),
// storage and interfaces. The system group is required; everything else
// is optional and only marks the result degraded when the agent answers
// with an error instead of simply not implementing the table.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use netvigil_proto::{
    ErrorKind, Oid, SnmpSession, Value, VarBind, guarded, snmp::first_value, validate_address,
};

use super::{ProbeAdapter, ProbeOutcome, ProbeRequest, percent_used, round1};
use crate::model::{DeviceData, MacAddress, Port, PortStatus};

// ── OIDs ────────────────────────────────────────────────────────────

const SYS_DESCR: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 1, 0];
const SYS_UPTIME: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 3, 0];
const SYS_NAME: [u32; 9] = [1, 3, 6, 1, 2, 1, 1, 5, 0];

const HR_PROCESSOR_LOAD: [u32; 11] = [1, 3, 6, 1, 2, 1, 25, 3, 3, 1, 2];
const HR_STORAGE_TYPE: [u32; 11] = [1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 2];
const HR_STORAGE_SIZE: [u32; 11] = [1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 5];
const HR_STORAGE_USED: [u32; 11] = [1, 3, 6, 1, 2, 1, 25, 2, 3, 1, 6];
const HR_STORAGE_RAM: [u32; 10] = [1, 3, 6, 1, 2, 1, 25, 2, 1, 2];
const HR_STORAGE_FIXED_DISK: [u32; 10] = [1, 3, 6, 1, 2, 1, 25, 2, 1, 4];

const IF_DESCR: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
const IF_SPEED: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 5];
const IF_PHYS_ADDRESS: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 6];
const IF_OPER_STATUS: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 8];
const IF_NAME: [u32; 11] = [1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 1];
const IF_HIGH_SPEED: [u32; 11] = [1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 15];

#[derive(Debug, Default, Clone, Copy)]
pub struct SnmpAdapter;

#[async_trait]
impl ProbeAdapter for SnmpAdapter {
    async fn probe(&self, request: &ProbeRequest<'_>, cancel: &CancellationToken) -> ProbeOutcome {
        let Some(creds) = request.credentials.snmp.as_ref() else {
            return ProbeOutcome::failed(ErrorKind::Validation, "no SNMP credentials");
        };
        let ip = match validate_address(request.address) {
            Ok(ip) => ip,
            Err(e) => return ProbeOutcome::from_error(&e),
        };

        let result = guarded(request.timeout, cancel, async {
            let mut session = SnmpSession::connect(ip, creds, request.timeout / 2).await?;
            collect(&mut session).await
        })
        .await;
        match result {
            Ok(Collected { data, degraded: true }) => ProbeOutcome::degraded(data),
            Ok(Collected { data, .. }) => ProbeOutcome::ok(data),
            Err(e) => ProbeOutcome::from_error(&e),
        }
    }
}

struct Collected {
    data: DeviceData,
    degraded: bool,
}

async fn collect(session: &mut SnmpSession) -> Result<Collected, netvigil_proto::Error> {
    let system = session
        .get(&[
            Oid::from_arcs(&SYS_DESCR),
            Oid::from_arcs(&SYS_UPTIME),
            Oid::from_arcs(&SYS_NAME),
        ])
        .await?;
    let scalar = |i: usize| system.get(i..).and_then(first_value);

    let mut data = DeviceData {
        model: scalar(0).and_then(Value::as_text).map(first_line),
        uptime_secs: scalar(1).and_then(Value::as_u64).map(|ticks| ticks / 100),
        identity: scalar(2).and_then(Value::as_text),
        ..DeviceData::default()
    };
    let mut degraded = false;

    let cpu = optional_walk(session, &HR_PROCESSOR_LOAD, &mut degraded).await?;
    data.cpu_pct = average_load(&cpu);

    let types = optional_walk(session, &HR_STORAGE_TYPE, &mut degraded).await?;
    if !types.is_empty() {
        let sizes = optional_walk(session, &HR_STORAGE_SIZE, &mut degraded).await?;
        let used = optional_walk(session, &HR_STORAGE_USED, &mut degraded).await?;
        let storage = StorageTable::new(&types, &sizes, &used);
        data.memory_pct = storage.percent_for(&HR_STORAGE_RAM);
        data.disk_pct = storage.percent_for(&HR_STORAGE_FIXED_DISK);
    }

    let descr = optional_walk(session, &IF_DESCR, &mut degraded).await?;
    if !descr.is_empty() {
        let mut table = InterfaceTable::default();
        table.fill(&descr, |row, v| row.descr = v.as_text());
        let oper = optional_walk(session, &IF_OPER_STATUS, &mut degraded).await?;
        table.fill(&oper, |row, v| row.oper = v.as_i64());
        let speed = optional_walk(session, &IF_SPEED, &mut degraded).await?;
        table.fill(&speed, |row, v| row.speed_bps = v.as_u64());
        let phys = optional_walk(session, &IF_PHYS_ADDRESS, &mut degraded).await?;
        table.fill(&phys, |row, v| {
            row.mac = v.as_bytes().and_then(MacAddress::from_octets);
        });
        let names = optional_walk(session, &IF_NAME, &mut degraded).await?;
        table.fill(&names, |row, v| row.name = v.as_text().filter(|s| !s.is_empty()));
        let high = optional_walk(session, &IF_HIGH_SPEED, &mut degraded).await?;
        table.fill(&high, |row, v| row.high_speed_mbps = v.as_u64());
        data.ports = table.into_ports();
    }

    Ok(Collected { data, degraded })
}

/// Walk a table that an agent may not implement.
///
/// An unimplemented table walks as empty. An error response marks the
/// probe degraded; losing the agent altogether fails it.
async fn optional_walk(
    session: &mut SnmpSession,
    root: &[u32],
    degraded: &mut bool,
) -> Result<Vec<VarBind>, netvigil_proto::Error> {
    let root = Oid::from_arcs(root);
    match session.walk(&root).await {
        Ok(rows) => Ok(rows),
        Err(e) if e.is_connection_loss() || e.kind() == ErrorKind::Cancelled => Err(e),
        Err(e) => {
            debug!(peer = %session.peer(), %root, error = %e, "optional walk failed");
            *degraded = true;
            Ok(Vec::new())
        }
    }
}

fn first_line(s: String) -> String {
    match s.lines().next() {
        Some(line) if line.len() < s.len() => line.trim().to_owned(),
        _ => s,
    }
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn average_load(rows: &[VarBind]) -> Option<f64> {
    let loads: Vec<u64> = rows.iter().filter_map(|vb| vb.value.as_u64()).collect();
    if loads.is_empty() {
        return None;
    }
    let sum: u64 = loads.iter().sum();
    Some(round1(sum as f64 / loads.len() as f64))
}

// ── Storage ─────────────────────────────────────────────────────────

struct StorageTable {
    /// index → (type, size, used)
    rows: BTreeMap<u32, (Oid, u64, u64)>,
}

impl StorageTable {
    fn new(types: &[VarBind], sizes: &[VarBind], used: &[VarBind]) -> Self {
        let by_index = |rows: &[VarBind]| -> BTreeMap<u32, u64> {
            rows.iter()
                .filter_map(|vb| Some((vb.oid.last()?, vb.value.as_u64()?)))
                .collect()
        };
        let sizes = by_index(sizes);
        let used = by_index(used);
        let rows = types
            .iter()
            .filter_map(|vb| {
                let idx = vb.oid.last()?;
                let Value::ObjectId(kind) = &vb.value else {
                    return None;
                };
                Some((idx, (kind.clone(), *sizes.get(&idx)?, *used.get(&idx)?)))
            })
            .collect();
        Self { rows }
    }

    /// Used percentage summed over all rows of the given type.
    fn percent_for(&self, kind: &[u32]) -> Option<f64> {
        let prefix = Oid::from_arcs(kind);
        let (size, used) = self
            .rows
            .values()
            .filter(|(k, _, _)| k.starts_with(&prefix))
            .fold((0u64, 0u64), |(s, u), (_, size, used)| {
                (s.saturating_add(*size), u.saturating_add(*used))
            });
        percent_used(size, size.saturating_sub(used))
    }
}

// ── Interfaces ──────────────────────────────────────────────────────

#[derive(Default)]
struct IfRow {
    descr: Option<String>,
    name: Option<String>,
    oper: Option<i64>,
    speed_bps: Option<u64>,
    high_speed_mbps: Option<u64>,
    mac: Option<MacAddress>,
}

#[derive(Default)]
struct InterfaceTable {
    rows: BTreeMap<u32, IfRow>,
}

impl InterfaceTable {
    fn fill(&mut self, column: &[VarBind], mut set: impl FnMut(&mut IfRow, &Value)) {
        for vb in column {
            if let Some(idx) = vb.oid.last() {
                set(self.rows.entry(idx).or_default(), &vb.value);
            }
        }
    }

    fn into_ports(self) -> Vec<Port> {
        self.rows
            .into_iter()
            .filter_map(|(index, row)| {
                let descr = row.descr?;
                let speed = match (row.high_speed_mbps, row.speed_bps) {
                    (Some(mbps), _) if mbps > 0 => Some(mbps.saturating_mul(1_000_000)),
                    (_, Some(bps)) if bps > 0 => Some(bps),
                    _ => None,
                };
                Some(Port {
                    name: row.name.unwrap_or_else(|| descr.clone()),
                    default_name: Some(descr),
                    status: match row.oper {
                        Some(1) => PortStatus::Up,
                        Some(2 | 7) => PortStatus::Down,
                        _ => PortStatus::Unknown,
                    },
                    speed: speed.map(format_speed),
                    snmp_index: Some(index),
                    mac: row.mac,
                })
            })
            .collect()
    }
}

/// `1_000_000_000` → `"1Gbps"`, `100_000_000` → `"100Mbps"`.
pub fn format_speed(bps: u64) -> String {
    match bps {
        b if b >= 1_000_000_000 && b % 1_000_000_000 == 0 => format!("{}Gbps", b / 1_000_000_000),
        b if b >= 1_000_000 && b % 1_000_000 == 0 => format!("{}Mbps", b / 1_000_000),
        b if b >= 1_000 && b % 1_000 == 0 => format!("{}Kbps", b / 1_000),
        b => format!("{b}bps"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn vb(arcs: &[u32], index: u32, value: Value) -> VarBind {
        VarBind::new(Oid::from_arcs(arcs).child(index), value)
    }

    #[test]
    fn speeds_format() {
        assert_eq!(format_speed(1_000_000_000), "1Gbps");
        assert_eq!(format_speed(10_000_000_000), "10Gbps");
        assert_eq!(format_speed(100_000_000), "100Mbps");
        assert_eq!(format_speed(2_500_000_000), "2500Mbps");
        assert_eq!(format_speed(1500), "1500bps");
    }

    #[test]
    fn cpu_load_is_averaged() {
        let rows = vec![
            vb(&HR_PROCESSOR_LOAD, 1, Value::Integer(10)),
            vb(&HR_PROCESSOR_LOAD, 2, Value::Integer(25)),
        ];
        assert_eq!(average_load(&rows), Some(17.5));
        assert_eq!(average_load(&[]), None);
    }

    #[test]
    fn storage_split_by_type() {
        let ram = Value::ObjectId(Oid::from_arcs(&HR_STORAGE_RAM));
        let disk = Value::ObjectId(Oid::from_arcs(&HR_STORAGE_FIXED_DISK));
        let types = vec![vb(&HR_STORAGE_TYPE, 1, ram), vb(&HR_STORAGE_TYPE, 2, disk)];
        let sizes = vec![
            vb(&HR_STORAGE_SIZE, 1, Value::Integer(1000)),
            vb(&HR_STORAGE_SIZE, 2, Value::Integer(400)),
        ];
        let used = vec![
            vb(&HR_STORAGE_USED, 1, Value::Integer(600)),
            vb(&HR_STORAGE_USED, 2, Value::Integer(100)),
        ];
        let table = StorageTable::new(&types, &sizes, &used);
        assert_eq!(table.percent_for(&HR_STORAGE_RAM), Some(60.0));
        assert_eq!(table.percent_for(&HR_STORAGE_FIXED_DISK), Some(25.0));
    }

    #[test]
    fn interfaces_prefer_if_name_and_high_speed() {
        let mut table = InterfaceTable::default();
        table.fill(
            &[vb(&IF_DESCR, 3, Value::OctetString(b"sfp-sfpplus1".to_vec()))],
            |row, v| row.descr = v.as_text(),
        );
        table.fill(&[vb(&IF_NAME, 3, Value::OctetString(b"uplink".to_vec()))], |row, v| {
            row.name = v.as_text();
        });
        table.fill(&[vb(&IF_SPEED, 3, Value::Gauge32(u32::MAX))], |row, v| {
            row.speed_bps = v.as_u64();
        });
        table.fill(&[vb(&IF_HIGH_SPEED, 3, Value::Gauge32(10_000))], |row, v| {
            row.high_speed_mbps = v.as_u64();
        });
        table.fill(&[vb(&IF_OPER_STATUS, 3, Value::Integer(2))], |row, v| {
            row.oper = v.as_i64();
        });
        let ports = table.into_ports();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name, "uplink");
        assert_eq!(ports[0].default_name.as_deref(), Some("sfp-sfpplus1"));
        assert_eq!(ports[0].speed.as_deref(), Some("10Gbps"));
        assert_eq!(ports[0].status, PortStatus::Down);
        assert_eq!(ports[0].snmp_index, Some(3));
    }

    #[test]
    fn sys_descr_keeps_first_line() {
        assert_eq!(first_line("RouterOS CCR\r\nmore".into()), "RouterOS CCR");
        assert_eq!(first_line("single".into()), "single");
    }
}
