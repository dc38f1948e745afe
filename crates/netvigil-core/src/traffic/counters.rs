// ── Interface octet counters over SNMP ──

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use netvigil_proto::{
    Oid, SnmpCredentials, SnmpSession, SnmpVersion, Value, guarded, validate_address,
};

use crate::error::CoreError;

const IF_DESCR: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 2];
const IF_NAME: [u32; 11] = [1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 1];
const IF_IN_OCTETS: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 10];
const IF_OUT_OCTETS: [u32; 10] = [1, 3, 6, 1, 2, 1, 2, 2, 1, 16];
const IF_HC_IN_OCTETS: [u32; 11] = [1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 6];
const IF_HC_OUT_OCTETS: [u32; 11] = [1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 10];

/// Octet counters for one interface at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterReading {
    pub in_octets: u64,
    pub out_octets: u64,
    pub if_index: u32,
    pub timestamp: DateTime<Utc>,
}

/// Known `ifIndex` candidates, most trusted first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexHints {
    /// From the device's port record.
    pub port_index: Option<u32>,
    /// Cached on the connection by a previous cycle.
    pub cached_index: Option<u32>,
}

impl IndexHints {
    pub fn preferred(self) -> Option<u32> {
        self.port_index.or(self.cached_index)
    }
}

/// Reads interface counters from a device.
#[async_trait]
pub trait CounterSource: Send + Sync + 'static {
    async fn read_counters(
        &self,
        address: &str,
        port: &str,
        credentials: &SnmpCredentials,
        hints: IndexHints,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CounterReading, CoreError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SnmpCounterSource;

#[async_trait]
impl CounterSource for SnmpCounterSource {
    async fn read_counters(
        &self,
        address: &str,
        port: &str,
        credentials: &SnmpCredentials,
        hints: IndexHints,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CounterReading, CoreError> {
        let ip = validate_address(address)?;
        let reading = guarded(timeout, cancel, async {
            let mut session = SnmpSession::connect(ip, credentials, timeout / 2).await?;
            let if_index = match hints.preferred() {
                Some(idx) => Some(idx),
                None => resolve_index(&mut session, port).await?,
            };
            let Some(if_index) = if_index else {
                return Ok(None);
            };
            let (in_octets, out_octets) = read_octets(&mut session, if_index).await?;
            Ok::<_, netvigil_proto::Error>(Some(CounterReading {
                in_octets,
                out_octets,
                if_index,
                timestamp: Utc::now(),
            }))
        })
        .await?;
        reading.ok_or_else(|| CoreError::ValidationFailed {
            message: format!("no interface named {port:?} on {address}"),
        })
    }
}

/// Exact, case-insensitive match against `ifDescr`, then `ifName`.
async fn resolve_index(
    session: &mut SnmpSession,
    port: &str,
) -> Result<Option<u32>, netvigil_proto::Error> {
    for column in [Oid::from_arcs(&IF_DESCR), Oid::from_arcs(&IF_NAME)] {
        let rows = session.walk(&column).await?;
        let found = rows.iter().find_map(|vb| {
            let name = vb.value.as_text()?;
            if name.eq_ignore_ascii_case(port) {
                vb.oid.last()
            } else {
                None
            }
        });
        if found.is_some() {
            debug!(peer = %session.peer(), port, if_index = ?found, "resolved ifIndex by walk");
            return Ok(found);
        }
    }
    Ok(None)
}

/// 64-bit HC counters when the agent has them, else 32-bit.
async fn read_octets(
    session: &mut SnmpSession,
    if_index: u32,
) -> Result<(u64, u64), netvigil_proto::Error> {
    if session.version() != SnmpVersion::V1 {
        let hc = session
            .get(&[
                Oid::from_arcs(&IF_HC_IN_OCTETS).child(if_index),
                Oid::from_arcs(&IF_HC_OUT_OCTETS).child(if_index),
            ])
            .await?;
        if let Some(pair) = counter_pair(&hc) {
            return Ok(pair);
        }
    }
    let low = session
        .get(&[
            Oid::from_arcs(&IF_IN_OCTETS).child(if_index),
            Oid::from_arcs(&IF_OUT_OCTETS).child(if_index),
        ])
        .await?;
    counter_pair(&low).ok_or_else(|| netvigil_proto::Error::Protocol {
        message: format!("no octet counters for ifIndex {if_index}"),
    })
}

fn counter_pair(varbinds: &[netvigil_proto::VarBind]) -> Option<(u64, u64)> {
    let value = |i: usize| {
        varbinds
            .get(i)
            .map(|vb| &vb.value)
            .filter(|v| matches!(v, Value::Counter32(_) | Value::Counter64(_)))
            .and_then(Value::as_u64)
    };
    Some((value(0)?, value(1)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use netvigil_proto::VarBind;

    #[test]
    fn port_index_beats_cached_index() {
        let hints = IndexHints {
            port_index: Some(3),
            cached_index: Some(9),
        };
        assert_eq!(hints.preferred(), Some(3));
        let hints = IndexHints {
            port_index: None,
            cached_index: Some(9),
        };
        assert_eq!(hints.preferred(), Some(9));
        assert_eq!(IndexHints::default().preferred(), None);
    }

    #[test]
    fn exceptions_are_not_counters() {
        let oid = Oid::from_arcs(&IF_HC_IN_OCTETS).child(1);
        let missing = vec![
            VarBind::new(oid.clone(), Value::NoSuchInstance),
            VarBind::new(oid.clone(), Value::NoSuchInstance),
        ];
        assert_eq!(counter_pair(&missing), None);
        let present = vec![
            VarBind::new(oid.clone(), Value::Counter64(5)),
            VarBind::new(oid, Value::Counter64(7)),
        ];
        assert_eq!(counter_pair(&present), Some((5, 7)));
    }
}
