// SNMP session over a connected UDP socket.
//
// v1/v2c messages carry the community in clear. v3 sessions discover the
// agent's engine on connect, localize keys to it, and resynchronise once
// when the agent reports the request fell outside its time window.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::oid::Oid;
use super::pdu::{
    self, NO_SUCH_NAME, Pdu, PduType, VarBind, decode_community_message,
    encode_community_message,
};
use super::usm::{
    self, DecodedMessage, FLAG_AUTH, LocalizedKeys, ReportKind, ScopedPdu, SecurityParams,
};
use super::value::Value;
use crate::credentials::{SnmpCredentials, SnmpVersion, UsmCredentials};
use crate::error::Error;

/// Walks stop after this many rows even if the agent keeps answering.
const MAX_WALK_ROWS: usize = 10_000;

const RECV_BUFFER: usize = 65_535;

/// Resends after the first attempt times out.
const RETRIES: u32 = 1;

#[derive(Debug)]
struct EngineClock {
    id: Vec<u8>,
    boots: u32,
    time: u32,
    synced_at: Instant,
}

impl EngineClock {
    fn from_params(params: &SecurityParams) -> Self {
        Self {
            id: params.engine_id.clone(),
            boots: params.boots,
            time: params.time,
            synced_at: Instant::now(),
        }
    }

    /// Agent time now, extrapolated from the last sync.
    fn estimated_time(&self) -> u32 {
        let elapsed = u32::try_from(self.synced_at.elapsed().as_secs()).unwrap_or(u32::MAX);
        self.time.saturating_add(elapsed)
    }
}

#[derive(Debug)]
struct V3State {
    usm: UsmCredentials,
    engine: Option<EngineClock>,
    keys: Option<LocalizedKeys>,
    next_msg_id: i32,
    salt: u64,
}

/// One SNMP agent endpoint.
#[derive(Debug)]
pub struct SnmpSession {
    socket: UdpSocket,
    peer: SocketAddr,
    version: SnmpVersion,
    community: SecretString,
    v3: Option<V3State>,
    next_request_id: i32,
    attempt_timeout: Duration,
}

impl SnmpSession {
    /// Bind a local socket and, for v3, discover the agent's engine.
    pub async fn connect(
        host: IpAddr,
        credentials: &SnmpCredentials,
        attempt_timeout: Duration,
    ) -> Result<Self, Error> {
        let peer = SocketAddr::new(host, credentials.port);
        let local = match host {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await.map_err(|e| Error::Connect {
            address: peer.to_string(),
            reason: e.to_string(),
        })?;

        let v3 = match credentials.version {
            SnmpVersion::V3 => {
                let usm = credentials.usm.clone().ok_or_else(|| {
                    Error::InvalidCredentials("SNMPv3 requires a USM user".into())
                })?;
                Some(V3State {
                    usm,
                    engine: None,
                    keys: None,
                    next_msg_id: initial_id(),
                    salt: rand::random(),
                })
            }
            SnmpVersion::V1 | SnmpVersion::V2c => None,
        };

        let mut session = Self {
            socket,
            peer,
            version: credentials.version,
            community: credentials.community.clone(),
            v3,
            next_request_id: initial_id(),
            attempt_timeout,
        };
        if session.v3.is_some() {
            session.discover().await?;
        }
        debug!(peer = %session.peer, version = %session.version, "SNMP session ready");
        Ok(session)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn version(&self) -> SnmpVersion {
        self.version
    }

    // ── Operations ───────────────────────────────────────────────────

    /// `GetRequest` for every OID in one PDU.
    pub async fn get(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, Error> {
        let pdu = Pdu::new(PduType::Get, self.bump_request_id(), requests(oids));
        Ok(self.exchange(pdu).await?.varbinds)
    }

    pub async fn get_next(&mut self, oids: &[Oid]) -> Result<Vec<VarBind>, Error> {
        let pdu = Pdu::new(PduType::GetNext, self.bump_request_id(), requests(oids));
        Ok(self.exchange(pdu).await?.varbinds)
    }

    /// `GetBulkRequest`. Not available on v1.
    pub async fn get_bulk(
        &mut self,
        non_repeaters: i64,
        max_repetitions: i64,
        oids: &[Oid],
    ) -> Result<Vec<VarBind>, Error> {
        if self.version == SnmpVersion::V1 {
            return Err(Error::protocol("GetBulk is not supported by SNMPv1"));
        }
        let pdu = Pdu::get_bulk(
            self.bump_request_id(),
            non_repeaters,
            max_repetitions,
            requests(oids),
        );
        Ok(self.exchange(pdu).await?.varbinds)
    }

    /// Walk the subtree under `root`, one row per request.
    ///
    /// Ends at `endOfMibView`, when the agent leaves the subtree, or on a
    /// v1 `noSuchName`. An agent that returns a non-increasing OID is a
    /// protocol error.
    pub async fn walk(&mut self, root: &Oid) -> Result<Vec<VarBind>, Error> {
        let mut current = root.clone();
        let mut rows = Vec::new();
        loop {
            let step = if self.version == SnmpVersion::V1 {
                self.get_next(std::slice::from_ref(&current)).await
            } else {
                self.get_bulk(0, 1, std::slice::from_ref(&current)).await
            };
            let varbinds = match step {
                Ok(v) => v,
                Err(Error::SnmpStatus { status, .. }) if status == NO_SUCH_NAME => break,
                Err(e) => return Err(e),
            };
            let Some(vb) = varbinds.into_iter().next() else {
                break;
            };
            if vb.value.is_exception() || !vb.oid.starts_with(root) {
                break;
            }
            if vb.oid <= current {
                return Err(Error::protocol(format!(
                    "agent returned non-increasing OID {} after {current}",
                    vb.oid
                )));
            }
            current = vb.oid.clone();
            rows.push(vb);
            if rows.len() >= MAX_WALK_ROWS {
                warn!(peer = %self.peer, %root, "walk truncated at row limit");
                break;
            }
        }
        trace!(peer = %self.peer, %root, rows = rows.len(), "walk complete");
        Ok(rows)
    }

    // ── Exchange ─────────────────────────────────────────────────────

    async fn exchange(&mut self, pdu: Pdu) -> Result<Pdu, Error> {
        let response = if self.v3.is_some() {
            self.exchange_v3(pdu).await?
        } else {
            self.exchange_community(pdu).await?
        };
        if response.error_status != 0 {
            return Err(Error::SnmpStatus {
                status: response.error_status,
                index: response.error_index,
            });
        }
        Ok(response)
    }

    async fn exchange_community(&mut self, pdu: Pdu) -> Result<Pdu, Error> {
        let bytes = encode_community_message(
            self.version,
            self.community.expose_secret().as_bytes(),
            &pdu,
        );
        let request_id = pdu.request_id;
        transact(&self.socket, self.attempt_timeout, RETRIES, &bytes, |datagram| {
            if pdu::message_version(datagram).is_ok_and(|v| v == 3) {
                return Ok(None);
            }
            match decode_community_message(datagram) {
                Ok(msg) if msg.pdu.request_id == request_id && msg.pdu.kind == PduType::Response => {
                    Ok(Some(msg.pdu))
                }
                Ok(msg) => {
                    trace!(got = msg.pdu.request_id, want = request_id, "stale response ignored");
                    Ok(None)
                }
                Err(e) => {
                    trace!(error = %e, "undecodable datagram ignored");
                    Ok(None)
                }
            }
        })
        .await
    }

    async fn exchange_v3(&mut self, pdu: Pdu) -> Result<Pdu, Error> {
        let mut resynced = false;
        loop {
            let msg = self.send_v3(pdu.clone()).await?;
            if msg.is_report() {
                let kind = ReportKind::classify(&msg.scoped.pdu);
                match kind {
                    ReportKind::NotInTimeWindow if !resynced => {
                        debug!(peer = %self.peer, "engine clock resync");
                        self.sync_clock(&msg.params);
                        resynced = true;
                        continue;
                    }
                    ReportKind::UnknownEngineId if !resynced => {
                        debug!(peer = %self.peer, "engine id changed, rediscovering");
                        self.discover().await?;
                        resynced = true;
                        continue;
                    }
                    ReportKind::UnsupportedSecLevel
                    | ReportKind::UnknownUserName
                    | ReportKind::WrongDigest
                    | ReportKind::DecryptionError
                    | ReportKind::NotInTimeWindow
                    | ReportKind::UnknownEngineId => {
                        return Err(Error::Authentication {
                            message: kind.describe().into(),
                        });
                    }
                    ReportKind::Other => {
                        return Err(Error::protocol("agent answered with an unknown report"));
                    }
                }
            }

            let authenticated = self
                .v3
                .as_ref()
                .and_then(|s| s.keys.as_ref())
                .is_some_and(|k| k.flags() & FLAG_AUTH != 0);
            if authenticated && msg.flags & FLAG_AUTH == 0 {
                return Err(Error::Authentication {
                    message: "unauthenticated response to an authenticated request".into(),
                });
            }
            if msg.scoped.pdu.request_id != pdu.request_id {
                return Err(Error::protocol("response request-id mismatch"));
            }
            self.sync_clock(&msg.params);
            return Ok(msg.scoped.pdu);
        }
    }

    async fn send_v3(&mut self, pdu: Pdu) -> Result<DecodedMessage, Error> {
        let Some(state) = self.v3.as_mut() else {
            return Err(Error::protocol("session is not SNMPv3"));
        };
        let Some(engine) = state.engine.as_ref() else {
            return Err(Error::protocol("SNMPv3 engine not discovered"));
        };
        let msg_id = bump(&mut state.next_msg_id);
        state.salt = state.salt.wrapping_add(1);
        let params = SecurityParams {
            engine_id: engine.id.clone(),
            boots: engine.boots,
            time: engine.estimated_time(),
            username: state.usm.username.as_bytes().to_vec(),
            ..SecurityParams::default()
        };
        let scoped = ScopedPdu {
            context_engine_id: engine.id.clone(),
            context_name: Vec::new(),
            pdu,
        };
        let bytes = usm::encode_message(
            msg_id,
            true,
            &params,
            state.keys.as_ref(),
            state.salt,
            &scoped,
        )?;
        let keys = state.keys.as_ref();
        transact(&self.socket, self.attempt_timeout, RETRIES, &bytes, |datagram| {
            accept_v3(datagram, msg_id, keys)
        })
        .await
    }

    /// Learn the agent's engine id, boots and time from a report.
    async fn discover(&mut self) -> Result<(), Error> {
        let request_id = self.bump_request_id();
        let Some(state) = self.v3.as_mut() else {
            return Ok(());
        };
        let msg_id = bump(&mut state.next_msg_id);
        let scoped = ScopedPdu {
            context_engine_id: Vec::new(),
            context_name: Vec::new(),
            pdu: Pdu::new(PduType::Get, request_id, Vec::new()),
        };
        let bytes =
            usm::encode_message(msg_id, true, &SecurityParams::default(), None, 0, &scoped)?;
        let msg = transact(&self.socket, self.attempt_timeout, RETRIES, &bytes, |datagram| {
            accept_v3(datagram, msg_id, None)
        })
        .await?;

        if msg.params.engine_id.is_empty() {
            return Err(Error::protocol("engine discovery returned no engine id"));
        }
        state.keys = if state.usm.auth.is_some() {
            Some(LocalizedKeys::derive(&state.usm, &msg.params.engine_id)?)
        } else {
            None
        };
        state.engine = Some(EngineClock::from_params(&msg.params));
        debug!(
            peer = %self.peer,
            engine = %hex::encode(&msg.params.engine_id),
            boots = msg.params.boots,
            "SNMPv3 engine discovered"
        );
        Ok(())
    }

    fn sync_clock(&mut self, params: &SecurityParams) {
        let Some(state) = self.v3.as_mut() else {
            return;
        };
        if let Some(engine) = state.engine.as_mut() {
            if !params.engine_id.is_empty() && params.engine_id == engine.id {
                engine.boots = params.boots;
                engine.time = params.time;
                engine.synced_at = Instant::now();
            }
        }
    }

    fn bump_request_id(&mut self) -> i32 {
        bump(&mut self.next_request_id)
    }
}

fn requests(oids: &[Oid]) -> Vec<VarBind> {
    oids.iter().cloned().map(VarBind::request).collect()
}

fn initial_id() -> i32 {
    i32::try_from(rand::random::<u32>() >> 1).unwrap_or(1).max(1)
}

fn bump(counter: &mut i32) -> i32 {
    let id = *counter;
    *counter = if id == i32::MAX { 1 } else { id + 1 };
    id
}

fn accept_v3(
    datagram: &[u8],
    msg_id: i32,
    keys: Option<&LocalizedKeys>,
) -> Result<Option<DecodedMessage>, Error> {
    match usm::decode_message(datagram, keys) {
        Ok(msg) if msg.msg_id == msg_id => Ok(Some(msg)),
        Ok(msg) => {
            trace!(got = msg.msg_id, want = msg_id, "stale v3 message ignored");
            Ok(None)
        }
        Err(e @ Error::Authentication { .. }) => Err(e),
        Err(e) => {
            trace!(error = %e, "undecodable datagram ignored");
            Ok(None)
        }
    }
}

/// Send `request`, then wait for a datagram `accept` recognises.
/// Each attempt gets `attempt_timeout`; the request is resent `retries` times.
async fn transact<T>(
    socket: &UdpSocket,
    attempt_timeout: Duration,
    retries: u32,
    request: &[u8],
    mut accept: impl FnMut(&[u8]) -> Result<Option<T>, Error>,
) -> Result<T, Error> {
    let mut buf = vec![0u8; RECV_BUFFER];
    for attempt in 0..=retries {
        if attempt > 0 {
            trace!(attempt, "resending SNMP request");
        }
        socket.send(request).await?;
        let deadline = Instant::now() + attempt_timeout;
        loop {
            let n = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                Err(_) => break,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    return Err(Error::Connect {
                        address: socket
                            .peer_addr()
                            .map_or_else(|_| "unknown".into(), |a| a.to_string()),
                        reason: "port unreachable".into(),
                    });
                }
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(n)) => n,
            };
            if let Some(found) = accept(&buf[..n])? {
                return Ok(found);
            }
        }
    }
    Err(Error::Timeout(attempt_timeout))
}

/// Convenience for callers that want a single scalar.
pub fn first_value(varbinds: &[VarBind]) -> Option<&Value> {
    varbinds
        .first()
        .map(|vb| &vb.value)
        .filter(|v| !v.is_exception())
}
