#![allow(clippy::unwrap_used)]
// Integration tests for `SnmpSession` against a fake agent on a local UDP socket.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::net::UdpSocket;

use netvigil_proto::snmp::{
    NO_SUCH_NAME, Pdu, PduType, decode_community_message, encode_community_message,
};
use netvigil_proto::{Error, Oid, SnmpCredentials, SnmpSession, SnmpVersion, Value, VarBind};

// ── Helpers ─────────────────────────────────────────────────────────

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn oid(s: &str) -> Oid {
    s.parse().unwrap()
}

/// Start an agent that answers each decoded request with whatever PDUs
/// `handler` returns (none = drop the request).
async fn spawn_scripted<F>(community: &'static str, mut handler: F) -> u16
where
    F: FnMut(SnmpVersion, Pdu) -> Vec<Pdu> + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(msg) = decode_community_message(&buf[..n]) else {
                continue;
            };
            if msg.community != community.as_bytes() {
                continue;
            }
            for pdu in handler(msg.version, msg.pdu) {
                let bytes = encode_community_message(msg.version, community.as_bytes(), &pdu);
                let _ = socket.send_to(&bytes, from).await;
            }
        }
    });
    port
}

/// A well-behaved agent serving a fixed MIB view.
async fn spawn_table(table: BTreeMap<Oid, Value>) -> u16 {
    spawn_scripted("public", move |version, req| {
        vec![answer(&table, version, &req)]
    })
    .await
}

fn answer(table: &BTreeMap<Oid, Value>, version: SnmpVersion, req: &Pdu) -> Pdu {
    let mut resp = Pdu::new(PduType::Response, req.request_id, Vec::new());
    for (i, vb) in req.varbinds.iter().enumerate() {
        let found = match req.kind {
            PduType::Get => table
                .get(&vb.oid)
                .map(|v| VarBind::new(vb.oid.clone(), v.clone())),
            _ => table
                .range((Bound::Excluded(vb.oid.clone()), Bound::Unbounded))
                .next()
                .map(|(k, v)| VarBind::new(k.clone(), v.clone())),
        };
        match (found, version) {
            (Some(b), _) => resp.varbinds.push(b),
            (None, SnmpVersion::V1) => {
                resp.error_status = NO_SUCH_NAME;
                resp.error_index = i64::try_from(i + 1).unwrap();
                resp.varbinds = req.varbinds.clone();
                return resp;
            }
            (None, _) => {
                let exception = if req.kind == PduType::Get {
                    Value::NoSuchObject
                } else {
                    Value::EndOfMibView
                };
                resp.varbinds.push(VarBind::new(vb.oid.clone(), exception));
            }
        }
    }
    resp
}

fn if_table() -> BTreeMap<Oid, Value> {
    let mut t = BTreeMap::new();
    t.insert(oid("1.3.6.1.2.1.1.1.0"), Value::OctetString(b"RouterOS CCR".to_vec()));
    t.insert(oid("1.3.6.1.2.1.1.3.0"), Value::TimeTicks(360_000));
    t.insert(oid("1.3.6.1.2.1.1.5.0"), Value::OctetString(b"core".to_vec()));
    for (idx, name) in [(1, "ether1"), (2, "ether2"), (12, "sfp-plus1")] {
        t.insert(
            oid(&format!("1.3.6.1.2.1.2.2.1.2.{idx}")),
            Value::OctetString(name.as_bytes().to_vec()),
        );
        t.insert(oid(&format!("1.3.6.1.2.1.2.2.1.8.{idx}")), Value::Integer(1));
    }
    t
}

fn creds(version: SnmpVersion, port: u16) -> SnmpCredentials {
    SnmpCredentials {
        version,
        port,
        ..SnmpCredentials::default()
    }
}

async fn session(version: SnmpVersion, port: u16) -> SnmpSession {
    SnmpSession::connect(LOCALHOST, &creds(version, port), Duration::from_millis(300))
        .await
        .unwrap()
}

// ── Get ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn get_returns_values_in_request_order() {
    let port = spawn_table(if_table()).await;
    let mut s = session(SnmpVersion::V2c, port).await;
    let vbs = s
        .get(&[oid("1.3.6.1.2.1.1.5.0"), oid("1.3.6.1.2.1.1.3.0")])
        .await
        .unwrap();
    assert_eq!(vbs[0].value.as_text().as_deref(), Some("core"));
    assert_eq!(vbs[1].value, Value::TimeTicks(360_000));
}

#[tokio::test]
async fn missing_object_is_exception_not_error() {
    let port = spawn_table(if_table()).await;
    let mut s = session(SnmpVersion::V2c, port).await;
    let vbs = s.get(&[oid("1.3.6.1.2.1.1.6.0")]).await.unwrap();
    assert_eq!(vbs[0].value, Value::NoSuchObject);
}

// ── Walk ────────────────────────────────────────────────────────────

#[tokio::test]
async fn walk_stops_at_subtree_boundary() {
    let port = spawn_table(if_table()).await;
    let mut s = session(SnmpVersion::V2c, port).await;
    let rows = s.walk(&oid("1.3.6.1.2.1.2.2.1.2")).await.unwrap();
    let names: Vec<_> = rows.iter().map(|vb| vb.value.as_text().unwrap()).collect();
    assert_eq!(names, vec!["ether1", "ether2", "sfp-plus1"]);
    assert_eq!(rows[2].oid.last(), Some(12));
}

#[tokio::test]
async fn walk_ends_cleanly_at_end_of_mib_view() {
    let port = spawn_table(if_table()).await;
    let mut s = session(SnmpVersion::V2c, port).await;
    let rows = s.walk(&oid("1.3.6.1.2.1.2.2.1.8")).await.unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn v1_walk_ends_on_no_such_name() {
    let port = spawn_table(if_table()).await;
    let mut s = session(SnmpVersion::V1, port).await;
    let rows = s.walk(&oid("1.3.6.1.2.1.2.2.1.8")).await.unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn walk_rejects_non_increasing_oid() {
    let port = spawn_scripted("public", |_, req| {
        let mut resp = Pdu::new(PduType::Response, req.request_id, Vec::new());
        resp.varbinds.push(VarBind::new(
            oid("1.3.6.1.2.1.2.2.1.2.1"),
            Value::OctetString(b"loop".to_vec()),
        ));
        vec![resp]
    })
    .await;
    let mut s = session(SnmpVersion::V2c, port).await;
    let err = s.walk(&oid("1.3.6.1.2.1.2.2.1.2")).await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }), "got {err:?}");
}

#[tokio::test]
async fn walk_uses_single_repetition_bulk() {
    let table = if_table();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let port = spawn_scripted("public", move |version, req| {
        assert_eq!(req.kind, PduType::GetBulk);
        assert_eq!(req.error_index, 1, "max-repetitions");
        counter.fetch_add(1, Ordering::SeqCst);
        vec![answer(&table, version, &req)]
    })
    .await;
    let mut s = session(SnmpVersion::V2c, port).await;
    let rows = s.walk(&oid("1.3.6.1.2.1.2.2.1.2")).await.unwrap();
    assert_eq!(rows.len(), 3);
    // One request per row plus the one that leaves the subtree.
    assert_eq!(seen.load(Ordering::SeqCst), 4);
}

// ── Transport ───────────────────────────────────────────────────────

#[tokio::test]
async fn stale_response_is_ignored() {
    let table = if_table();
    let port = spawn_scripted("public", move |version, req| {
        let mut stale = answer(&table, version, &req);
        stale.request_id = req.request_id.wrapping_sub(1);
        stale.varbinds[0].value = Value::OctetString(b"stale".to_vec());
        vec![stale, answer(&table, version, &req)]
    })
    .await;
    let mut s = session(SnmpVersion::V2c, port).await;
    let vbs = s.get(&[oid("1.3.6.1.2.1.1.5.0")]).await.unwrap();
    assert_eq!(vbs[0].value.as_text().as_deref(), Some("core"));
}

#[tokio::test]
async fn dropped_request_is_retransmitted() {
    let table = if_table();
    let mut calls = 0;
    let port = spawn_scripted("public", move |version, req| {
        calls += 1;
        if calls == 1 {
            Vec::new()
        } else {
            vec![answer(&table, version, &req)]
        }
    })
    .await;
    let mut s = session(SnmpVersion::V2c, port).await;
    let vbs = s.get(&[oid("1.3.6.1.2.1.1.1.0")]).await.unwrap();
    assert_eq!(vbs[0].value.as_text().as_deref(), Some("RouterOS CCR"));
}

#[tokio::test]
async fn wrong_community_times_out() {
    let port = spawn_scripted("private", |_, req| {
        vec![Pdu::new(PduType::Response, req.request_id, Vec::new())]
    })
    .await;
    let mut s = session(SnmpVersion::V2c, port).await;
    let err = s.get(&[oid("1.3.6.1.2.1.1.1.0")]).await.unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");
}

#[tokio::test]
async fn error_status_surfaces() {
    let port = spawn_scripted("public", |_, req| {
        let mut resp = Pdu::new(PduType::Response, req.request_id, req.varbinds.clone());
        resp.error_status = 5;
        resp.error_index = 1;
        vec![resp]
    })
    .await;
    let mut s = session(SnmpVersion::V2c, port).await;
    let err = s.get(&[oid("1.3.6.1.2.1.1.1.0")]).await.unwrap_err();
    assert!(matches!(err, Error::SnmpStatus { status: 5, index: 1 }));
}

#[tokio::test]
async fn v3_without_user_is_rejected_before_io() {
    let mut c = creds(SnmpVersion::V3, 161);
    c.usm = None;
    let err = SnmpSession::connect(LOCALHOST, &c, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidCredentials(_)));
}
