#![allow(clippy::unwrap_used)]
// Integration tests for `RouterOsSession` against a scripted TCP server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use md5::{Digest, Md5};
use secrecy::SecretString;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use netvigil_proto::routeros::{Sentence, SentenceCodec};
use netvigil_proto::{Command, Error, RouterOsSession};

// ── Helpers ─────────────────────────────────────────────────────────

/// A parsed request as the fake router sees it.
struct Request {
    path: String,
    attrs: Vec<(String, String)>,
}

impl Request {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Replies for one request, each a list of words without the tag.
type Replies = Vec<Vec<String>>;

fn words(ws: &[&str]) -> Vec<String> {
    ws.iter().map(|w| (*w).to_owned()).collect()
}

/// Serve one connection. Each request's replies get its `.tag` appended.
/// With `reverse_batches`, replies for requests that arrive together are
/// written in reverse order to exercise tag demultiplexing.
async fn spawn_router<F>(handler: F, reverse_batches: bool) -> u16
where
    F: Fn(&Request) -> Replies + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, SentenceCodec);
        let mut pending: Vec<Sentence> = Vec::new();
        loop {
            let first = tokio::time::timeout(Duration::from_millis(50), framed.next()).await;
            let sentence = match first {
                Ok(Some(Ok(s))) => s,
                Ok(_) => break,
                Err(_) => {
                    flush(&mut framed, &mut pending).await;
                    continue;
                }
            };
            let mut path = String::new();
            let mut tag = None;
            let mut attrs = Vec::new();
            for (i, w) in sentence.words().iter().enumerate() {
                if i == 0 {
                    path.clone_from(w);
                } else if let Some(t) = w.strip_prefix(".tag=") {
                    tag = Some(t.to_owned());
                } else if let Some(rest) = w.strip_prefix('=') {
                    let (k, v) = rest.split_once('=').unwrap_or((rest, ""));
                    attrs.push((k.to_owned(), v.to_owned()));
                }
            }
            if path == "/quit" {
                break;
            }
            let request = Request { path, attrs };
            let mut group = Vec::new();
            for mut reply in handler(&request) {
                if let Some(t) = &tag {
                    reply.push(format!(".tag={t}"));
                }
                group.push(Sentence(reply));
            }
            if reverse_batches && tag.is_some() {
                pending.splice(0..0, group);
            } else {
                pending.extend(group);
                flush(&mut framed, &mut pending).await;
            }
        }
    });
    port
}

async fn flush(
    framed: &mut Framed<tokio::net::TcpStream, SentenceCodec>,
    pending: &mut Vec<Sentence>,
) {
    for s in pending.drain(..) {
        if framed.send(s).await.is_err() {
            return;
        }
    }
}

fn plain_login(req: &Request) -> Option<Replies> {
    (req.path == "/login").then(|| {
        if req.attr("password") == Some("secret") {
            vec![words(&["!done"])]
        } else {
            vec![
                words(&["!trap", "=message=invalid user name or password (6)"]),
                words(&["!done"]),
            ]
        }
    })
}

async fn connect(port: u16) -> RouterOsSession {
    RouterOsSession::connect("127.0.0.1", port, Duration::from_secs(2))
        .await
        .unwrap()
}

fn password() -> SecretString {
    SecretString::from("secret".to_owned())
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn plaintext_login_then_command() {
    let port = spawn_router(
        |req| {
            plain_login(req).unwrap_or_else(|| match req.path.as_str() {
                "/system/identity/print" => vec![
                    words(&["!re", "=name=core-rtr"]),
                    words(&["!done"]),
                ],
                _ => vec![words(&["!trap", "=message=no such command"]), words(&["!done"])],
            })
        },
        false,
    )
    .await;

    let mut session = connect(port).await;
    session.login("admin", &password()).await.unwrap();
    let rows = session
        .run(Command::new("/system/identity/print"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "core-rtr");
    assert!(!session.is_broken());
}

#[tokio::test]
async fn rejected_login_is_authentication_error() {
    let port = spawn_router(|req| plain_login(req).unwrap_or_default(), false).await;
    let mut session = connect(port).await;
    let wrong = SecretString::from("nope".to_owned());
    let err = session.login("admin", &wrong).await.unwrap_err();
    assert!(
        matches!(err, Error::Authentication { ref message } if message.contains("invalid user")),
        "got {err:?}"
    );
}

#[tokio::test]
async fn legacy_challenge_login() {
    let challenge = [0x5Au8; 16];
    let mut hasher = Md5::new();
    hasher.update([0u8]);
    hasher.update(b"secret");
    hasher.update(challenge);
    let expected = format!("00{}", hex::encode(hasher.finalize()));
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);

    let port = spawn_router(
        move |req| {
            if req.path != "/login" {
                return vec![words(&["!done"])];
            }
            seen.fetch_add(1, Ordering::SeqCst);
            match req.attr("response") {
                None => vec![words(&["!done", &format!("=ret={}", hex::encode(challenge))])],
                Some(r) if r == expected => vec![words(&["!done"])],
                Some(_) => vec![
                    words(&["!trap", "=message=cannot log in"]),
                    words(&["!done"]),
                ],
            }
        },
        false,
    )
    .await;

    let mut session = connect(port).await;
    session.login("admin", &password()).await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

// ── Pipelining ──────────────────────────────────────────────────────

#[tokio::test]
async fn batch_replies_are_demultiplexed_by_tag() {
    let port = spawn_router(
        |req| {
            plain_login(req).unwrap_or_else(|| match req.path.as_str() {
                "/system/identity/print" => {
                    vec![words(&["!re", "=name=edge"]), words(&["!done"])]
                }
                "/system/resource/print" => vec![
                    words(&["!re", "=cpu-load=17", "=total-memory=1000", "=free-memory=250"]),
                    words(&["!done"]),
                ],
                "/interface/print" => vec![
                    words(&["!re", "=name=ether1", "=running=true"]),
                    words(&["!re", "=name=ether2", "=running=false"]),
                    words(&["!done"]),
                ],
                _ => vec![words(&["!done"])],
            })
        },
        true,
    )
    .await;

    let mut session = connect(port).await;
    session.login("admin", &password()).await.unwrap();
    let results = session
        .run_batch(vec![
            Command::new("/system/identity/print"),
            Command::new("/system/resource/print"),
            Command::new("/interface/print"),
        ])
        .await
        .unwrap();

    let identity = results[0].as_ref().unwrap();
    let resource = results[1].as_ref().unwrap();
    let interfaces = results[2].as_ref().unwrap();
    assert_eq!(identity[0]["name"], "edge");
    assert_eq!(resource[0]["cpu-load"], "17");
    assert_eq!(interfaces.len(), 2);
    assert_eq!(interfaces[1]["name"], "ether2");
}

#[tokio::test]
async fn trap_fails_only_its_command() {
    let port = spawn_router(
        |req| {
            plain_login(req).unwrap_or_else(|| match req.path.as_str() {
                "/interface/ethernet/monitor" => vec![
                    words(&["!trap", "=message=no such item"]),
                    words(&["!done"]),
                ],
                _ => vec![words(&["!re", "=name=x"]), words(&["!done"])],
            })
        },
        false,
    )
    .await;

    let mut session = connect(port).await;
    session.login("admin", &password()).await.unwrap();
    let results = session
        .run_batch(vec![
            Command::new("/interface/ethernet/monitor")
                .attr("numbers", "sfp1")
                .attr("once", ""),
            Command::new("/system/identity/print"),
        ])
        .await
        .unwrap();

    assert!(matches!(results[0], Err(Error::Trap { .. })));
    assert!(results[1].is_ok());
    assert!(!session.is_broken());
}

// ── Connection loss ─────────────────────────────────────────────────

#[tokio::test]
async fn peer_close_marks_session_broken() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let mut session = connect(port).await;
    let err = session
        .run(Command::new("/system/identity/print"))
        .await
        .unwrap_err();
    assert!(err.is_connection_loss(), "got {err:?}");
    assert!(session.is_broken());
}

#[tokio::test]
async fn refused_connection_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = RouterOsSession::connect("127.0.0.1", port, Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connect { .. }), "got {err:?}");
}
