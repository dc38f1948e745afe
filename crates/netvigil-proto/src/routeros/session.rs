// RouterOS API session
//
// One authenticated TCP session to a router's API port. Commands can be
// pipelined: `run_batch` tags each command, writes them all, then
// demultiplexes the interleaved replies by tag. Connection-level failures
// mark the session broken so the pool never hands it out again.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use md5::{Digest, Md5};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use super::codec::{Command, Reply, ReplyKind, Row, Sentence, SentenceCodec};
use crate::error::Error;

/// An authenticated (or about-to-be) RouterOS API session.
#[derive(Debug)]
pub struct RouterOsSession {
    framed: Framed<TcpStream, SentenceCodec>,
    address: String,
    next_tag: u32,
    broken: bool,
}

impl RouterOsSession {
    /// Open a TCP connection to `host:port`. Does not log in.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, Error> {
        let address = format!("{host}:{port}");
        debug!(%address, "opening RouterOS API connection");
        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(Error::Connect {
                    address,
                    reason: e.to_string(),
                });
            }
            Err(_) => return Err(Error::Timeout(timeout)),
        };
        let _ = stream.set_nodelay(true);
        Ok(Self {
            framed: Framed::new(stream, SentenceCodec),
            address,
            next_tag: 1,
            broken: false,
        })
    }

    /// `host:port` this session is connected to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether a connection-level failure has been observed.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Log in with the post-6.43 plaintext method, falling back to the
    /// legacy MD5 challenge when the router answers with `=ret=`.
    pub async fn login(&mut self, username: &str, password: &SecretString) -> Result<(), Error> {
        let cmd = Command::new("/login")
            .attr("name", username)
            .attr("password", password.expose_secret());
        let rows = self.login_exchange(cmd).await?;

        let Some(challenge) = rows.get("ret") else {
            debug!(address = %self.address, "login accepted");
            return Ok(());
        };

        trace!("router requested challenge-response login");
        let challenge = hex::decode(challenge)
            .map_err(|e| Error::protocol(format!("bad login challenge: {e}")))?;
        let response = challenge_response(password.expose_secret(), &challenge);
        let cmd = Command::new("/login")
            .attr("name", username)
            .attr("response", response);
        self.login_exchange(cmd).await?;
        debug!(address = %self.address, "legacy login accepted");
        Ok(())
    }

    async fn login_exchange(&mut self, cmd: Command) -> Result<Row, Error> {
        self.send(cmd.into_sentence(None)).await?;
        let mut attrs = Row::new();
        loop {
            let reply = self.recv().await?;
            match reply.kind {
                ReplyKind::Done => {
                    attrs.extend(reply.attributes);
                    return Ok(attrs);
                }
                ReplyKind::Trap => {
                    // Drain the trailing !done so the session stays in sync.
                    let message = reply.message();
                    let _ = self.recv().await;
                    return Err(Error::Authentication { message });
                }
                ReplyKind::Fatal => {
                    self.broken = true;
                    return Err(Error::Authentication {
                        message: reply.message(),
                    });
                }
                ReplyKind::Re | ReplyKind::Empty => attrs.extend(reply.attributes),
            }
        }
    }

    /// Run a single command and collect its `!re` rows.
    pub async fn run(&mut self, cmd: Command) -> Result<Vec<Row>, Error> {
        let mut results = self.run_batch(vec![cmd]).await?;
        results
            .pop()
            .unwrap_or_else(|| Err(Error::protocol("missing command result")))
    }

    /// Pipeline several commands on this session.
    ///
    /// The outer `Result` fails only on connection loss or framing errors;
    /// each inner `Result` carries that command's rows or its `!trap`.
    pub async fn run_batch(
        &mut self,
        cmds: Vec<Command>,
    ) -> Result<Vec<Result<Vec<Row>, Error>>, Error> {
        let mut pending: HashMap<String, usize> = HashMap::with_capacity(cmds.len());
        let mut rows: Vec<Vec<Row>> = vec![Vec::new(); cmds.len()];
        let mut traps: Vec<Option<Error>> = (0..cmds.len()).map(|_| None).collect();
        let paths: Vec<String> = cmds.iter().map(|c| c.path().to_owned()).collect();

        for (idx, cmd) in cmds.into_iter().enumerate() {
            let tag = self.next_tag;
            self.next_tag = self.next_tag.wrapping_add(1);
            pending.insert(tag.to_string(), idx);
            trace!(tag, path = cmd.path(), "queue command");
            self.feed(cmd.into_sentence(Some(tag))).await?;
        }
        self.flush().await?;

        while !pending.is_empty() {
            let reply = self.recv().await?;
            if reply.kind == ReplyKind::Fatal {
                self.broken = true;
                return Err(Error::ConnectionLost(reply.message()));
            }
            let Some(idx) = reply.tag.as_ref().and_then(|t| pending.get(t)).copied() else {
                trace!(?reply.tag, "reply for unknown tag ignored");
                continue;
            };
            match reply.kind {
                ReplyKind::Re => rows[idx].push(reply.attributes),
                ReplyKind::Trap => {
                    traps[idx] = Some(Error::Trap {
                        command: paths[idx].clone(),
                        message: reply.message(),
                    });
                }
                ReplyKind::Done | ReplyKind::Empty => {
                    if let Some(tag) = reply.tag {
                        pending.remove(&tag);
                    }
                }
                ReplyKind::Fatal => {}
            }
        }

        Ok(rows
            .into_iter()
            .zip(traps)
            .map(|(r, trap)| match trap {
                Some(err) => Err(err),
                None => Ok(r),
            })
            .collect())
    }

    /// Best-effort `/quit`, then close the socket.
    pub async fn close(mut self) {
        if !self.broken {
            let _ = tokio::time::timeout(
                Duration::from_millis(500),
                self.send(Command::new("/quit").into_sentence(None)),
            )
            .await;
        }
        debug!(address = %self.address, "RouterOS session closed");
    }

    // ── Transport helpers ────────────────────────────────────────────

    async fn send(&mut self, sentence: Sentence) -> Result<(), Error> {
        let res = self.framed.send(sentence).await;
        self.track(res)
    }

    async fn feed(&mut self, sentence: Sentence) -> Result<(), Error> {
        let res = self.framed.feed(sentence).await;
        self.track(res)
    }

    async fn flush(&mut self) -> Result<(), Error> {
        let res = self.framed.flush().await;
        self.track(res)
    }

    async fn recv(&mut self) -> Result<Reply, Error> {
        match self.framed.next().await {
            Some(Ok(sentence)) => Reply::try_from(sentence),
            Some(Err(e)) => {
                self.broken = true;
                Err(e)
            }
            None => {
                self.broken = true;
                Err(Error::ConnectionLost("closed by peer".into()))
            }
        }
    }

    fn track<T>(&mut self, res: Result<T, Error>) -> Result<T, Error> {
        if let Err(ref e) = res {
            if e.is_connection_loss() || matches!(e, Error::Io(_)) {
                self.broken = true;
            }
        }
        res
    }
}

/// `"00" + hex(md5(0x00 ++ password ++ challenge))`
fn challenge_response(password: &str, challenge: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    hasher.update(challenge);
    format!("00{}", hex::encode(hasher.finalize()))
}
