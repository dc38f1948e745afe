// ── Router session pool ──
//
// Authenticated RouterOS sessions are expensive to set up, so the engine
// keeps one per (address, port, username) and hands it to at most one
// probe at a time. The slot map sits behind a `std::sync::Mutex` that is
// never held across an `.await`; exclusivity comes from the `in_use`
// flag, which a `LeaseGuard` clears even when the probe future is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use netvigil_proto::{Command, RouterCredentials, RouterOsSession, guarded};

use crate::config::PoolConfig;
use crate::error::CoreError;

// ── Connector seam ──────────────────────────────────────────────────

/// How the pool opens, checks and closes sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    type Session: Send + 'static;

    /// Connect and authenticate.
    async fn open(
        &self,
        key: &PoolKey,
        credentials: &RouterCredentials,
        timeout: Duration,
    ) -> Result<Self::Session, netvigil_proto::Error>;

    /// Cheap command proving an idle session still works.
    async fn check_alive(&self, session: &mut Self::Session) -> Result<(), netvigil_proto::Error>;

    async fn close(&self, session: Self::Session);

    /// Whether a connection-level failure was observed on the session.
    fn is_broken(&self, session: &Self::Session) -> bool;
}

/// Opens logged-in RouterOS API sessions.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouterConnector;

#[async_trait]
impl SessionConnector for RouterConnector {
    type Session = RouterOsSession;

    async fn open(
        &self,
        key: &PoolKey,
        credentials: &RouterCredentials,
        timeout: Duration,
    ) -> Result<RouterOsSession, netvigil_proto::Error> {
        let mut session = RouterOsSession::connect(&key.address, key.port, timeout).await?;
        session
            .login(&credentials.username, &credentials.password)
            .await?;
        Ok(session)
    }

    async fn check_alive(&self, session: &mut RouterOsSession) -> Result<(), netvigil_proto::Error> {
        session
            .run(Command::new("/system/identity/print"))
            .await
            .map(|_| ())
    }

    async fn close(&self, session: RouterOsSession) {
        session.close().await;
    }

    fn is_broken(&self, session: &RouterOsSession) -> bool {
        session.is_broken()
    }
}

// ── Slots ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub address: String,
    pub port: u16,
    pub username: String,
}

impl PoolKey {
    pub fn new(address: &str, credentials: &RouterCredentials) -> Self {
        Self {
            address: address.to_owned(),
            port: credentials.port,
            username: credentials.username.clone(),
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.address, self.port)
    }
}

struct PoolEntry<S> {
    /// Present only while the slot is idle and connected.
    session: Option<S>,
    last_used: Instant,
    last_error: Option<String>,
    error_count: u32,
    is_connected: bool,
    is_connecting: bool,
    in_use: bool,
    cooldown_until: Option<Instant>,
}

impl<S> PoolEntry<S> {
    fn new() -> Self {
        Self {
            session: None,
            last_used: Instant::now(),
            last_error: None,
            error_count: 0,
            is_connected: false,
            is_connecting: false,
            in_use: false,
            cooldown_until: None,
        }
    }

    fn is_busy(&self) -> bool {
        self.in_use || self.is_connecting
    }
}

type Slots<S> = Arc<Mutex<HashMap<PoolKey, PoolEntry<S>>>>;

fn lock<S>(slots: &Slots<S>) -> std::sync::MutexGuard<'_, HashMap<PoolKey, PoolEntry<S>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Lease ───────────────────────────────────────────────────────────

/// Exclusive use of a session until handed back with
/// [`ConnectionPool::release`].
pub struct Lease<S> {
    session: S,
    guard: Option<LeaseGuard<S>>,
}

impl<S> Lease<S> {
    pub fn session(&mut self) -> &mut S {
        &mut self.session
    }

    /// Whether the session belongs to the pool (vs. a temporary one).
    pub fn is_pooled(&self) -> bool {
        self.guard.is_some()
    }
}

/// Frees the slot if a lease is dropped without being released, e.g.
/// when the probe that held it was cancelled. The session went down with
/// the lease, so the slot is left disconnected.
struct LeaseGuard<S> {
    slots: Slots<S>,
    key: PoolKey,
    armed: bool,
}

impl<S> LeaseGuard<S> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S> Drop for LeaseGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(entry) = lock(&self.slots).get_mut(&self.key) {
            entry.in_use = false;
            entry.is_connecting = false;
            entry.is_connected = false;
            entry.session = None;
            entry.last_used = Instant::now();
        }
    }
}

// ── Pool ────────────────────────────────────────────────────────────

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub entries: usize,
    pub in_use: usize,
    pub connected: usize,
}

pub struct ConnectionPool<C: SessionConnector> {
    connector: Arc<C>,
    slots: Slots<C::Session>,
    config: PoolConfig,
    enabled: AtomicBool,
}

impl<C: SessionConnector> ConnectionPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            connector: Arc::new(connector),
            slots: Arc::new(Mutex::new(HashMap::new())),
            config,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn pooling on or off. Turning it off closes idle sessions.
    pub async fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::Relaxed);
        if was && !enabled {
            info!("router session pool disabled");
            self.close_all().await;
        }
    }

    /// Get a session for `address`, waiting briefly if it is busy.
    pub async fn acquire(
        &self,
        address: &str,
        credentials: &RouterCredentials,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Lease<C::Session>, CoreError> {
        let key = PoolKey::new(address, credentials);
        if !self.is_enabled() {
            return self.open_unpooled(&key, credentials, timeout, cancel).await;
        }

        let started = Instant::now();
        let existing = loop {
            let claimed = {
                let mut slots = lock(&self.slots);
                let entry = slots.entry(key.clone()).or_insert_with(PoolEntry::new);
                if let Some(until) = entry.cooldown_until {
                    if Instant::now() < until {
                        return Err(CoreError::CoolingDown {
                            address: key.to_string(),
                        });
                    }
                    entry.cooldown_until = None;
                }
                if entry.is_busy() {
                    None
                } else {
                    entry.in_use = true;
                    Some(entry.session.take())
                }
            };
            if let Some(existing) = claimed {
                break existing;
            }
            if started.elapsed() >= self.config.busy_wait {
                debug!(%key, "pooled session busy, opening a temporary one");
                return self.open_unpooled(&key, credentials, timeout, cancel).await;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CoreError::Cancelled),
                () = tokio::time::sleep(self.config.busy_poll) => {}
            }
        };

        let guard = LeaseGuard {
            slots: Arc::clone(&self.slots),
            key: key.clone(),
            armed: true,
        };

        if let Some(mut session) = existing {
            let alive = guarded(
                self.config.liveness_timeout,
                cancel,
                self.connector.check_alive(&mut session),
            )
            .await;
            match alive {
                Ok(()) => {
                    return Ok(Lease {
                        session,
                        guard: Some(guard),
                    });
                }
                Err(netvigil_proto::Error::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) => {
                    debug!(%key, error = %e, "idle session failed liveness check, reconnecting");
                    self.connector.close(session).await;
                }
            }
        }

        self.update(&key, |entry| {
            entry.is_connected = false;
            entry.is_connecting = true;
        });
        let opened = guarded(
            timeout,
            cancel,
            self.connector.open(&key, credentials, timeout),
        )
        .await;
        match opened {
            Ok(session) => {
                self.update(&key, |entry| {
                    entry.is_connecting = false;
                    entry.is_connected = true;
                    entry.error_count = 0;
                    entry.last_error = None;
                });
                debug!(%key, "pooled session opened");
                Ok(Lease {
                    session,
                    guard: Some(guard),
                })
            }
            Err(e) => {
                let max = self.config.max_error_count;
                let cooldown = self.config.cooldown;
                let message = e.to_string();
                self.update(&key, |entry| {
                    entry.is_connecting = false;
                    entry.error_count += 1;
                    entry.last_error = Some(message);
                    if entry.error_count >= max {
                        warn!(%key, failures = entry.error_count, "cooling down after repeated connect failures");
                        entry.cooldown_until = Some(Instant::now() + cooldown);
                        entry.error_count = 0;
                    }
                });
                // Guard drop frees the slot.
                drop(guard);
                Err(e.into())
            }
        }
    }

    /// Hand a session back.
    ///
    /// `was_successful` is false when the caller saw a connection-level
    /// failure; command errors (`!trap`) leave the session reusable.
    pub async fn release(&self, lease: Lease<C::Session>, was_successful: bool) {
        let Lease { session, guard } = lease;
        let Some(guard) = guard else {
            self.connector.close(session).await;
            return;
        };

        let reusable =
            was_successful && self.is_enabled() && !self.connector.is_broken(&session);
        let leftover = {
            let mut slots = lock(&self.slots);
            match slots.get_mut(&guard.key) {
                Some(entry) if reusable => {
                    entry.session = Some(session);
                    entry.in_use = false;
                    entry.is_connected = true;
                    entry.last_used = Instant::now();
                    None
                }
                Some(entry) => {
                    entry.in_use = false;
                    entry.is_connected = false;
                    entry.last_used = Instant::now();
                    entry.last_error = Some("connection lost".into());
                    Some(session)
                }
                None => Some(session),
            }
        };
        guard.disarm();
        if let Some(session) = leftover {
            self.connector.close(session).await;
        }
    }

    /// Close idle sessions unused for longer than the idle timeout.
    pub async fn sweep(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let expired: Vec<C::Session> = {
            let mut slots = lock(&self.slots);
            let stale: Vec<PoolKey> = slots
                .iter()
                .filter(|(_, e)| !e.is_busy() && e.last_used.elapsed() > idle_timeout)
                .map(|(k, _)| k.clone())
                .collect();
            stale
                .iter()
                .filter_map(|k| slots.remove(k))
                .filter_map(|e| e.session)
                .collect()
        };
        let count = expired.len();
        for session in expired {
            self.connector.close(session).await;
        }
        if count > 0 {
            debug!(count, "closed idle router sessions");
        }
        count
    }

    /// Close every idle session and forget all slots. Leased sessions are
    /// closed when released.
    pub async fn close_all(&self) {
        let sessions: Vec<C::Session> = {
            let mut slots = lock(&self.slots);
            slots.drain().filter_map(|(_, e)| e.session).collect()
        };
        for session in sessions {
            self.connector.close(session).await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let slots = lock(&self.slots);
        PoolStats {
            entries: slots.len(),
            in_use: slots.values().filter(|e| e.in_use).count(),
            connected: slots.values().filter(|e| e.is_connected).count(),
        }
    }

    /// Last connect error recorded for `key`, if any.
    pub fn last_error(&self, key: &PoolKey) -> Option<String> {
        lock(&self.slots).get(key).and_then(|e| e.last_error.clone())
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn open_unpooled(
        &self,
        key: &PoolKey,
        credentials: &RouterCredentials,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Lease<C::Session>, CoreError> {
        let session = guarded(timeout, cancel, self.connector.open(key, credentials, timeout)).await?;
        Ok(Lease {
            session,
            guard: None,
        })
    }

    fn update(&self, key: &PoolKey, f: impl FnOnce(&mut PoolEntry<C::Session>)) {
        if let Some(entry) = lock(&self.slots).get_mut(key) {
            f(entry);
        }
    }
}

/// Run [`ConnectionPool::sweep`] on the configured interval until cancelled.
pub fn spawn_sweeper<C: SessionConnector>(
    pool: Arc<ConnectionPool<C>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(pool.config.sweep_interval);
        interval.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    pool.sweep().await;
                }
            }
        }
        pool.close_all().await;
        debug!("pool sweeper stopped");
    })
}
