// ── Probing engine ──
//
// Central facade over the adapters, the session pool, the status machine
// and the traffic engine. `start()` spawns two self-paced loops (device
// probing and link sampling) plus the pool sweeper; `stop()` cancels them
// and waits for in-flight work to drain.

mod devices;
mod traffic;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use ipnet::IpNet;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterTable, Pinger, SystemPinger};
use crate::config::{EngineSettings, PoolConfig};
use crate::error::CoreError;
use crate::model::{Device, EntityId, EventLogEntry, StatusChange};
use crate::pool::{ConnectionPool, PoolStats, RouterConnector, spawn_sweeper};
use crate::scan::{self, ScanHit};
use crate::scheduler::next_delay;
use crate::store::DeviceStore;
use crate::traffic::{CounterSource, SnmpCounterSource, TrafficHistory, TrafficPoint};

pub use traffic::TrafficReport;

const EVENT_CHANNEL_SIZE: usize = 256;

/// Whether the background loops are running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
}

/// Summary of one device-probing cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Zero-based cycle number since the engine was built.
    pub cycle: u64,
    pub detailed: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub elapsed_ms: u64,
    pub devices: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Deleted mid-cycle or interrupted by shutdown.
    pub skipped: usize,
    pub status_changes: usize,
}

/// Receives status transitions flagged for notification.
///
/// Called inline from the probing loop; implementations must not block.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, change: &StatusChange);
}

// ── Builder ─────────────────────────────────────────────────────────

pub struct EngineBuilder {
    store: Arc<dyn DeviceStore>,
    adapters: Option<AdapterTable>,
    pinger: Option<Arc<dyn Pinger>>,
    counters: Option<Arc<dyn CounterSource>>,
    pool_config: PoolConfig,
    notifier: Option<Arc<dyn Notifier>>,
}

impl EngineBuilder {
    /// Replace the production adapters. No session pool is created.
    pub fn adapters(mut self, adapters: AdapterTable) -> Self {
        self.adapters = Some(adapters);
        self
    }

    pub fn pinger(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.pinger = Some(pinger);
        self
    }

    pub fn counter_source(mut self, counters: Arc<dyn CounterSource>) -> Self {
        self.counters = Some(counters);
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> ProbingEngine {
        let pinger = self
            .pinger
            .unwrap_or_else(|| Arc::new(SystemPinger) as Arc<dyn Pinger>);
        let counters = self
            .counters
            .unwrap_or_else(|| Arc::new(SnmpCounterSource) as Arc<dyn CounterSource>);
        let (adapters, pool) = match self.adapters {
            Some(adapters) => (adapters, None),
            None => {
                let pool = Arc::new(ConnectionPool::new(RouterConnector, self.pool_config));
                let adapters = AdapterTable::standard(Arc::clone(&pool), Arc::clone(&pinger));
                (adapters, Some(pool))
            }
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (state, _) = watch::channel(EngineState::Stopped);
        let (last_cycle, _) = watch::channel(None);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        ProbingEngine {
            inner: Arc::new(EngineInner {
                store: self.store,
                adapters,
                pinger,
                counters,
                pool,
                notifier: self.notifier,
                history: TrafficHistory::default(),
                events,
                state,
                last_cycle,
                cycles: AtomicU64::new(0),
                device_cycle_lock: Mutex::new(()),
                traffic_cycle_lock: Mutex::new(()),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// Periodic health prober for every device in a [`DeviceStore`].
///
/// Cheaply cloneable via `Arc<EngineInner>`.
#[derive(Clone)]
pub struct ProbingEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: Arc<dyn DeviceStore>,
    adapters: AdapterTable,
    pinger: Arc<dyn Pinger>,
    counters: Arc<dyn CounterSource>,
    /// Present only with the production adapters.
    pool: Option<Arc<ConnectionPool<RouterConnector>>>,
    notifier: Option<Arc<dyn Notifier>>,
    history: TrafficHistory,
    events: broadcast::Sender<StatusChange>,
    state: watch::Sender<EngineState>,
    last_cycle: watch::Sender<Option<CycleReport>>,
    cycles: AtomicU64,
    /// Held for the whole of a device cycle, so cycles never overlap.
    device_cycle_lock: Mutex<()>,
    traffic_cycle_lock: Mutex<()>,
    cancel: CancellationToken,
    /// Child token for the current run; replaced on every start.
    cancel_child: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ProbingEngine {
    pub fn builder(store: Arc<dyn DeviceStore>) -> EngineBuilder {
        EngineBuilder {
            store,
            adapters: None,
            pinger: None,
            counters: None,
            pool_config: PoolConfig::default(),
            notifier: None,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the probing and traffic loops. The first cycle of each
    /// starts immediately.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            return Err(CoreError::AlreadyRunning);
        }

        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        handles.push(tokio::spawn(device_loop(self.clone(), child.clone())));
        handles.push(tokio::spawn(traffic_loop(self.clone(), child.clone())));
        if let Some(pool) = &self.inner.pool {
            handles.push(spawn_sweeper(Arc::clone(pool), child));
        }

        self.inner.state.send_replace(EngineState::Running);
        info!("probing engine started");
        Ok(())
    }

    /// Cancel the loops and wait for in-flight probes to wind down.
    ///
    /// Results of probes interrupted by the shutdown are discarded.
    pub async fn stop(&self) {
        self.inner.cancel_child.lock().await.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "engine task ended abnormally");
            }
        }

        self.inner.state.send_replace(EngineState::Stopped);
        info!("probing engine stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.inner.state.borrow() == EngineState::Running
    }

    pub fn state(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    // ── Observation ──────────────────────────────────────────────

    /// Every status transition, notified or not.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.inner.events.subscribe()
    }

    pub fn last_cycle(&self) -> watch::Receiver<Option<CycleReport>> {
        self.inner.last_cycle.subscribe()
    }

    /// Recent rate samples for a connection, oldest first.
    pub fn traffic_history(&self, connection_id: &EntityId) -> Vec<TrafficPoint> {
        self.inner.history.get(connection_id)
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.inner.pool.as_ref().map(|p| p.stats())
    }

    // ── One-off operations ───────────────────────────────────────

    /// Run one device cycle now, outside the background loop.
    ///
    /// Waits for a cycle already in flight to finish first.
    pub async fn run_cycle(&self) -> Result<CycleReport, CoreError> {
        let settings = self.settings().await;
        let cancel = self.inner.cancel.child_token();
        self.device_cycle(&settings, &cancel).await
    }

    /// Run one traffic cycle now, outside the background loop.
    pub async fn run_traffic_cycle(&self) -> Result<TrafficReport, CoreError> {
        let settings = self.settings().await;
        let cancel = self.inner.cancel.child_token();
        self.traffic_cycle(&settings, &cancel).await
    }

    /// Detailed probe of one device, bypassing the schedule.
    ///
    /// Resolves SNMP interface indexes and measures link speeds. Returns
    /// the device as stored after the result was applied.
    pub async fn probe_now(&self, device_id: &EntityId) -> Result<Device, CoreError> {
        let device = self.inner.store.get_device(device_id).await?;
        let settings = self.settings().await;
        let cancel = self.inner.cancel.child_token();
        self.probe_manually(device, &settings, &cancel).await?;
        self.inner.store.get_device(device_id).await
    }

    /// Ping every host in `range` and report the responders.
    pub async fn scan_range(&self, range: IpNet) -> Result<Vec<ScanHit>, CoreError> {
        let settings = self.settings().await;
        let cancel = self.inner.cancel.child_token();
        scan::scan_range(
            Arc::clone(&self.inner.pinger),
            range,
            settings.scan_concurrency,
            settings.ping_timeout,
            &cancel,
        )
        .await
    }

    // ── Internals ────────────────────────────────────────────────

    async fn settings(&self) -> EngineSettings {
        match self.inner.store.settings().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "cannot read engine settings, using defaults");
                EngineSettings::default()
            }
        }
    }

    /// Log, record and fan out one status transition.
    async fn emit(&self, change: StatusChange) {
        info!(
            device = %change.device_name,
            old = %change.old,
            new = %change.new,
            notify = change.notify,
            "device status changed"
        );
        if let Err(e) = self
            .inner
            .store
            .append_event(EventLogEntry::from(&change))
            .await
        {
            warn!(error = %e, "failed to append event log entry");
        }
        if change.notify {
            if let Some(notifier) = &self.inner.notifier {
                notifier.notify(&change);
            }
        }
        // No subscribers is fine.
        let _ = self.inner.events.send(change);
    }
}

// ── Background loops ────────────────────────────────────────────────

/// Self-paced: the next cycle starts `interval - elapsed` after this one
/// began, immediately if it overran.
async fn device_loop(engine: ProbingEngine, cancel: CancellationToken) {
    loop {
        let started = Instant::now();
        let settings = engine.settings().await;
        match engine.device_cycle(&settings, &cancel).await {
            Ok(_) | Err(CoreError::Cancelled) => {}
            Err(e) => warn!(error = %e, "device cycle failed"),
        }
        let delay = next_delay(settings.polling_interval, started.elapsed());
        if !pause(delay, &cancel).await {
            break;
        }
    }
    debug!("device loop stopped");
}

async fn traffic_loop(engine: ProbingEngine, cancel: CancellationToken) {
    loop {
        let started = Instant::now();
        let settings = engine.settings().await;
        match engine.traffic_cycle(&settings, &cancel).await {
            Ok(_) | Err(CoreError::Cancelled) => {}
            Err(e) => warn!(error = %e, "traffic cycle failed"),
        }
        let delay = next_delay(settings.traffic_interval, started.elapsed());
        if !pause(delay, &cancel).await {
            break;
        }
    }
    debug!("traffic loop stopped");
}

/// Take a cycle lock, giving up if `cancel` fires while waiting.
async fn exclusive<'a>(
    lock: &'a Mutex<()>,
    cancel: &CancellationToken,
) -> Result<MutexGuard<'a, ()>, CoreError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CoreError::Cancelled),
        guard = lock.lock() => Ok(guard),
    }
}

/// Sleep for `delay`; `false` if cancelled first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
