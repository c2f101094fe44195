//! Variable store and the background monitoring worker

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::backoff::{Backoff, BackoffConfig};
use super::change::{is_significant, DEFAULT_EPSILON};
use super::history::{History, Reading, DEFAULT_CAPACITY};
use crate::batch::{BatchProtocol, Transaction, TransactionResult};
use crate::domain::{ConnectError, SessionState, Snapshot, Timestamp, TransactionError, Value};

/// Tuning for monitoring, change detection and write verification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Hard ceiling on the polling rate
    pub max_rate_hz: f64,
    /// Variables × Hz the engine can sustain; larger watch sets poll slower
    pub variable_budget: f64,
    /// Readings kept per variable
    pub history_capacity: usize,
    /// Relative change that marks a reading as `changed`
    pub change_threshold: f64,
    pub epsilon: f64,
    /// Maximum |read-back - written| for a write to count as verified
    pub write_tolerance: f64,
    pub backoff: BackoffConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_rate_hz: 10.0,
            variable_budget: 50.0,
            history_capacity: DEFAULT_CAPACITY,
            change_threshold: 0.01,
            epsilon: DEFAULT_EPSILON,
            write_tolerance: 1e-3,
            backoff: BackoffConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Polling rate for `watched` variables at `requested_hz`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn planned_rate(&self, requested_hz: f64, watched: usize) -> f64 {
        if watched == 0 {
            return 0.0;
        }
        requested_hz.min(self.max_rate_hz).min(self.variable_budget / watched as f64)
    }
}

/// Answer to a `start_monitoring` request
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub started: bool,
    pub requested_hz: f64,
    /// Rate the worker will actually attempt, after budgets and measured
    /// round-trip latency
    pub effective_hz: f64,
}

struct MonitorHandle {
    stop: Sender<()>,
    worker: JoinHandle<()>,
    watch: Vec<String>,
}

/// State shared between the store and its worker
struct Shared {
    protocol: Arc<BatchProtocol>,
    config: MonitorConfig,
    history: RwLock<HashMap<String, History>>,
    /// Serialises monitoring cycles against ad-hoc reads and writes
    io: Mutex<()>,
    /// (planned, effective) while monitoring
    rate: Mutex<Option<(f64, f64)>>,
}

/// Continuously updated variable store on top of the batch protocol
///
/// One background thread polls the watch set; everything else runs on the
/// caller's thread. Ad-hoc reads and writes queue on the store's I/O lock
/// behind an in-flight cycle instead of failing with `SessionBusy`.
pub struct TelemetryStore {
    shared: Arc<Shared>,
    monitor: Mutex<Option<MonitorHandle>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn history(&self) -> RwLockReadGuard<'_, HashMap<String, History>> {
        self.history.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn history_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, History>> {
        self.history.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, name: &str, value: Value, timestamp: Timestamp) {
        let mut history = self.history_mut();
        let entry =
            history.entry(name.to_string()).or_insert_with(|| History::new(self.config.history_capacity));
        let changed = entry.latest().is_none_or(|prev| {
            is_significant(&prev.value, &value, self.config.change_threshold, self.config.epsilon)
        });
        if changed {
            debug!("{name} changed to {value}");
        }
        entry.push(Reading { timestamp, value, changed });
    }

    fn record_result(&self, result: &TransactionResult) {
        let now = Timestamp::now();
        for item in result.iter() {
            match &item.outcome {
                Ok(value) => self.record(&item.name, value.clone(), now),
                Err(e) => debug!("{}: {e}", item.name),
            }
        }
    }

    /// Bring a faulted or dropped session back, at most once per backoff
    /// slot. Returns whether the session is usable.
    fn ensure_connected(&self, backoff: &mut Backoff) -> bool {
        let session = self.protocol.session();
        match session.state() {
            SessionState::Ready => return true,
            SessionState::Faulted => {
                session.reset();
            }
            SessionState::Busy | SessionState::Connecting => return false,
            SessionState::Disconnected => {}
        }

        let now = Instant::now();
        if backoff.exhausted() {
            return false;
        }
        if !backoff.ready(now) {
            debug!("Reconnect in {:?}", backoff.remaining(now));
            return false;
        }

        info!("Reconnecting (attempt {})", backoff.attempts() + 1);
        match session.connect(None) {
            Ok(()) => {
                backoff.succeed();
                true
            }
            Err(e) => {
                backoff.fail(now);
                if backoff.exhausted() {
                    error!("Giving up reconnecting after {} attempts: {e}", backoff.attempts());
                } else {
                    warn!("Reconnect failed: {e}");
                }
                false
            }
        }
    }

    fn cycle(&self, transaction: &Transaction, backoff: &mut Backoff) {
        let _io = lock(&self.io);
        if !self.ensure_connected(backoff) {
            return;
        }
        match self.protocol.submit(transaction) {
            Ok(result) => self.record_result(&result),
            Err(e) => warn!("Monitoring cycle failed: {e}"),
        }
    }

    fn update_rate(&self, planned: f64, cycle: Duration) {
        let measured = 1.0 / cycle.as_secs_f64().max(f64::EPSILON);
        let effective = planned.min(measured);
        *lock(&self.rate) = Some((planned, effective));
    }
}

fn run_monitor(shared: &Shared, transaction: &Transaction, planned: f64, period: Duration, stop: &Receiver<()>) {
    let mut backoff = Backoff::new(shared.config.backoff.clone());

    loop {
        match stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break,
        }

        let started = Instant::now();
        shared.cycle(transaction, &mut backoff);
        let elapsed = started.elapsed();
        shared.update_rate(planned, elapsed);

        match stop.recv_timeout(period.saturating_sub(elapsed)) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Monitor worker exiting");
}

impl TelemetryStore {
    #[must_use]
    pub fn new(protocol: Arc<BatchProtocol>, config: MonitorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                protocol,
                config,
                history: RwLock::new(HashMap::new()),
                io: Mutex::new(()),
                rate: Mutex::new(None),
            }),
            monitor: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn protocol(&self) -> &Arc<BatchProtocol> {
        &self.shared.protocol
    }

    /// Start polling `names` in the background
    ///
    /// Returns `started == false` for an empty watch set, a non-positive
    /// rate or one so small its polling period can't be represented, or
    /// when a monitor is already running (stop it first).
    pub fn start_monitoring<S: AsRef<str>>(&self, names: &[S], rate_hz: f64) -> MonitorStatus {
        let mut seen = HashSet::new();
        let watch: Vec<String> = names
            .iter()
            .map(|n| n.as_ref().to_string())
            .filter(|n| seen.insert(n.clone()))
            .collect();

        let rejected = |effective_hz| MonitorStatus { started: false, requested_hz: rate_hz, effective_hz };

        let mut monitor = lock(&self.monitor);
        if monitor.is_some() {
            warn!("Monitor already running; stop it before starting another");
            return rejected(self.effective_rate().unwrap_or(0.0));
        }

        let planned = self.shared.config.planned_rate(rate_hz, watch.len());
        let period = (!watch.is_empty() && rate_hz > 0.0 && planned > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / planned).ok())
            .flatten();
        let Some(period) = period else {
            warn!("Not monitoring: {} variables at {rate_hz} Hz", watch.len());
            return rejected(0.0);
        };

        // Seed the effective rate from the last measured round trip
        let effective = self
            .shared
            .protocol
            .session()
            .stats()
            .last_round_trip
            .map_or(planned, |rt| planned.min(1.0 / rt.as_secs_f64().max(f64::EPSILON)));
        *lock(&self.shared.rate) = Some((planned, effective));

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let transaction = Transaction::reads(watch.iter().cloned());
        let spawned = thread::Builder::new()
            .name("probe-monitor".to_string())
            .spawn(move || run_monitor(&shared, &transaction, planned, period, &stop_rx));

        match spawned {
            Ok(worker) => {
                info!(
                    "Monitoring {} variables: requested {rate_hz} Hz, planned {planned:.2} Hz",
                    watch.len()
                );
                *monitor = Some(MonitorHandle { stop: stop_tx, worker, watch });
                MonitorStatus { started: true, requested_hz: rate_hz, effective_hz: effective }
            }
            Err(e) => {
                error!("Failed to spawn monitor thread: {e}");
                *lock(&self.shared.rate) = None;
                rejected(0.0)
            }
        }
    }

    /// Stop the monitor, waiting for an in-flight cycle to finish
    ///
    /// Returns whether a monitor was running. Safe to call repeatedly.
    pub fn stop_monitoring(&self) -> bool {
        let Some(handle) = lock(&self.monitor).take() else {
            return false;
        };
        let _ = handle.stop.try_send(());
        drop(handle.stop);
        if handle.worker.join().is_err() {
            error!("Monitor worker panicked");
        }
        *lock(&self.shared.rate) = None;
        info!("Monitoring stopped");
        true
    }

    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        lock(&self.monitor).is_some()
    }

    /// Rate the monitor is currently achieving, `None` when stopped
    #[must_use]
    pub fn effective_rate(&self) -> Option<f64> {
        lock(&self.shared.rate).map(|(_, effective)| effective)
    }

    /// Rate the monitor is aiming for, `None` when stopped
    #[must_use]
    pub fn planned_rate(&self) -> Option<f64> {
        lock(&self.shared.rate).map(|(planned, _)| planned)
    }

    #[must_use]
    pub fn watch_set(&self) -> Vec<String> {
        lock(&self.monitor).as_ref().map(|m| m.watch.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn latest(&self, name: &str) -> Option<Reading> {
        self.shared.history().get(name).and_then(History::latest).cloned()
    }

    /// Readings for `name`, oldest first, optionally limited to the last
    /// `window`
    #[must_use]
    pub fn history(&self, name: &str, window: Option<Duration>) -> Vec<Reading> {
        let history = self.shared.history();
        let Some(h) = history.get(name) else {
            return Vec::new();
        };
        match window {
            Some(window) => h.since(Timestamp::now().saturating_sub(window)).cloned().collect(),
            None => h.iter().cloned().collect(),
        }
    }

    /// Latest value of every variable with at least one reading
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.shared
            .history()
            .iter()
            .filter_map(|(name, h)| h.latest().map(|r| (name.clone(), r.value.clone())))
            .collect::<BTreeMap<_, _>>()
    }

    /// Forget readings for `name`, or for everything
    pub fn clear_history(&self, name: Option<&str>) {
        let mut history = self.shared.history_mut();
        match name {
            Some(name) => {
                history.remove(name);
            }
            None => history.clear(),
        }
    }

    /// One-off read, queued behind any in-flight monitoring cycle
    ///
    /// History is not touched.
    ///
    /// # Errors
    /// Wholesale transaction failures
    pub fn read<S: AsRef<str>>(&self, names: &[S]) -> Result<TransactionResult, TransactionError> {
        let _io = lock(&self.shared.io);
        self.shared.protocol.submit(&Transaction::reads(names.iter().map(|n| n.as_ref().to_string())))
    }

    /// Submit an arbitrary transaction, queued like [`Self::read`]
    ///
    /// History is not touched.
    ///
    /// # Errors
    /// Wholesale transaction failures
    pub fn submit(&self, transaction: &Transaction) -> Result<TransactionResult, TransactionError> {
        let _io = lock(&self.shared.io);
        self.shared.protocol.submit(transaction)
    }

    /// Write `value` and verify it by read-back in the same round trip
    ///
    /// The read-back is recorded as a new reading. Returns `true` only when
    /// it matches `value` within `write_tolerance`.
    ///
    /// # Errors
    /// Wholesale transaction failures; item-level failures return `false`
    pub fn write(&self, name: &str, value: Value) -> Result<bool, TransactionError> {
        let _io = lock(&self.shared.io);
        let result = self.shared.protocol.submit(&Transaction::new().write(name, value.clone()))?;

        match result.get(name) {
            Some(Ok(readback)) => {
                self.shared.record(name, readback.clone(), Timestamp::now());
                let verified = match (value.as_f64(), readback.as_f64()) {
                    (Some(w), Some(r)) => (w - r).abs() <= self.shared.config.write_tolerance,
                    _ => value.loosely_equals(readback),
                };
                if verified {
                    info!("Wrote {name} = {value}");
                } else {
                    warn!("Write to {name} not verified: wrote {value}, read back {readback}");
                }
                Ok(verified)
            }
            Some(Err(e)) => {
                warn!("Write to {name} failed: {e}");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Connect, retrying with exponential backoff
    ///
    /// # Errors
    /// The last connect error once the attempt cap is reached
    pub fn connect_with_retry(&self, firmware: Option<&Path>) -> Result<(), ConnectError> {
        let _io = lock(&self.shared.io);
        let session = self.shared.protocol.session();
        let backoff = &self.shared.config.backoff;
        let attempts = backoff.max_attempts.max(1);

        let mut last = None;
        for attempt in 0..attempts {
            if session.state() == SessionState::Faulted {
                session.reset();
            }
            match session.connect(firmware) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Connect attempt {}/{attempts} failed: {e}", attempt + 1);
                    last = Some(e);
                }
            }
            if attempt + 1 < attempts {
                thread::sleep(backoff.delay(attempt));
            }
        }
        Err(last.unwrap_or(ConnectError::InvalidState(session.state())))
    }
}

impl Drop for TelemetryStore {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore")
            .field("config", &self.shared.config)
            .field("monitoring", &self.is_monitoring())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planned_rate_budgets() {
        let cfg = MonitorConfig::default();
        assert!((cfg.planned_rate(5.0, 2) - 5.0).abs() < 1e-9);
        assert!((cfg.planned_rate(100.0, 2) - 10.0).abs() < 1e-9);
        // 50 variable-Hz shared across 20 variables
        assert!((cfg.planned_rate(10.0, 20) - 2.5).abs() < 1e-9);
        assert!(cfg.planned_rate(10.0, 0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_monitor_config_from_json() {
        let cfg: MonitorConfig =
            serde_json::from_str(r#"{"max_rate_hz": 2.0, "backoff": {"max_attempts": 1}}"#).unwrap();
        assert!((cfg.max_rate_hz - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.backoff.max_attempts, 1);
        assert_eq!(cfg.backoff.initial_delay_ms, 500);
        assert_eq!(cfg.history_capacity, DEFAULT_CAPACITY);
    }
}
