//! Session lifecycle and the single engine choke point

use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::config::{EngineConfig, TargetConfig};
use super::script::{self, CONNECTION_SUCCESS};
use super::transport::{EngineOutput, Transport, TransportError};
use crate::domain::{ConnectError, SessionState, Timestamp, TransactionError};

/// Counters kept across the life of a controller
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Round trips attempted through `execute`
    pub executions: u64,
    /// Round trips that timed out or failed to start
    pub failures: u64,
    pub last_round_trip: Option<Duration>,
    pub connected_since: Option<Timestamp>,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    last_diagnostic: Option<String>,
    stats: SessionStats,
}

/// Owns the one logical connection to the target through the debug engine
///
/// State lives behind a short-lived mutex that is never held across a round
/// trip, so `state()` stays responsive while the engine runs. The transport
/// has its own mutex; the `Busy` state guarantees it is uncontended.
pub struct SessionController {
    engine: EngineConfig,
    target: TargetConfig,
    inner: Mutex<SessionInner>,
    transport: Mutex<Box<dyn Transport>>,
}

impl SessionController {
    #[must_use]
    pub fn new(engine: EngineConfig, target: TargetConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            engine,
            target,
            inner: Mutex::new(SessionInner {
                state: SessionState::Disconnected,
                last_diagnostic: None,
                stats: SessionStats::default(),
            }),
            transport: Mutex::new(transport),
        }
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    /// Raw engine output or error text from the most recent failure
    #[must_use]
    pub fn last_diagnostic(&self) -> Option<String> {
        self.inner().last_diagnostic.clone()
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.inner().stats.clone()
    }

    #[must_use]
    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    #[must_use]
    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    /// Open the session, optionally loading `firmware`, and halt the core
    ///
    /// Reconnects pass `None` so a running image isn't reloaded.
    ///
    /// Succeeds immediately when already `Ready`.
    ///
    /// # Errors
    /// `InvalidState` when busy, connecting or faulted (call [`Self::reset`]
    /// first); otherwise the engine failure, with the session left `Faulted`
    pub fn connect(&self, firmware: Option<&Path>) -> Result<(), ConnectError> {
        {
            let mut inner = self.inner();
            match inner.state {
                SessionState::Ready => return Ok(()),
                SessionState::Disconnected => inner.state = SessionState::Connecting,
                other => return Err(ConnectError::InvalidState(other)),
            }
        }

        let target = TargetConfig { firmware: firmware.map(Path::to_path_buf), ..self.target.clone() };
        info!("Connecting to {} via {}", target.cpu, target.ccxml.display());

        let mut transport = self.transport();
        let result = transport.run(&script::connect_script(&target), self.engine.connect_timeout());

        let mut inner = self.inner();
        let failure = match result {
            Ok(output) if output.contains(CONNECTION_SUCCESS) => {
                if let Some(err) = script::session_error(&output.stdout) {
                    // Connected, but firmware load or settle threw afterwards
                    warn!("Connected with errors: {err}");
                }
                inner.state = SessionState::Ready;
                inner.stats.connected_since = Some(Timestamp::now());
                info!("Session ready");
                return Ok(());
            }
            Ok(output) => {
                let reason = script::session_error(&output.stdout)
                    .map_or_else(|| "no CONNECTION_SUCCESS in engine output".to_string(), str::to_string);
                inner.last_diagnostic = Some(format!("{}{}", output.stdout, output.stderr));
                ConnectError::TargetRejected(reason)
            }
            Err(TransportError::Timeout(after)) => {
                inner.last_diagnostic = Some(format!("connect timed out after {after:?}"));
                ConnectError::Timeout(after)
            }
            Err(e) => {
                inner.last_diagnostic = Some(e.to_string());
                ConnectError::EngineUnavailable(e.to_string())
            }
        };

        inner.state = SessionState::Faulted;
        warn!("Connect failed: {failure}");
        Err(failure)
    }

    /// Run one script through the engine
    ///
    /// The only path to the transport once connected. `timeout` defaults to
    /// the configured transaction timeout. There are no implicit retries.
    ///
    /// # Errors
    /// `SessionBusy` immediately if another round trip is in flight,
    /// `NotConnected`/`SessionFaulted` unless `Ready`, `Timeout` when the
    /// engine overruns (the session becomes `Faulted`)
    pub fn execute(&self, script: &str, timeout: Option<Duration>) -> Result<EngineOutput, TransactionError> {
        {
            let mut inner = self.inner();
            match inner.state {
                SessionState::Ready => inner.state = SessionState::Busy,
                SessionState::Busy => return Err(TransactionError::SessionBusy),
                SessionState::Faulted => {
                    let reason = inner.last_diagnostic.clone().unwrap_or_else(|| "faulted".to_string());
                    return Err(TransactionError::SessionFaulted(reason));
                }
                SessionState::Disconnected | SessionState::Connecting => {
                    return Err(TransactionError::NotConnected)
                }
            }
        }

        let timeout = timeout.unwrap_or_else(|| self.engine.transaction_timeout());
        let mut transport = self.transport();
        let started = Instant::now();
        let result = transport.run(script, timeout);
        let elapsed = started.elapsed();

        // Update while still holding the transport so a concurrent
        // disconnect can't be overwritten
        let mut inner = self.inner();
        inner.stats.executions += 1;
        inner.stats.last_round_trip = Some(elapsed);

        match result {
            Ok(output) => {
                inner.state = SessionState::Ready;
                debug!("Round trip took {elapsed:?}");
                Ok(output)
            }
            Err(TransportError::Timeout(after)) => {
                inner.stats.failures += 1;
                inner.state = SessionState::Faulted;
                inner.last_diagnostic = Some(format!("round trip timed out after {after:?}"));
                warn!("Round trip timed out after {after:?}, session faulted");
                Err(TransactionError::Timeout(after))
            }
            Err(e) => {
                inner.stats.failures += 1;
                inner.state = SessionState::Faulted;
                inner.last_diagnostic = Some(e.to_string());
                warn!("Round trip failed: {e}");
                Err(TransactionError::SessionFaulted(e.to_string()))
            }
        }
    }

    /// Full per-transaction script around `body`
    #[must_use]
    pub fn wrap_transaction(&self, body: &str) -> String {
        script::transaction_script(&self.target, body)
    }

    /// Mark the session unusable after a session-level failure observed in
    /// otherwise successful engine output
    pub fn fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Session faulted: {reason}");
        let mut inner = self.inner();
        inner.state = SessionState::Faulted;
        inner.last_diagnostic = Some(reason);
    }

    /// Leave `Faulted` so the session can be connected again
    ///
    /// Returns `true` when the session was faulted.
    pub fn reset(&self) -> bool {
        let mut inner = self.inner();
        if inner.state != SessionState::Faulted {
            return false;
        }
        inner.state = SessionState::Disconnected;
        inner.stats.connected_since = None;
        drop(inner);

        self.transport().shutdown();
        info!("Session reset");
        true
    }

    /// Best-effort release of the target
    ///
    /// Waits for an in-flight round trip to finish. Always ends
    /// `Disconnected`.
    pub fn disconnect(&self) {
        let was_ready = self.state() == SessionState::Ready;
        let mut transport = self.transport();

        if was_ready {
            let script = script::disconnect_script(&self.target);
            match transport.run(&script, self.engine.transaction_timeout()) {
                Ok(output) if output.contains(script::SESSION_CLOSED) => info!("Target released"),
                Ok(_) => warn!("Disconnect script finished without {}", script::SESSION_CLOSED),
                Err(e) => warn!("Disconnect failed: {e}"),
            }
        }
        transport.shutdown();

        let mut inner = self.inner();
        inner.state = SessionState::Disconnected;
        inner.stats.connected_since = None;
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("engine", &self.engine)
            .field("target", &self.target)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays canned results in order
    struct Scripted(VecDeque<Result<EngineOutput, TransportError>>);

    impl Transport for Scripted {
        fn run(&mut self, _script: &str, _timeout: Duration) -> Result<EngineOutput, TransportError> {
            self.0.pop_front().unwrap_or_else(|| Ok(EngineOutput::default()))
        }
    }

    fn controller(results: Vec<Result<EngineOutput, TransportError>>) -> SessionController {
        SessionController::new(
            EngineConfig::default(),
            TargetConfig::default(),
            Box::new(Scripted(results.into())),
        )
    }

    fn ok(stdout: &str) -> Result<EngineOutput, TransportError> {
        Ok(EngineOutput::from_stdout(stdout))
    }

    #[test]
    fn test_connect_then_execute() {
        let session = controller(vec![ok("CONNECTION_SUCCESS\nSESSION_CLOSED\n"), ok("VAR:x=1\n")]);
        assert_eq!(session.state(), SessionState::Disconnected);
        session.connect(None).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.stats().connected_since.is_some());

        let out = session.execute("body", None).unwrap();
        assert_eq!(out.stdout, "VAR:x=1\n");
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.stats().executions, 1);

        // Already ready: no second round trip needed
        session.connect(None).unwrap();
    }

    #[test]
    fn test_execute_requires_connection() {
        let session = controller(vec![]);
        assert_eq!(session.execute("x", None), Err(TransactionError::NotConnected));
    }

    #[test]
    fn test_connect_rejected_preserves_diagnostic() {
        let session = controller(vec![ok("SESSION_ERROR: Could not find target\n")]);
        let err = session.connect(None).unwrap_err();
        assert_eq!(err, ConnectError::TargetRejected("Could not find target".to_string()));
        assert_eq!(session.state(), SessionState::Faulted);
        assert!(session.last_diagnostic().unwrap().contains("Could not find target"));

        // Faulted is terminal until reset
        assert_eq!(session.connect(None), Err(ConnectError::InvalidState(SessionState::Faulted)));
        assert!(session.reset());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.reset());
    }

    #[test]
    fn test_timeout_faults_session() {
        let session = controller(vec![
            ok("CONNECTION_SUCCESS\n"),
            Err(TransportError::Timeout(Duration::from_secs(20))),
        ]);
        session.connect(None).unwrap();
        let err = session.execute("x", None).unwrap_err();
        assert_eq!(err, TransactionError::Timeout(Duration::from_secs(20)));
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(session.stats().failures, 1);
        assert!(matches!(session.execute("x", None), Err(TransactionError::SessionFaulted(_))));
    }

    #[test]
    fn test_engine_unavailable_on_connect() {
        let session =
            controller(vec![Err(TransportError::Unavailable("dss.sh: not found".to_string()))]);
        assert!(matches!(session.connect(None), Err(ConnectError::EngineUnavailable(_))));
    }

    #[test]
    fn test_disconnect_always_ends_disconnected() {
        let session = controller(vec![ok("CONNECTION_SUCCESS\n"), ok("SESSION_CLOSED\n")]);
        session.connect(None).unwrap();
        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);
        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_fault_from_outside() {
        let session = controller(vec![ok("CONNECTION_SUCCESS\n")]);
        session.connect(None).unwrap();
        session.fault("engine lost the target");
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(session.last_diagnostic().as_deref(), Some("engine lost the target"));
    }
}
