//! Consumer interface
//!
//! [`TargetProbe`] wires the resolver, session, batch protocol, telemetry
//! store and fault engine together behind the handful of calls a front end
//! (CLI, agent tool server, dashboard) needs.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::analysis::{FaultEngine, FaultPattern, KnowledgeBase, VariableSchema};
use crate::batch::{BatchProtocol, Transaction, Width};
use crate::domain::{Address, ItemError, ProbeError, ResolveError, SessionState, Snapshot, Value};
use crate::session::{EngineConfig, SessionController, SubprocessTransport, TargetConfig, Transport};
use crate::symbolization::{SearchPattern, Symbol, SymbolResolver};
use crate::telemetry::{MonitorConfig, MonitorStatus, TelemetryStore};

/// Everything needed to open a probe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Linker map artifact for the running firmware
    pub map: PathBuf,
    /// Knowledge table (JSON); the built-in motor-control table when absent
    pub knowledge: Option<PathBuf>,
    pub engine: EngineConfig,
    pub target: TargetConfig,
    pub monitor: MonitorConfig,
}

impl ProbeConfig {
    /// # Errors
    /// Malformed JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// What is known about one variable
#[derive(Debug, Clone, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub expression: String,
    pub symbol: Option<Symbol>,
    pub schema: Option<VariableSchema>,
    /// Latest reading rendered through the schema
    pub latest: Option<String>,
}

pub struct TargetProbe {
    config: ProbeConfig,
    resolver: Arc<SymbolResolver>,
    session: Arc<SessionController>,
    store: TelemetryStore,
    knowledge: KnowledgeBase,
    faults: FaultEngine,
}

impl TargetProbe {
    /// Load the map artifact and knowledge table, and prepare (but don't
    /// connect) a session through the configured engine executable
    ///
    /// # Errors
    /// Unreadable or malformed map artifact or knowledge table
    pub fn open(config: ProbeConfig) -> Result<Self, ProbeError> {
        let transport = SubprocessTransport::new(config.engine.executable.clone());
        Self::with_transport(config, Box::new(transport))
    }

    /// Like [`Self::open`], with a caller-supplied transport
    ///
    /// # Errors
    /// Unreadable or malformed map artifact or knowledge table
    pub fn with_transport(config: ProbeConfig, transport: Box<dyn Transport>) -> Result<Self, ProbeError> {
        let resolver = Arc::new(SymbolResolver::new());
        resolver.load(&config.map)?;

        let knowledge = match &config.knowledge {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .map_err(|e| ProbeError::Config(format!("{}: {e}", path.display())))?;
                KnowledgeBase::from_json(&json)
                    .map_err(|e| ProbeError::Config(format!("{}: {e}", path.display())))?
            }
            None => KnowledgeBase::motor_control(),
        };

        Ok(Self::from_parts(config, resolver, transport, knowledge))
    }

    /// Assemble a probe from already-loaded parts
    #[must_use]
    pub fn from_parts(
        config: ProbeConfig,
        resolver: Arc<SymbolResolver>,
        transport: Box<dyn Transport>,
        knowledge: KnowledgeBase,
    ) -> Self {
        let session = Arc::new(SessionController::new(
            config.engine.clone(),
            config.target.clone(),
            transport,
        ));
        let protocol = Arc::new(
            BatchProtocol::new(Arc::clone(&session), Arc::clone(&resolver))
                .with_aliases(knowledge.aliases()),
        );
        let store = TelemetryStore::new(protocol, config.monitor.clone());
        let faults = knowledge.fault_engine();

        Self { config, resolver, session, store, knowledge, faults }
    }

    #[must_use]
    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    #[must_use]
    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    #[must_use]
    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Connect (loading the configured firmware, if any), retrying with
    /// backoff
    ///
    /// # Errors
    /// The last connect failure
    pub fn connect(&self) -> Result<(), ProbeError> {
        self.store.connect_with_retry(self.config.target.firmware.as_deref())?;
        Ok(())
    }

    /// Stop monitoring and release the target
    pub fn disconnect(&self) {
        self.store.stop_monitoring();
        self.session.disconnect();
    }

    /// Re-read the map artifact; the old table stays live on failure
    ///
    /// # Errors
    /// Unreadable or malformed artifact
    pub fn reload_map(&self) -> Result<usize, ProbeError> {
        Ok(self.resolver.load(&self.config.map)?)
    }

    /// Every map symbol plus every logical name whose expression resolves,
    /// sorted
    #[must_use]
    pub fn available_variables(&self) -> Vec<String> {
        let table = self.resolver.snapshot();
        let mut names: Vec<String> = table.names().into_iter().map(str::to_string).collect();
        names.extend(
            self.knowledge
                .schemas
                .iter()
                .filter(|s| table.resolve_expression(s.target_expression()).is_ok())
                .map(|s| s.name.clone()),
        );
        names.sort_unstable();
        names.dedup();
        names
    }

    #[must_use]
    pub fn search(&self, pattern: &str) -> Vec<Symbol> {
        self.resolver.search(&SearchPattern::parse(pattern))
    }

    /// Read `names` in one round trip
    ///
    /// Each entry is either the value or the failing stage and reason. A
    /// session-level failure is reported against every requested name.
    pub fn read<S: AsRef<str>>(&self, names: &[S]) -> BTreeMap<String, Result<Value, String>> {
        match self.store.read(names) {
            Ok(result) => result
                .iter()
                .map(|item| {
                    let outcome = item.outcome.clone().map_err(|e| format!("{}: {e}", e.stage()));
                    (item.name.clone(), outcome)
                })
                .collect(),
            Err(err) => {
                let reason = ProbeError::from(err).to_string();
                names
                    .iter()
                    .map(|n| (n.as_ref().to_string(), Err(reason.clone())))
                    .collect()
            }
        }
    }

    pub fn start_monitoring<S: AsRef<str>>(&self, names: &[S], rate_hz: f64) -> MonitorStatus {
        self.store.start_monitoring(names, rate_hz)
    }

    /// [`start_monitoring`](Self::start_monitoring) for callers that have
    /// nothing to do without data
    ///
    /// # Errors
    /// `MonitorRefused` when the store declined the request (already
    /// monitoring, nothing to watch, unusable rate)
    pub fn require_monitoring<S: AsRef<str>>(
        &self,
        names: &[S],
        rate_hz: f64,
    ) -> Result<MonitorStatus, ProbeError> {
        let status = self.start_monitoring(names, rate_hz);
        if status.started {
            Ok(status)
        } else {
            Err(ProbeError::MonitorRefused { watched: names.len(), rate_hz })
        }
    }

    pub fn stop_monitoring(&self) -> bool {
        self.store.stop_monitoring()
    }

    #[must_use]
    pub fn current_snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// `(seconds since epoch, value)` pairs, oldest first, optionally
    /// limited to the last `seconds`
    #[must_use]
    pub fn history(&self, name: &str, seconds: Option<f64>) -> Vec<(f64, Value)> {
        let window = seconds.and_then(|s| Duration::try_from_secs_f64(s).ok());
        self.store
            .history(name, window)
            .into_iter()
            .map(|r| (r.timestamp.as_seconds(), r.value))
            .collect()
    }

    /// Write `value` to `name` and verify by read-back
    ///
    /// # Errors
    /// `range` when the schema's valid range excludes the value, `resolve`
    /// when the name isn't in the map, or a session-level failure
    pub fn write(&self, name: &str, value: Value) -> Result<bool, ProbeError> {
        if let Some(schema) = self.knowledge.schema(name) {
            schema.check_range(&value)?;
        }
        let expression = self.expression_for(name);
        self.resolver.snapshot().resolve_expression(&expression)?;

        let verified = self.store.write(name, value)?;
        info!("write {name}: verified={verified}");
        Ok(verified)
    }

    /// `count` consecutive raw values starting at `address`, in one round
    /// trip
    ///
    /// # Errors
    /// The first item that failed, or a session-level failure
    pub fn read_memory(&self, address: Address, width: Width, count: usize) -> Result<Vec<Value>, ProbeError> {
        let transaction = (0..count as u64).fold(Transaction::new(), |tx, i| {
            tx.read_memory(Address(address.0 + i * width.span()), width)
        });
        let result = self.store.submit(&transaction)?;
        result
            .iter()
            .map(|item| {
                item.outcome
                    .clone()
                    .map_err(|error| ProbeError::Item { name: item.name.clone(), error })
            })
            .collect()
    }

    /// Write a raw value to `address` and verify by read-back
    ///
    /// Only addresses inside a writable region of the map artifact are
    /// accepted. Returns whether the read-back matched.
    ///
    /// # Errors
    /// `write` when the address isn't writable or the value doesn't fit
    /// `width`, or a session-level failure
    pub fn write_memory(&self, address: Address, width: Width, value: u64) -> Result<bool, ProbeError> {
        let name = address.to_string();
        let rejected = |error| ProbeError::Item { name: name.clone(), error };
        if value > width.max_value() {
            return Err(rejected(ItemError::InvalidWrite(format!(
                "{value} does not fit in {} bits",
                width.bits()
            ))));
        }
        if !self.resolver.snapshot().is_writable(address, width.span()) {
            return Err(rejected(ItemError::UnsafeAddress(address)));
        }

        let result = self.store.submit(&Transaction::new().write_memory(address, width, value))?;
        let verified = match result.get(&name) {
            Some(Ok(readback)) => {
                let ok = readback.as_f64().is_some_and(|r| u32::try_from(value).is_ok_and(|v| r == f64::from(v)));
                if !ok {
                    warn!("Write to {name} not verified: wrote {value}, read back {readback}");
                }
                ok
            }
            Some(Err(e)) => {
                warn!("Write to {name} failed: {e}");
                false
            }
            None => false,
        };
        info!("write {name} ({} bits) = {value}: verified={verified}", width.bits());
        Ok(verified)
    }

    /// Patterns matching the current snapshot, most severe first
    #[must_use]
    pub fn diagnose(&self) -> Vec<FaultPattern> {
        let snapshot = self.store.snapshot();
        self.faults.diagnose(&snapshot).into_iter().cloned().collect()
    }

    /// Symbol, schema and latest reading for `name`
    ///
    /// # Errors
    /// `resolve` when the name is neither a symbol nor a known variable
    pub fn describe(&self, name: &str) -> Result<VariableInfo, ProbeError> {
        let expression = self.expression_for(name);
        let symbol = self.resolver.snapshot().resolve_expression(&expression).ok().cloned();
        let schema = self.knowledge.schema(name).cloned();
        if symbol.is_none() && schema.is_none() {
            return Err(ResolveError::NotFound(name.to_string()).into());
        }

        let latest = self.store.latest(name).map(|r| match &schema {
            Some(schema) => schema.describe(&r.value),
            None => r.value.to_string(),
        });

        Ok(VariableInfo { name: name.to_string(), expression, symbol, schema, latest })
    }

    fn expression_for(&self, name: &str) -> String {
        self.knowledge
            .schema(name)
            .map_or_else(|| name.to_string(), |s| s.target_expression().to_string())
    }
}

impl std::fmt::Debug for TargetProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetProbe")
            .field("map", &self.config.map)
            .field("session", &self.session.state())
            .field("symbols", &self.resolver.symbol_count())
            .finish_non_exhaustive()
    }
}
