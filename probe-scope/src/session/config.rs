//! Engine and target configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default install location of the debug server scripting launcher
pub const DEFAULT_ENGINE: &str = "/opt/ti/ccs1240/ccs/ccs_base/scripting/bin/dss.sh";

/// How to invoke the external debug engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scripting launcher; receives the generated script as its only argument
    pub executable: PathBuf,
    /// Bound on the connect round trip (engine start-up dominates)
    pub connect_timeout_secs: u64,
    /// Bound on every other round trip
    pub transaction_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from(DEFAULT_ENGINE),
            connect_timeout_secs: 30,
            transaction_timeout_secs: 20,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }
}

/// The probe/target pair a session opens against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Target configuration file (`.ccxml`) naming the probe and device
    pub ccxml: PathBuf,
    /// Core selector passed to `openSession`
    pub cpu: String,
    /// Firmware image loaded on connect, if any
    pub firmware: Option<PathBuf>,
    /// How long the target free-runs after a load before it is halted
    pub settle_ms: u64,
    /// Resume the core after each transaction instead of leaving it halted
    pub resume_after_transaction: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            ccxml: PathBuf::from("TMS320F280039C_LaunchPad.ccxml"),
            cpu: "C28xx_CPU1".to_string(),
            firmware: None,
            settle_ms: 2000,
            resume_after_transaction: false,
        }
    }
}

impl TargetConfig {
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
