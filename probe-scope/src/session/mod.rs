//! # Debug Session Management
//!
//! The debug engine is a slow-starting external process driven by generated
//! JavaScript. It accepts one session at a time and reports everything
//! through printed text. This module hides that behind a small state
//! machine.
//!
//! ```text
//!   connect()                 execute(script)
//! Disconnected → Connecting → Ready ──────→ Busy ──────→ Ready
//!                    │                        │
//!                    │ rejected / timeout     │ timeout / engine gone
//!                    └────────→ Faulted ←─────┘
//!                                  │ reset()
//!                                  └────────→ Disconnected
//! ```
//!
//! A second `execute` while `Busy` fails immediately with `SessionBusy`
//! rather than queueing. Callers that want queueing (the telemetry store)
//! serialise above this layer.
//!
//! ## Module Structure
//!
//! - **`config`**: engine executable, timeouts, probe/target selection
//! - **`script`**: script templates and the sentinel lines they print
//! - **`transport`**: the [`Transport`] seam and the subprocess engine
//! - **`controller`**: [`SessionController`], the state machine above

pub mod config;
pub mod controller;
pub mod script;
pub mod transport;

pub use config::{EngineConfig, TargetConfig};
pub use controller::{SessionController, SessionStats};
pub use transport::{EngineOutput, SubprocessTransport, Transport, TransportError};
