//! # Telemetry
//!
//! Turns expensive engine round trips into a continuously updated store.
//!
//! ```text
//! probe-monitor thread
//!   loop: stop? → reconnect? → submit(watch set) → record → sleep
//!                                  │                  │
//! read() / write() ──io lock──────▶│                  ▼
//!                            BatchProtocol      history: name → ring buffer
//!                                               (latest, snapshot, window)
//! ```
//!
//! The planned rate is `min(requested, max_rate_hz, variable_budget / n)`.
//! The reported effective rate is further capped by the measured cycle time,
//! so a 300 ms engine polling two variables at a requested 10 Hz reports
//! about 3.3 Hz.
//!
//! Failures inside the worker are logged and leave the last good values in
//! place. Session faults trigger reconnects with exponential backoff.

pub mod backoff;
pub mod change;
pub mod history;
pub mod store;

pub use backoff::{Backoff, BackoffConfig};
pub use change::is_significant;
pub use history::{History, Reading};
pub use store::{MonitorConfig, MonitorStatus, TelemetryStore};
