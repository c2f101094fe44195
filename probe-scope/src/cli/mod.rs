//! Command-line interface for probe-scope
//!
//! Argument parsing and the mapping from flags (plus an optional JSON
//! config file) to a [`ProbeConfig`](crate::probe::ProbeConfig).

pub mod args;

pub use args::{Args, Command};
