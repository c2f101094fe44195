//! # probe-scope - Live Variable Access for Embedded Motor-Control Targets
//!
//! probe-scope reads and writes variables of a running microcontroller
//! through a hardware debug probe, without recompiling firmware. The only
//! way in is a vendor debug engine that runs one generated script per
//! invocation, takes seconds to start, and reports everything as printed
//! text. This crate turns that into typed, batched, cached access.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            Consumers (CLI, agent tools, dashboards)             │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ probe::TargetProbe
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    probe-scope (This Crate)                     │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  Telemetry   │──▶│    Batch     │──▶│   Session    │         │
//! │  │ (monitoring) │   │  (protocol)  │   │ (controller) │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │         │                   │                 │                 │
//! │         ▼                   ▼                 │                 │
//! │  ┌──────────────┐   ┌──────────────┐          │                 │
//! │  │   Analysis   │   │Symbolization │          │                 │
//! │  │   (faults)   │   │ (map file)   │          │                 │
//! │  └──────────────┘   └──────────────┘          │                 │
//! └───────────────────────────────────────────────┼─────────────────┘
//!                                                 │ script file
//!                                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Debug engine (external subprocess)                 │
//! │        probe ◀──JTAG──▶ target (halted, read, resumed)          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`symbolization`]: linker map artifact → symbol and memory-region tables
//!   - Reload swaps the whole table atomically; a failed reload keeps the old one
//!
//! - [`session`]: one debug session against the engine
//!   - State machine `Disconnected → Connecting → Ready ⇄ Busy`, `Faulted`
//!   - Pluggable [`session::Transport`]; the subprocess transport bounds
//!     every invocation with a timeout
//!
//! - [`batch`]: N reads/writes in one script, one round trip
//!   - Marker lines (`VAR:`, `ERR:`) demultiplexed into per-item results
//!   - Explicit value coercion
//!
//! - [`telemetry`]: background monitoring with history and change detection
//!   - Adaptive rate, stale-on-failure, reconnect with backoff
//!
//! - [`analysis`]: knowledge base and fault-pattern engine (pure)
//!
//! - [`probe`]: the consumer interface tying it all together
//!
//! - [`cli`], [`preflight`]: the command-line driver's argument parsing and
//!   file checks
//!
//! - [`domain`]: shared value, address, state and error types
//!
//! ## Typical Usage
//!
//! ```bash
//! # Find a variable in the map
//! probe-scope --map Debug/fw.map symbols motorVars
//!
//! # Watch two variables at 2 Hz
//! probe-scope --map Debug/fw.map watch motorState iqAmps --rate 2
//!
//! # Match the current state against known fault signatures
//! probe-scope --map Debug/fw.map diagnose
//! ```
//!
//! ## Key Concepts
//!
//! - **Map artifact**: the linker's text report of where every global lives
//! - **Round trip**: one engine invocation; dominated by engine start-up
//! - **Logical name**: a knowledge-base name (`motorState`) standing for a
//!   target expression (`motorVars_M1.motorState`)
//! - **Snapshot**: latest value of every watched variable

pub mod analysis;
pub mod batch;
pub mod cli;
pub mod domain;
pub mod preflight;
pub mod probe;
pub mod session;
pub mod symbolization;
pub mod telemetry;
