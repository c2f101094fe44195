//! # Batch Transactions
//!
//! Starting the debug engine costs seconds; evaluating an expression once it
//! is up costs milliseconds. Every read and write therefore goes through a
//! [`Transaction`] that packs N items into a single script:
//!
//! ```text
//! Transaction [read motorState, read needsCalibration, write speedRef = 0.2]
//!      │ resolve each name (alias → expression → root symbol)
//!      ▼
//! script body, one try/catch per item
//!      │ SessionController::execute (one round trip)
//!      ▼
//! stdout: CONNECTION_SUCCESS / VAR:motorState=2 / ERR:... / noise
//!      │ markers::parse_transcript + coerce
//!      ▼
//! TransactionResult [Ok(2.0), Err(Engine(..)), Ok(0.2)]
//! ```
//!
//! Per-item failures sit beside successful items. Only session-level
//! problems fail the whole transaction.
//!
//! Raw memory items (`read_memory`, `write_memory`) skip name resolution and
//! go straight to `memory.readData` / `memory.writeData` at a word address.

pub mod coerce;
pub mod markers;
pub mod protocol;

pub use coerce::coerce;
pub use markers::{is_valid_expression, Marker};
pub use protocol::{BatchProtocol, ItemResult, Operation, Request, Transaction, TransactionResult, Width};
