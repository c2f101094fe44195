//! Diagnosis of telemetry snapshots
//!
//! Pure logic with no session state and no I/O: a knowledge base of
//! variable schemas and fault signatures, and the engine that matches
//! snapshots against those signatures.

pub mod fault_patterns;
pub mod knowledge;

pub use fault_patterns::{Condition, FaultEngine, FaultPattern, Operator, Severity};
pub use knowledge::{KnowledgeBase, ValidRange, VarType, VariableSchema};
