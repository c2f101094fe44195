//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep target addresses, wall-clock timestamps and
//! variable values from being confused with plain integers and floats.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Target memory address
///
/// Addresses come from the linker map artifact and are always displayed as
/// zero-padded hexadecimal, the same way the map prints them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub u64);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl From<u64> for Address {
    fn from(addr: u64) -> Self {
        Address(addr)
    }
}

/// Timestamp in nanoseconds
///
/// Represents an absolute point in time as nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current wall-clock time
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn now() -> Self {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_nanos());
        Timestamp(nanos as u64)
    }

    /// Convert to seconds (f64)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Timestamp `duration` earlier than this one (saturating at the epoch)
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn saturating_sub(self, duration: std::time::Duration) -> Self {
        Timestamp(self.0.saturating_sub(duration.as_nanos() as u64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_seconds())
    }
}

/// Lifecycle of a debug session
///
/// ```text
/// Disconnected → Connecting → Ready ⇄ Busy
///                    │          │      │
///                    └──────────┴──────┴──→ Faulted ──reset──→ Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    /// A transaction is in flight
    Busy,
    /// Terminal until `reset()`
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// A value read from (or written to) the target
///
/// The debug engine only ever prints text, so every value starts life as a
/// string and is coerced by [`crate::batch::coerce`]. Most target variables are
/// numeric; `Text` keeps whatever the engine printed when it is not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    // Int before Float so JSON integers deserialize as Int
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value, `None` for text
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Text(_) => None,
        }
    }

    /// Integer view, truncating floats that have no fractional part
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Value::Text(_))
    }

    /// Equality used by fault conditions: numeric when both sides are
    /// numeric, textual otherwise.
    #[must_use]
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self == other,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Latest value of each variable, keyed by logical name
pub type Snapshot = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display() {
        assert_eq!(Address(0xf580).to_string(), "0x0000f580");
    }

    #[test]
    fn test_timestamp_saturating_sub() {
        let ts = Timestamp(5_000_000_000);
        assert_eq!(ts.saturating_sub(std::time::Duration::from_secs(2)), Timestamp(3_000_000_000));
        assert_eq!(ts.saturating_sub(std::time::Duration::from_secs(10)), Timestamp(0));
    }

    #[test]
    fn test_value_loose_equality() {
        assert!(Value::Int(1).loosely_equals(&Value::Float(1.0)));
        assert!(!Value::Int(1).loosely_equals(&Value::Text("1".into())));
        assert!(Value::Text("on".into()).loosely_equals(&Value::Text("on".into())));
    }

    #[test]
    fn test_value_as_i64() {
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::Text("3".into()).as_i64(), None);
    }
}
