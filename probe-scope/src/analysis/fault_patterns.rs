//! Fault signature matching over telemetry snapshots.
//!
//! A [`FaultPattern`] is a conjunction of [`Condition`]s. The
//! [`FaultEngine`] evaluates every pattern against a snapshot and ranks the
//! ones that match.
//!
//! # Architecture
//!
//! ```text
//! Snapshot { motorState: 2, idAmps: 0.0, iqAmps: 0.0, .. }
//!     │
//!     ├──► FaultEngine::evaluate()   ← every pattern, declaration order
//!     │
//!     └──► FaultEngine::diagnose()   ← matches only, critical first
//! ```
//!
//! Matching is fail-closed: a variable missing from the snapshot, a
//! non-numeric value under a numeric operator, or a pattern without
//! conditions never matches.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{Snapshot, Value};

// =============================================================================
// SEVERITY
// =============================================================================

/// Ordered most to least urgent, so sorting ascending ranks critical first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        })
    }
}

// =============================================================================
// CONDITIONS
// =============================================================================

/// Comparison applied to a condition's variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operator {
    Eq { value: Value },
    Neq { value: Value },
    Gte { value: f64 },
    Lte { value: f64 },
    /// Absolute difference from another variable is at least `threshold`
    DiffFrom { other: String, threshold: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub variable: String,
    #[serde(flatten)]
    pub operator: Operator,
}

impl Condition {
    #[must_use]
    pub fn eq(variable: &str, value: impl Into<Value>) -> Self {
        Self { variable: variable.to_string(), operator: Operator::Eq { value: value.into() } }
    }

    #[must_use]
    pub fn neq(variable: &str, value: impl Into<Value>) -> Self {
        Self { variable: variable.to_string(), operator: Operator::Neq { value: value.into() } }
    }

    #[must_use]
    pub fn gte(variable: &str, value: f64) -> Self {
        Self { variable: variable.to_string(), operator: Operator::Gte { value } }
    }

    #[must_use]
    pub fn lte(variable: &str, value: f64) -> Self {
        Self { variable: variable.to_string(), operator: Operator::Lte { value } }
    }

    #[must_use]
    pub fn diff_from(variable: &str, other: &str, threshold: f64) -> Self {
        Self {
            variable: variable.to_string(),
            operator: Operator::DiffFrom { other: other.to_string(), threshold },
        }
    }

    /// Whether the condition holds for `snapshot`
    #[must_use]
    pub fn holds(&self, snapshot: &Snapshot) -> bool {
        let Some(current) = snapshot.get(&self.variable) else {
            return false;
        };
        match &self.operator {
            Operator::Eq { value } => current.loosely_equals(value),
            Operator::Neq { value } => !current.loosely_equals(value),
            Operator::Gte { value } => current.as_f64().is_some_and(|c| c >= *value),
            Operator::Lte { value } => current.as_f64().is_some_and(|c| c <= *value),
            Operator::DiffFrom { other, threshold } => {
                match (current.as_f64(), snapshot.get(other).and_then(Value::as_f64)) {
                    (Some(a), Some(b)) => (a - b).abs() >= *threshold,
                    _ => false,
                }
            }
        }
    }

    /// Every variable the condition reads
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        let other = match &self.operator {
            Operator::DiffFrom { other, .. } => Some(other.as_str()),
            _ => None,
        };
        std::iter::once(self.variable.as_str()).chain(other)
    }
}

// =============================================================================
// PATTERNS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultPattern {
    pub name: String,
    pub description: String,
    pub conditions: Vec<Condition>,
    pub severity: Severity,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl FaultPattern {
    #[must_use]
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        !self.conditions.is_empty() && self.conditions.iter().all(|c| c.holds(snapshot))
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// Pure evaluator over a fixed rule table
#[derive(Debug, Clone, Default)]
pub struct FaultEngine {
    patterns: Vec<FaultPattern>,
}

impl FaultEngine {
    #[must_use]
    pub fn new(patterns: Vec<FaultPattern>) -> Self {
        Self { patterns }
    }

    #[must_use]
    pub fn patterns(&self) -> &[FaultPattern] {
        &self.patterns
    }

    /// Every pattern with its match result, in declaration order
    #[must_use]
    pub fn evaluate(&self, snapshot: &Snapshot) -> Vec<(&FaultPattern, bool)> {
        self.patterns.iter().map(|p| (p, p.matches(snapshot))).collect()
    }

    /// Matching patterns, most severe first, ties in declaration order
    #[must_use]
    pub fn diagnose(&self, snapshot: &Snapshot) -> Vec<&FaultPattern> {
        let mut matched: Vec<&FaultPattern> =
            self.patterns.iter().filter(|p| p.matches(snapshot)).collect();
        // Stable sort keeps declaration order within a severity
        matched.sort_by_key(|p| p.severity);
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, Value)]) -> Snapshot {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn pattern(name: &str, severity: Severity, conditions: Vec<Condition>) -> FaultPattern {
        FaultPattern {
            name: name.to_string(),
            description: String::new(),
            conditions,
            severity,
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn test_missing_variable_fails_closed() {
        let p = pattern("p", Severity::Info, vec![Condition::neq("x", 0.0)]);
        assert!(!p.matches(&Snapshot::new()));
        assert!(p.matches(&snapshot(&[("x", Value::Float(1.0))])));
    }

    #[test]
    fn test_numeric_operators() {
        let s = snapshot(&[("state", Value::Float(2.0)), ("label", Value::Text("x".into()))]);
        assert!(Condition::gte("state", 2.0).holds(&s));
        assert!(!Condition::gte("state", 2.5).holds(&s));
        assert!(Condition::lte("state", 2.0).holds(&s));
        assert!(!Condition::gte("label", 0.0).holds(&s));
        assert!(Condition::eq("state", 2_i64).holds(&s));
    }

    #[test]
    fn test_diff_from_threshold_is_inclusive() {
        let s = snapshot(&[("a", Value::Float(1.0)), ("b", Value::Float(1.25))]);
        assert!(Condition::diff_from("a", "b", 0.25).holds(&s));
        assert!(!Condition::diff_from("a", "b", 0.3).holds(&s));
        assert!(!Condition::diff_from("a", "missing", 0.0).holds(&s));
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        let p = pattern("empty", Severity::Critical, vec![]);
        assert!(!p.matches(&snapshot(&[("x", Value::Float(1.0))])));
    }

    #[test]
    fn test_diagnose_orders_by_severity_then_declaration() {
        let engine = FaultEngine::new(vec![
            pattern("info", Severity::Info, vec![Condition::eq("x", 1_i64)]),
            pattern("warn_a", Severity::Warning, vec![Condition::eq("x", 1_i64)]),
            pattern("crit", Severity::Critical, vec![Condition::eq("x", 1_i64)]),
            pattern("warn_b", Severity::Warning, vec![Condition::eq("x", 1_i64)]),
            pattern("miss", Severity::Critical, vec![Condition::eq("x", 2_i64)]),
        ]);
        let s = snapshot(&[("x", Value::Float(1.0))]);

        let names: Vec<&str> = engine.diagnose(&s).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["crit", "warn_a", "warn_b", "info"]);

        let evaluated: Vec<(&str, bool)> =
            engine.evaluate(&s).iter().map(|(p, m)| (p.name.as_str(), *m)).collect();
        assert_eq!(evaluated[0], ("info", true));
        assert_eq!(evaluated[4], ("miss", false));
    }

    #[test]
    fn test_condition_json_shape() {
        let c: Condition = serde_json::from_str(
            r#"{"variable": "positionRad", "op": "diffFrom", "other": "angleEncRad", "threshold": 0.1}"#,
        )
        .unwrap();
        assert_eq!(c, Condition::diff_from("positionRad", "angleEncRad", 0.1));

        let c: Condition =
            serde_json::from_str(r#"{"variable": "motorState", "op": "eq", "value": 1}"#).unwrap();
        assert!(c.holds(&snapshot(&[("motorState", Value::Float(1.0))])));
    }
}
