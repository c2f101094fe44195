//! Significant-change detection between consecutive readings

use crate::domain::Value;

/// Smallest denominator used for relative change, so readings that start at
/// zero still register movement
pub const DEFAULT_EPSILON: f64 = 1e-9;

/// Whether `current` differs significantly from `previous`
///
/// Numeric pairs compare by relative change
/// `|current - previous| / max(|previous|, epsilon) > threshold`.
/// A NaN on exactly one side is a change; NaN on both is not. Anything
/// non-numeric compares by plain inequality.
#[must_use]
pub fn is_significant(previous: &Value, current: &Value, threshold: f64, epsilon: f64) -> bool {
    match (previous.as_f64(), current.as_f64()) {
        (Some(p), Some(c)) => match (p.is_nan(), c.is_nan()) {
            (true, true) => false,
            (true, false) | (false, true) => true,
            (false, false) => (c - p).abs() / p.abs().max(epsilon) > threshold,
        },
        _ => previous != current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(p: f64, c: f64) -> bool {
        is_significant(&Value::Float(p), &Value::Float(c), 0.01, DEFAULT_EPSILON)
    }

    #[test]
    fn test_relative_threshold() {
        assert!(!changed(0.500, 0.503));
        assert!(changed(0.500, 0.520));
        assert!(!changed(0.500, 0.500));
        assert!(changed(-2.0, -2.5));
    }

    #[test]
    fn test_from_zero() {
        assert!(changed(0.0, 1e-6));
        assert!(!changed(0.0, 0.0));
    }

    #[test]
    fn test_nan_handling() {
        assert!(!changed(f64::NAN, f64::NAN));
        assert!(changed(f64::NAN, 1.0));
        assert!(changed(1.0, f64::NAN));
    }

    #[test]
    fn test_text_values() {
        let a = Value::Text("idle".to_string());
        let b = Value::Text("running".to_string());
        assert!(is_significant(&a, &b, 0.01, DEFAULT_EPSILON));
        assert!(!is_significant(&a, &a.clone(), 0.01, DEFAULT_EPSILON));
        assert!(is_significant(&a, &Value::Float(1.0), 0.01, DEFAULT_EPSILON));
    }
}
