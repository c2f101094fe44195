//! Value coercion for engine output
//!
//! The engine prints every value as text. Precedence:
//!
//! 1. floating point (`"3.14"`, `"-1"`, `"0"`, `"1e-3"`, `"NaN"`, `"inf"`)
//! 2. integer, including `0x`-prefixed hex (`"0x0000F580"`)
//! 3. the raw trimmed text (`"true"`, `"undefined"`, `"{...}"`)
//!
//! Decimal integers therefore come back as `Value::Float`; callers that need
//! an integer use [`Value::as_i64`].

use crate::domain::Value;

/// Coerce one printed value
#[must_use]
pub fn coerce(raw: &str) -> Value {
    let text = raw.trim();

    if let Ok(v) = text.parse::<f64>() {
        return Value::Float(v);
    }
    if let Some(v) = parse_int(text) {
        return Value::Int(v);
    }
    Value::Text(text.to_string())
}

fn parse_int(text: &str) -> Option<i64> {
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let hex = unsigned.strip_prefix("0x").or_else(|| unsigned.strip_prefix("0X"))?;
    let magnitude = i64::from_str_radix(hex, 16).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}
