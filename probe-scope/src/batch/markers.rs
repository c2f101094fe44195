//! Marker line grammar
//!
//! ```text
//! VAR:<name>=<value>      item succeeded, value printed by the engine
//! ERR:<name>:<reason>     item threw inside its own try/catch
//! ```
//!
//! `<name>` is an identifier/member/index expression. Every other line,
//! including lines that merely contain a marker somewhere in the middle, is
//! engine noise.

use super::coerce::coerce;
use crate::domain::Value;

pub const VAR_MARK: &str = "VAR:";
pub const ERR_MARK: &str = "ERR:";

#[derive(Debug, Clone, PartialEq)]
pub enum Marker {
    Value { name: String, value: Value },
    Error { name: String, reason: String },
}

impl Marker {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Marker::Value { name, .. } | Marker::Error { name, .. } => name,
        }
    }
}

/// Identifier, optionally followed by `.member` and `[index]` parts
#[must_use]
pub fn is_valid_expression(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}

/// Interpret one line of engine stdout
#[must_use]
pub fn parse_line(line: &str) -> Option<Marker> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(VAR_MARK) {
        let (name, raw) = rest.split_once('=')?;
        let name = name.trim();
        return is_valid_expression(name)
            .then(|| Marker::Value { name: name.to_string(), value: coerce(raw) });
    }

    if let Some(rest) = line.strip_prefix(ERR_MARK) {
        let (name, reason) = rest.split_once(':')?;
        let name = name.trim();
        return is_valid_expression(name)
            .then(|| Marker::Error { name: name.to_string(), reason: reason.trim().to_string() });
    }

    None
}

/// All markers in a transcript, in output order
#[must_use]
pub fn parse_transcript(stdout: &str) -> Vec<Marker> {
    stdout.lines().filter_map(parse_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(name: &str, v: Value) -> Marker {
        Marker::Value { name: name.to_string(), value: v }
    }

    fn error(name: &str, reason: &str) -> Marker {
        Marker::Error { name: name.to_string(), reason: reason.to_string() }
    }

    #[test]
    fn test_parse_line_table() {
        let cases: &[(&str, Option<Marker>)] = &[
            ("VAR:motorVars_M1.motorState=2", Some(value("motorVars_M1.motorState", Value::Float(2.0)))),
            ("  VAR:speed=  -12.5  ", Some(value("speed", Value::Float(-12.5)))),
            ("VAR:ptr=0x0000C000", Some(value("ptr", Value::Int(0xc000)))),
            ("VAR:arr[1]=a=b", Some(value("arr[1]", Value::Text("a=b".to_string())))),
            ("ERR:motorState:Identifier not found: motorState", Some(error("motorState", "Identifier not found: motorState"))),
            ("ERR:x:", Some(error("x", ""))),
            ("VAR:=5", None),
            ("VAR:1abc=5", None),
            ("VAR:no_equals_sign", None),
            ("ERR:no_reason_separator", None),
            ("js: VAR:x=1", None),
            ("CONNECTION_SUCCESS", None),
            ("", None),
        ];

        for (line, expected) in cases {
            assert_eq!(&parse_line(line), expected, "line: {line:?}");
        }
    }

    #[test]
    fn test_captured_transcript() {
        let transcript = "\
SLF4J: Class path contains multiple SLF4J bindings.
SLF4J: See http://www.slf4j.org/codes.html#multiple_bindings for an explanation.
CONNECTION_SUCCESS
VAR:motorState=0
VAR:needsCalibration=1
ERR:debug_bypass.bypass_alignment_called:Could not evaluate expression: Identifier not found
C28xx_CPU1: GEL Output: Memory Map Initialization Complete
VAR:positionRad=0.7853981852531433
SESSION_CLOSED
";
        let markers = parse_transcript(transcript);
        assert_eq!(markers.len(), 4);
        assert_eq!(markers[0], value("motorState", Value::Float(0.0)));
        assert_eq!(markers[1], value("needsCalibration", Value::Float(1.0)));
        assert_eq!(markers[2].name(), "debug_bypass.bypass_alignment_called");
        assert!(matches!(&markers[3], Marker::Value { value: Value::Float(v), .. } if (*v - 0.785_398).abs() < 1e-6));
    }

    #[test]
    fn test_truncated_transcript() {
        // Engine died mid-script: the half-printed last line is dropped
        let transcript = "CONNECTION_SUCCESS\nVAR:a=1\nVAR:b";
        assert_eq!(parse_transcript(transcript), vec![value("a", Value::Float(1.0))]);
    }

    #[test]
    fn test_expression_validation() {
        assert!(is_valid_expression("motorVars_M1.Idq_out_A.value[0]"));
        assert!(is_valid_expression("_private"));
        assert!(!is_valid_expression("a = 5"));
        assert!(!is_valid_expression("a\");evil(\""));
        assert!(!is_valid_expression("0x100"));
    }
}
