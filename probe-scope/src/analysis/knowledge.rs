//! Motor-control domain knowledge
//!
//! Variable schemas, fault signatures and command codes for the F280039C
//! PMSM motor-control firmware. Schemas are keyed by short logical names
//! (`motorState`, `needsCalibration`) that map onto target expressions
//! (`motorVars_M1.motorState`, `motorVars_M1.faultMtrNow.bit.needsCalibration`).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::fault_patterns::{Condition, FaultEngine, FaultPattern, Severity};
use crate::domain::{ProbeError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VarType {
    Bool,
    Int8,
    Int16,
    Int32,
    Uint8,
    Uint16,
    Uint32,
    Float32,
    Enum,
    StructMember,
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VarType::Bool => "bool",
            VarType::Int8 => "int8",
            VarType::Int16 => "int16",
            VarType::Int32 => "int32",
            VarType::Uint8 => "uint8",
            VarType::Uint16 => "uint16",
            VarType::Uint32 => "uint32",
            VarType::Float32 => "float32",
            VarType::Enum => "enum",
            VarType::StructMember => "struct-member",
        })
    }
}

/// Inclusive bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidRange {
    pub min: f64,
    pub max: f64,
}

impl ValidRange {
    #[must_use]
    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSchema {
    /// Logical name used by telemetry and fault patterns
    pub name: String,
    /// Target expression, when it differs from `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(rename = "type")]
    pub var_type: VarType,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enum_values: BTreeMap<i64, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_range: Option<ValidRange>,
    #[serde(default)]
    pub critical: bool,
}

impl VariableSchema {
    fn new(name: &str, expression: &str, var_type: VarType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            expression: (name != expression).then(|| expression.to_string()),
            var_type,
            description: description.to_string(),
            units: None,
            enum_values: BTreeMap::new(),
            valid_range: None,
            critical: false,
        }
    }

    fn units(mut self, units: &str) -> Self {
        self.units = Some(units.to_string());
        self
    }

    fn range(mut self, min: f64, max: f64) -> Self {
        self.valid_range = Some(ValidRange { min, max });
        self
    }

    fn labels(mut self, labels: &[(i64, &str)]) -> Self {
        self.enum_values = labels.iter().map(|(k, v)| (*k, (*v).to_string())).collect();
        self
    }

    fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    /// Target expression to evaluate for this variable
    #[must_use]
    pub fn target_expression(&self) -> &str {
        self.expression.as_deref().unwrap_or(&self.name)
    }

    /// Human-readable rendering: enum label or value with units
    #[must_use]
    pub fn describe(&self, value: &Value) -> String {
        if let Some(label) = value.as_i64().and_then(|v| self.enum_values.get(&v)) {
            return format!("{value} ({label})");
        }
        match &self.units {
            Some(units) if value.is_numeric() => format!("{value} {units}"),
            _ => value.to_string(),
        }
    }

    /// Reject numeric values outside `valid_range`
    ///
    /// # Errors
    /// `ProbeError::OutOfRange` naming the bounds
    pub fn check_range(&self, value: &Value) -> Result<(), ProbeError> {
        match (self.valid_range, value.as_f64()) {
            (Some(range), Some(v)) if !range.contains(v) => Err(ProbeError::OutOfRange {
                name: self.name.clone(),
                value: value.to_string(),
                min: range.min,
                max: range.max,
            }),
            _ => Ok(()),
        }
    }
}

/// Schemas, patterns and command codes for one firmware family
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBase {
    pub schemas: Vec<VariableSchema>,
    pub patterns: Vec<FaultPattern>,
    pub command_codes: BTreeMap<i64, String>,
}

impl KnowledgeBase {
    /// Parse an externally supplied knowledge table
    ///
    /// # Errors
    /// Malformed JSON or unknown type/operator/severity tags
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    #[must_use]
    pub fn schema(&self, name: &str) -> Option<&VariableSchema> {
        self.schemas.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub fn critical_variables(&self) -> Vec<&str> {
        self.schemas.iter().filter(|s| s.critical).map(|s| s.name.as_str()).collect()
    }

    /// Logical name → target expression, for names that differ
    #[must_use]
    pub fn aliases(&self) -> HashMap<String, String> {
        self.schemas
            .iter()
            .filter_map(|s| s.expression.as_ref().map(|e| (s.name.clone(), e.clone())))
            .collect()
    }

    #[must_use]
    pub fn fault_engine(&self) -> FaultEngine {
        FaultEngine::new(self.patterns.clone())
    }

    #[must_use]
    pub fn command_description(&self, code: i64) -> String {
        self.command_codes
            .get(&code)
            .cloned()
            .unwrap_or_else(|| format!("Unknown command ({code})"))
    }

    #[must_use]
    pub fn motor_state_description(&self, state: i64) -> String {
        self.schema("motorState")
            .and_then(|s| s.enum_values.get(&state))
            .cloned()
            .unwrap_or_else(|| format!("Unknown state ({state})"))
    }

    /// Built-in knowledge for the F280039C motor-control firmware
    #[must_use]
    pub fn motor_control() -> Self {
        Self { schemas: motor_schemas(), patterns: motor_patterns(), command_codes: command_codes() }
    }
}

fn motor_schemas() -> Vec<VariableSchema> {
    use VarType::{Bool, Enum, Float32, Uint16, Uint8};
    let m = |field: &str| format!("motorVars_M1.{field}");

    vec![
        VariableSchema::new("motorState", &m("motorState"), Enum, "Current motor control state")
            .labels(&[
                (0, "IDLE - Motor stopped, all control loops disabled"),
                (1, "ALIGNMENT - Motor performing alignment to determine rotor position"),
                (2, "CTRL_RUN - Motor control active, current control enabled"),
                (3, "CL_RUNNING - Closed loop position/speed control active"),
            ])
            .critical(),
        VariableSchema::new("positionRad", &m("absPosition_rad"), Float32, "Absolute motor position from encoder")
            .units("rad")
            .range(-6.28, 6.28)
            .critical(),
        VariableSchema::new("angleFocRad", &m("angleFOC_rad"), Float32, "Field-oriented control electrical angle")
            .units("rad")
            .range(0.0, 6.28)
            .critical(),
        VariableSchema::new("angleEncRad", &m("angleENC_rad"), Float32, "Encoder mechanical angle")
            .units("rad")
            .range(-6.28, 6.28)
            .critical(),
        VariableSchema::new("idAmps", &m("Idq_out_A.value[0]"), Float32, "D-axis (flux) current")
            .units("A")
            .range(-10.0, 10.0)
            .critical(),
        VariableSchema::new("iqAmps", &m("Idq_out_A.value[1]"), Float32, "Q-axis (torque) current")
            .units("A")
            .range(-10.0, 10.0)
            .critical(),
        VariableSchema::new("isRefAmps", &m("IsRef_A"), Float32, "Current reference magnitude")
            .units("A")
            .range(0.0, 10.0),
        VariableSchema::new("fluxCurrentAmps", &m("fluxCurrent_A"), Float32, "Flux current setting for torque capability")
            .units("A")
            .range(0.0, 5.0)
            .critical(),
        VariableSchema::new("alignCurrentAmps", &m("alignCurrent_A"), Float32, "Current used during alignment")
            .units("A")
            .range(0.0, 1.0),
        VariableSchema::new("enableSpeedCtrl", &m("enableSpeedCtrl"), Bool, "Speed control loop enable flag")
            .labels(&[(0, "Disabled"), (1, "Enabled")]),
        VariableSchema::new("reversePhases", &m("reversePhases"), Bool, "Motor phase reversal flag")
            .labels(&[(0, "Normal"), (1, "Reversed")]),
        VariableSchema::new("needsCalibration", &m("faultMtrNow.bit.needsCalibration"), Bool, "Motor calibration required flag")
            .labels(&[(0, "Calibrated"), (1, "Needs Calibration")])
            .critical(),
        VariableSchema::new("obakeNeedsInit", &m("faultMtrNow.bit.obakeNeedsInit"), Bool, "Motor initialization required flag")
            .labels(&[(0, "Initialized"), (1, "Needs Initialization")])
            .critical(),
        VariableSchema::new("faultWord", &m("faultMtrNow.all"), Uint16, "Complete fault status word").critical(),
        VariableSchema::new("debugEnabled", "debug_bypass.debug_enabled", Bool, "Debug bypass system enabled flag")
            .labels(&[(0, "Disabled"), (1, "Enabled")])
            .critical(),
        VariableSchema::new("bypassAlignmentCalled", "debug_bypass.bypass_alignment_called", Bool, "Bypass alignment procedure was called")
            .labels(&[(0, "Not Called"), (1, "Called")]),
        VariableSchema::new("bypassElectricalAngle", "debug_bypass.bypass_electrical_angle", Float32, "Electrical angle from bypass alignment")
            .units("rad")
            .range(0.0, 6.28),
        VariableSchema::new("csGpioPin", "debug_bypass.cs_gpio_pin", Uint8, "Chip select GPIO pin for encoder selection")
            .labels(&[(20, "Absolute encoder (AMS AS5048A)"), (21, "Quadrature encoder")]),
    ]
}

fn pattern(
    name: &str,
    description: &str,
    severity: Severity,
    conditions: Vec<Condition>,
    recommendations: &[&str],
) -> FaultPattern {
    FaultPattern {
        name: name.to_string(),
        description: description.to_string(),
        conditions,
        severity,
        recommendations: recommendations.iter().map(|r| (*r).to_string()).collect(),
    }
}

fn motor_patterns() -> Vec<FaultPattern> {
    vec![
        pattern(
            "motor_humming_bypass_alignment",
            "Motor hums but doesn't spin during bypass alignment",
            Severity::Warning,
            vec![
                Condition::eq("bypassAlignmentCalled", true),
                Condition::neq("bypassElectricalAngle", 0.0),
                Condition::eq("angleFocRad", 0.0),
                Condition::eq("motorState", 1_i64),
            ],
            &[
                "Initialize FOC angle with bypass electrical angle value",
                "Check if motor alignment current is appropriate (typically 0.1A)",
                "Verify encoder selection (pin 20 for absolute, pin 21 for quadrature)",
            ],
        ),
        pattern(
            "calibration_required",
            "Motor requires calibration before operation",
            Severity::Critical,
            vec![Condition::eq("needsCalibration", 1_i64)],
            &[
                "Run calibration sequence (commands 64-67) before attempting motor control",
                "Ensure motor is mechanically free to move during calibration",
                "Verify encoder connections and functionality",
            ],
        ),
        pattern(
            "initialization_required",
            "Motor system requires initialization",
            Severity::Critical,
            vec![Condition::eq("obakeNeedsInit", 1_i64)],
            &[
                "Send initialization command (command 84) to clear needsInit flag",
                "Verify system startup sequence completed properly",
                "Check for hardware initialization issues",
            ],
        ),
        pattern(
            "no_current_command",
            "Motor will not move - no current being commanded",
            Severity::Warning,
            vec![
                Condition::eq("idAmps", 0.0),
                Condition::eq("iqAmps", 0.0),
                Condition::gte("motorState", 2.0),
            ],
            &[
                "Enable debug bypass mode (debug_bypass.debug_enabled = 1)",
                "Set appropriate command in debug_bypass.command structure",
                "Verify flux current setting (fluxCurrentAmps > 0)",
            ],
        ),
        pattern(
            "encoder_position_inconsistency",
            "Absolute and incremental encoders show different positions",
            Severity::Warning,
            vec![Condition::diff_from("positionRad", "angleEncRad", 0.1)],
            &[
                "Check encoder calibration and zero position",
                "Verify encoder mechanical coupling",
                "Recalibrate encoder offset if necessary",
            ],
        ),
    ]
}

fn command_codes() -> BTreeMap<i64, String> {
    [
        (64, "Calibrate absolute position - Set encoder zero reference"),
        (65, "Calibrate torque offset - Determine motor torque constant"),
        (66, "Calibrate motor ADC - Calibrate current measurement offsets"),
        (67, "Calibrate motor direction - Determine motor rotation direction"),
        (71, "Position control command - Move to specific position"),
        (84, "Initialization command - Initialize motor control system"),
    ]
    .into_iter()
    .map(|(code, text)| (code, text.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_map_logical_names() {
        let kb = KnowledgeBase::motor_control();
        let aliases = kb.aliases();
        assert_eq!(aliases.get("motorState").map(String::as_str), Some("motorVars_M1.motorState"));
        assert_eq!(
            aliases.get("needsCalibration").map(String::as_str),
            Some("motorVars_M1.faultMtrNow.bit.needsCalibration")
        );
        assert_eq!(aliases.get("idAmps").map(String::as_str), Some("motorVars_M1.Idq_out_A.value[0]"));
    }

    #[test]
    fn test_critical_variables() {
        let kb = KnowledgeBase::motor_control();
        let critical = kb.critical_variables();
        assert!(critical.contains(&"motorState"));
        assert!(critical.contains(&"needsCalibration"));
        assert!(!critical.contains(&"csGpioPin"));
    }

    #[test]
    fn test_describe() {
        let kb = KnowledgeBase::motor_control();
        let state = kb.schema("motorState").unwrap();
        assert!(state.describe(&Value::Float(2.0)).starts_with("2 (CTRL_RUN"));
        assert_eq!(state.describe(&Value::Float(9.0)), "9");

        let id = kb.schema("idAmps").unwrap();
        assert_eq!(id.describe(&Value::Float(0.5)), "0.5 A");
    }

    #[test]
    fn test_check_range() {
        let kb = KnowledgeBase::motor_control();
        let flux = kb.schema("fluxCurrentAmps").unwrap();
        assert!(flux.check_range(&Value::Float(2.0)).is_ok());
        let err = flux.check_range(&Value::Float(7.5)).unwrap_err();
        assert!(err.to_string().starts_with("range error: fluxCurrentAmps = 7.5"));
        // No range declared
        assert!(kb.schema("motorState").unwrap().check_range(&Value::Float(99.0)).is_ok());
    }

    #[test]
    fn test_descriptions() {
        let kb = KnowledgeBase::motor_control();
        assert!(kb.command_description(84).starts_with("Initialization"));
        assert_eq!(kb.command_description(1), "Unknown command (1)");
        assert!(kb.motor_state_description(1).starts_with("ALIGNMENT"));
        assert_eq!(kb.motor_state_description(7), "Unknown state (7)");
    }

    #[test]
    fn test_json_round_trip_preserves_tables() {
        let kb = KnowledgeBase::motor_control();
        let json = serde_json::to_string(&kb).unwrap();
        let back = KnowledgeBase::from_json(&json).unwrap();
        assert_eq!(back.schemas, kb.schemas);
        assert_eq!(back.patterns, kb.patterns);
        assert_eq!(back.command_codes, kb.command_codes);
    }

    #[test]
    fn test_from_json_partial() {
        let kb = KnowledgeBase::from_json(
            r#"{"schemas": [{"name": "speed", "type": "float32", "description": "Rotor speed",
                             "units": "rpm", "valid_range": {"min": 0, "max": 3000}}]}"#,
        )
        .unwrap();
        assert_eq!(kb.schemas[0].target_expression(), "speed");
        assert!(kb.patterns.is_empty());
        assert!(kb.aliases().is_empty());
        assert!(KnowledgeBase::from_json(r#"{"schemas": [{"name": "x", "type": "double"}]}"#).is_err());
    }
}
