//! Typed schemas for the JSON decision-carrier artifacts.
//!
//! Markdown siblings are never parsed for control flow; every decision the
//! orchestrator makes is driven by these three metadata documents. Parsing
//! is strict: required fields are checked on the raw JSON value first so a
//! failure reports the JSON path of every offending field at once.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SchemaViolation, ValidationError};

/// Current artifact schema version. Engines must emit exactly this.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum length of a plan summary in characters.
pub const MAX_SUMMARY_CHARS: usize = 3_000;

// ============================================================================
// Plan metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    pub schema_version: String,
    /// Plan confidence in [0, 100].
    pub confidence: u8,
    pub open_questions: Vec<String>,
    pub summary: String,
}

impl PlanMetadata {
    pub fn has_open_questions(&self) -> bool {
        !self.open_questions.is_empty()
    }
}

// ============================================================================
// Execute metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardBlocker {
    pub description: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteMetadata {
    pub schema_version: String,
    pub has_follow_ups: bool,
    pub hard_blockers: Vec<HardBlocker>,
    pub summary: String,
}

impl ExecuteMetadata {
    pub fn has_hard_blockers(&self) -> bool {
        !self.hard_blockers.is_empty()
    }
}

// ============================================================================
// Gap audit metadata
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapAuditMetadata {
    pub schema_version: String,
    pub gaps_identified: bool,
    pub summary: String,
}

// ============================================================================
// Field checks
// ============================================================================

fn check_schema_version(value: &Value, violations: &mut Vec<SchemaViolation>) {
    match value.get("schemaVersion") {
        None => violations.push(SchemaViolation::new(
            "$.schemaVersion",
            "missing required field",
        )),
        Some(Value::String(v)) if v == SCHEMA_VERSION => {}
        Some(Value::String(v)) => violations.push(SchemaViolation::new(
            "$.schemaVersion",
            format!("unsupported version '{v}', expected '{SCHEMA_VERSION}'"),
        )),
        Some(_) => violations.push(SchemaViolation::new("$.schemaVersion", "must be a string")),
    }
}

fn check_string(value: &Value, field: &str, violations: &mut Vec<SchemaViolation>) {
    match value.get(field) {
        None => violations.push(SchemaViolation::new(
            format!("$.{field}"),
            "missing required field",
        )),
        Some(Value::String(_)) => {}
        Some(_) => violations.push(SchemaViolation::new(
            format!("$.{field}"),
            "must be a string",
        )),
    }
}

fn check_bool(value: &Value, field: &str, violations: &mut Vec<SchemaViolation>) {
    match value.get(field) {
        None => violations.push(SchemaViolation::new(
            format!("$.{field}"),
            "missing required field",
        )),
        Some(Value::Bool(_)) => {}
        Some(_) => violations.push(SchemaViolation::new(
            format!("$.{field}"),
            "must be a boolean",
        )),
    }
}

fn parse_value(text: &str, context: &str) -> Result<Value, ValidationError> {
    serde_json::from_str(text)
        .map_err(|e| ValidationError::single(context, "$", format!("invalid JSON: {e}")))
}

fn finish<T: serde::de::DeserializeOwned>(
    value: Value,
    context: &str,
    violations: Vec<SchemaViolation>,
) -> Result<T, ValidationError> {
    if !violations.is_empty() {
        return Err(ValidationError::new(context, violations));
    }
    serde_json::from_value(value)
        .map_err(|e| ValidationError::single(context, "$", format!("deserialization failed: {e}")))
}

// ============================================================================
// Parse + validate
// ============================================================================

/// Parse `plan-metadata.json`, reporting every violated field.
pub fn parse_plan_metadata(text: &str) -> Result<PlanMetadata, ValidationError> {
    let context = "plan-metadata.json";
    let value = parse_value(text, context)?;
    let mut violations = Vec::new();

    check_schema_version(&value, &mut violations);
    check_string(&value, "summary", &mut violations);

    match value.get("confidence") {
        None => violations.push(SchemaViolation::new(
            "$.confidence",
            "missing required field",
        )),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(c) if c <= 100 => {}
            _ => violations.push(SchemaViolation::new(
                "$.confidence",
                "must be an integer in [0, 100]",
            )),
        },
        Some(_) => violations.push(SchemaViolation::new(
            "$.confidence",
            "must be an integer in [0, 100]",
        )),
    }

    match value.get("openQuestions") {
        None => violations.push(SchemaViolation::new(
            "$.openQuestions",
            "missing required field",
        )),
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    violations.push(SchemaViolation::new(
                        format!("$.openQuestions[{i}]"),
                        "must be a string",
                    ));
                }
            }
        }
        Some(_) => violations.push(SchemaViolation::new(
            "$.openQuestions",
            "must be an array of strings",
        )),
    }

    if let Some(Value::String(summary)) = value.get("summary") {
        let chars = summary.chars().count();
        if chars == 0 || chars > MAX_SUMMARY_CHARS {
            violations.push(SchemaViolation::new(
                "$.summary",
                format!("length must be in [1, {MAX_SUMMARY_CHARS}] characters, got {chars}"),
            ));
        }
    }

    finish(value, context, violations)
}

/// Parse `execute-metadata.json`, reporting every violated field.
pub fn parse_execute_metadata(text: &str) -> Result<ExecuteMetadata, ValidationError> {
    let context = "execute-metadata.json";
    let value = parse_value(text, context)?;
    let mut violations = Vec::new();

    check_schema_version(&value, &mut violations);
    check_bool(&value, "hasFollowUps", &mut violations);
    check_string(&value, "summary", &mut violations);

    match value.get("hardBlockers") {
        None => violations.push(SchemaViolation::new(
            "$.hardBlockers",
            "missing required field",
        )),
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                for field in ["description", "reason"] {
                    match item.get(field) {
                        Some(Value::String(s)) if !s.trim().is_empty() => {}
                        Some(Value::String(_)) => violations.push(SchemaViolation::new(
                            format!("$.hardBlockers[{i}].{field}"),
                            "must not be empty",
                        )),
                        _ => violations.push(SchemaViolation::new(
                            format!("$.hardBlockers[{i}].{field}"),
                            "missing or not a string",
                        )),
                    }
                }
            }
        }
        Some(_) => violations.push(SchemaViolation::new(
            "$.hardBlockers",
            "must be an array",
        )),
    }

    finish(value, context, violations)
}

/// Parse `gap-audit-metadata.json`, reporting every violated field.
pub fn parse_gap_audit_metadata(text: &str) -> Result<GapAuditMetadata, ValidationError> {
    let context = "gap-audit-metadata.json";
    let value = parse_value(text, context)?;
    let mut violations = Vec::new();

    check_schema_version(&value, &mut violations);
    check_bool(&value, "gapsIdentified", &mut violations);
    check_string(&value, "summary", &mut violations);

    finish(value, context, violations)
}

/// Serialize any metadata document the way engines are expected to.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, ValidationError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ValidationError::single("artifact", "$", format!("serialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(confidence: u8, open_questions: Vec<&str>, summary: &str) -> PlanMetadata {
        PlanMetadata {
            schema_version: SCHEMA_VERSION.to_string(),
            confidence,
            open_questions: open_questions.into_iter().map(String::from).collect(),
            summary: summary.to_string(),
        }
    }

    #[test]
    fn test_plan_metadata_round_trip() {
        let original = plan(87, vec!["Which db?"], "Refactor the cache layer");
        let text = to_pretty_json(&original).unwrap();
        let parsed = parse_plan_metadata(&text).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_plan_metadata_rejects_out_of_range_confidence() {
        let text = r#"{"schemaVersion":"1.0.0","confidence":150,"openQuestions":[],"summary":"x"}"#;
        let err = parse_plan_metadata(text).unwrap_err();
        assert!(err.violations.iter().any(|v| v.path == "$.confidence"));
    }

    #[test]
    fn test_plan_metadata_rejects_oversized_summary() {
        let long = "x".repeat(MAX_SUMMARY_CHARS + 1);
        let text = format!(
            r#"{{"schemaVersion":"1.0.0","confidence":50,"openQuestions":[],"summary":"{long}"}}"#
        );
        let err = parse_plan_metadata(&text).unwrap_err();
        assert!(err.violations.iter().any(|v| v.path == "$.summary"));
    }

    #[test]
    fn test_plan_metadata_reports_every_missing_field() {
        let err = parse_plan_metadata("{}").unwrap_err();
        let paths: Vec<&str> = err.violations.iter().map(|v| v.path.as_str()).collect();
        assert!(paths.contains(&"$.schemaVersion"));
        assert!(paths.contains(&"$.confidence"));
        assert!(paths.contains(&"$.openQuestions"));
        assert!(paths.contains(&"$.summary"));
    }

    #[test]
    fn test_plan_metadata_rejects_wrong_schema_version() {
        let text = r#"{"schemaVersion":"2.0.0","confidence":50,"openQuestions":[],"summary":"x"}"#;
        let err = parse_plan_metadata(text).unwrap_err();
        assert!(err.violations.iter().any(|v| v.path == "$.schemaVersion"));
    }

    #[test]
    fn test_execute_metadata_round_trip() {
        let original = ExecuteMetadata {
            schema_version: SCHEMA_VERSION.to_string(),
            has_follow_ups: true,
            hard_blockers: vec![HardBlocker {
                description: "Needs prod credentials".to_string(),
                reason: "deploy step requires access".to_string(),
            }],
            summary: "Implemented the parser".to_string(),
        };
        let text = to_pretty_json(&original).unwrap();
        assert_eq!(parse_execute_metadata(&text).unwrap(), original);
    }

    #[test]
    fn test_execute_metadata_rejects_empty_blocker_fields() {
        let text = r#"{
            "schemaVersion": "1.0.0",
            "hasFollowUps": false,
            "hardBlockers": [{"description": "stuck", "reason": "  "}],
            "summary": "done"
        }"#;
        let err = parse_execute_metadata(text).unwrap_err();
        assert!(
            err.violations
                .iter()
                .any(|v| v.path == "$.hardBlockers[0].reason"),
            "violations: {:?}",
            err.violations
        );
    }

    #[test]
    fn test_execute_metadata_rejects_non_bool_follow_ups() {
        let text = r#"{"schemaVersion":"1.0.0","hasFollowUps":"yes","hardBlockers":[],"summary":"s"}"#;
        let err = parse_execute_metadata(text).unwrap_err();
        assert!(err.violations.iter().any(|v| v.path == "$.hasFollowUps"));
    }

    #[test]
    fn test_gap_audit_metadata_round_trip() {
        let original = GapAuditMetadata {
            schema_version: SCHEMA_VERSION.to_string(),
            gaps_identified: false,
            summary: "No gaps against the plan".to_string(),
        };
        let text = to_pretty_json(&original).unwrap();
        assert_eq!(parse_gap_audit_metadata(&text).unwrap(), original);
    }

    #[test]
    fn test_invalid_json_reports_root_path() {
        let err = parse_gap_audit_metadata("{not json").unwrap_err();
        assert_eq!(err.violations[0].path, "$");
    }
}
