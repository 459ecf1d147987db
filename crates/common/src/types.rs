//! Core types for QADash run views

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Composite identity of a step: `(sheet, no)`.
///
/// A missing or blank sheet is its own bucket and orders before every named
/// sheet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepKey {
    pub sheet: Option<String>,
    pub no: i64,
}

impl StepKey {
    pub fn new(sheet: Option<&str>, no: i64) -> Self {
        Self {
            sheet: normalize_sheet(sheet),
            no,
        }
    }

    /// Serialized form used as `StepRecord::id`, e.g. `Login#3` or `#1`.
    pub fn id(&self) -> String {
        format!("{}#{}", self.sheet.as_deref().unwrap_or(""), self.no)
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Collapse blank sheet names into the unnamed bucket.
pub fn normalize_sheet(sheet: Option<&str>) -> Option<String> {
    sheet
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StepResult {
    #[default]
    Unknown,
    Ok,
    Fail,
    Skip,
}

impl StepResult {
    /// Lenient parse used for reports produced by older runners.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "ok" | "pass" | "passed" | "success" => StepResult::Ok,
            "fail" | "failed" | "error" => StepResult::Fail,
            "skip" | "skipped" => StepResult::Skip,
            _ => StepResult::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepResult::Unknown => "unknown",
            StepResult::Ok => "ok",
            StepResult::Fail => "fail",
            StepResult::Skip => "skip",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, StepResult::Unknown)
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StepResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StepResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(StepResult::parse).unwrap_or_default())
    }
}

/// A step field that is either structured (`{by, value}`, `{expr, ...}`) or
/// a raw string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StructuredField {
    Object(Map<String, Value>),
    Text(String),
}

impl StructuredField {
    /// Convert an arbitrary JSON value. Null and blank strings yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Object(map) => Some(StructuredField::Object(map.clone())),
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(StructuredField::Text(s.clone())),
            other => Some(StructuredField::Text(other.to_string())),
        }
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            StructuredField::Object(map) => Some(map),
            StructuredField::Text(_) => None,
        }
    }
}

impl fmt::Display for StructuredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuredField::Text(s) => f.write_str(s),
            StructuredField::Object(map) => {
                if let (Some(by), Some(value)) = (map.get("by"), map.get("value")) {
                    return write!(f, "{}={}", display_scalar(by), display_scalar(value));
                }
                if let Some(expr) = map.get("expr") {
                    return f.write_str(&display_scalar(expr));
                }
                write!(f, "{}", Value::Object(map.clone()))
            }
        }
    }
}

fn display_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical per-step state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    pub no: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Action kind (`tap`, `input`, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<StructuredField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_if: Option<StructuredField>,
    #[serde(default)]
    pub result: StepResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok_image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_image_path: Option<String>,
}

impl StepRecord {
    /// Empty record for a key
    pub fn new(key: &StepKey) -> Self {
        Self {
            id: key.id(),
            sheet: key.sheet.clone(),
            no: key.no,
            name: None,
            kind: None,
            selector: None,
            visible_if: None,
            result: StepResult::Unknown,
            reason: None,
            elapsed_ms: None,
            evidence_path: None,
            ok_image_path: None,
            fail_image_path: None,
        }
    }

    pub fn key(&self) -> StepKey {
        StepKey::new(self.sheet.as_deref(), self.no)
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    Running,
    Pass,
    Fail,
}

impl RunStatus {
    /// Lenient parse for status strings found in reports.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" | "in_progress" | "pending" => Some(RunStatus::Running),
            "pass" | "passed" | "ok" | "success" => Some(RunStatus::Pass),
            "fail" | "failed" | "error" => Some(RunStatus::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Pass => write!(f, "PASS"),
            RunStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// Run-level metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub run_id: String,
    pub status: RunStatus,
    pub elapsed_ms: Option<u64>,
}

/// Live channel connectivity as seen by the host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    pub connected: bool,
    pub last_error: Option<String>,
}

impl ConnectivityState {
    pub fn open() -> Self {
        Self {
            connected: true,
            last_error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            last_error: Some(error.into()),
        }
    }
}

/// Output surface handed to the UI collaborator
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshot {
    /// Steps ordered by `(sheet, no)`
    pub steps: Vec<StepRecord>,
    pub meta: RunMeta,
    pub raw_lines: Vec<String>,
    pub connected: bool,
    pub error: Option<String>,
    /// Set once the ingestion source declared completion
    pub terminal: bool,
}

impl RunSnapshot {
    pub fn step(&self, sheet: Option<&str>, no: i64) -> Option<&StepRecord> {
        let key = StepKey::new(sheet, no);
        self.steps.iter().find(|s| s.key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_sheet_shares_unnamed_bucket() {
        assert_eq!(StepKey::new(None, 1), StepKey::new(Some(""), 1));
        assert_eq!(StepKey::new(Some("  "), 1).sheet, None);
        assert_ne!(StepKey::new(None, 1), StepKey::new(Some("A"), 1));
    }

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![
            StepKey::new(Some("B"), 1),
            StepKey::new(Some("A"), 10),
            StepKey::new(Some("A"), 2),
            StepKey::new(None, 5),
        ];
        keys.sort();
        let ids: Vec<String> = keys.iter().map(StepKey::id).collect();
        assert_eq!(ids, vec!["#5", "A#2", "A#10", "B#1"]);
    }

    #[test]
    fn test_step_result_lenient_parse() {
        assert_eq!(StepResult::parse("PASSED"), StepResult::Ok);
        assert_eq!(StepResult::parse("failed"), StepResult::Fail);
        assert_eq!(StepResult::parse("Skip"), StepResult::Skip);
        assert_eq!(StepResult::parse("???"), StepResult::Unknown);
    }

    #[test]
    fn test_record_wire_shape() {
        let mut record = StepRecord::new(&StepKey::new(Some("Login"), 2));
        record.kind = Some("tap".to_string());
        record.result = StepResult::Fail;
        record.evidence_path = Some("/e.png".to_string());

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "Login#2");
        assert_eq!(value["type"], "tap");
        assert_eq!(value["result"], "fail");
        assert_eq!(value["evidencePath"], "/e.png");
        assert!(value.get("failImagePath").is_none());

        let back: StepRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_null_result_deserializes_as_unknown() {
        let record: StepRecord =
            serde_json::from_value(json!({"id": "#1", "no": 1, "result": null})).unwrap();
        assert_eq!(record.result, StepResult::Unknown);
    }

    #[test]
    fn test_structured_field_display() {
        let selector = StructuredField::from_value(&json!({"by": "id", "value": "login"})).unwrap();
        assert_eq!(selector.to_string(), "id=login");
        let cond = StructuredField::from_value(&json!({"expr": "a > 1"})).unwrap();
        assert_eq!(cond.to_string(), "a > 1");
        assert!(StructuredField::from_value(&json!("  ")).is_none());
        assert!(StructuredField::from_value(&Value::Null).is_none());
    }

    #[test]
    fn test_run_status_wire_names() {
        assert_eq!(serde_json::to_value(RunStatus::Running).unwrap(), "RUNNING");
        assert_eq!(RunStatus::parse("passed"), Some(RunStatus::Pass));
        assert_eq!(RunStatus::parse("bogus"), None);
    }
}
