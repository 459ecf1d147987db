//! Event normalization
//!
//! Every inbound item, whether a structured object, a JSON-encoded string,
//! a `[LEVEL] message` line, a compact `STEP_OK no=3` line or free text,
//! becomes exactly one [`Signal`]. Malformed input never errors; it degrades
//! to [`Signal::Raw`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use qadash_common::{normalize_sheet, StepResult, StructuredField};

use crate::merge::{merge_cond, PathWrite, StepPatch};

static LEVEL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\[(INFO|WARN|WARNING|ERROR|FAIL|DEBUG)\]\s*(.*)$").expect("valid level regex")
});

/// One raw inbound item
#[derive(Debug, Clone, PartialEq)]
pub enum InboundItem {
    Text(String),
    Object(Map<String, Value>),
}

impl InboundItem {
    /// Line recorded in the log tail for this item
    pub fn log_line(&self) -> String {
        match self {
            InboundItem::Text(text) => text.clone(),
            InboundItem::Object(map) => serde_json::to_string(map).unwrap_or_default(),
        }
    }
}

impl From<Value> for InboundItem {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => InboundItem::Object(map),
            Value::String(text) => InboundItem::Text(text),
            other => InboundItem::Text(other.to_string()),
        }
    }
}

impl From<String> for InboundItem {
    fn from(text: String) -> Self {
        InboundItem::Text(text)
    }
}

impl From<&str> for InboundItem {
    fn from(text: &str) -> Self {
        InboundItem::Text(text.to_string())
    }
}

/// Event type carried in the `type` field. Unknown names map to `Raw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StepStart,
    StepOk,
    StepFail,
    StepSkip,
    SheetStart,
    SheetEnd,
    RunExit,
    Artifact,
    Log,
    Raw,
}

impl EventKind {
    pub fn parse(value: &str) -> Self {
        Self::recognize(value).unwrap_or(EventKind::Raw)
    }

    fn recognize(value: &str) -> Option<Self> {
        let kind = match value.trim().to_ascii_uppercase().as_str() {
            "STEP_START" => EventKind::StepStart,
            "STEP_OK" => EventKind::StepOk,
            "STEP_FAIL" => EventKind::StepFail,
            "STEP_SKIP" => EventKind::StepSkip,
            "SHEET_START" => EventKind::SheetStart,
            "SHEET_END" => EventKind::SheetEnd,
            "RUN_EXIT" => EventKind::RunExit,
            "ARTIFACT" => EventKind::Artifact,
            "LOG" => EventKind::Log,
            "RAW" => EventKind::Raw,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StepStart => "STEP_START",
            EventKind::StepOk => "STEP_OK",
            EventKind::StepFail => "STEP_FAIL",
            EventKind::StepSkip => "STEP_SKIP",
            EventKind::SheetStart => "SHEET_START",
            EventKind::SheetEnd => "SHEET_END",
            EventKind::RunExit => "RUN_EXIT",
            EventKind::Artifact => "ARTIFACT",
            EventKind::Log => "LOG",
            EventKind::Raw => "RAW",
        }
    }
}

/// Level of a `[LEVEL] message` line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fail,
}

impl LogLevel {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => LogLevel::Debug,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            "FAIL" => LogLevel::Fail,
            _ => LogLevel::Info,
        }
    }
}

/// Run-level signals that do not target a single step
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSignal {
    Log { level: LogLevel, message: String },
    SheetStart { sheet: Option<String> },
    SheetEnd { sheet: Option<String> },
    RunExit { elapsed_ms: Option<u64> },
}

/// Normalized form of one inbound item
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Patch(StepPatch),
    Control(ControlSignal),
    /// A run-level signal that also carries timing or a success image for a step
    ControlWithStep(ControlSignal, StepPatch),
    Raw(String),
}

/// Normalize one inbound item.
pub fn normalize(item: &InboundItem) -> Signal {
    match item {
        InboundItem::Object(map) => normalize_object(map),
        InboundItem::Text(text) => normalize_text(text),
    }
}

fn normalize_text(text: &str) -> Signal {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            return normalize_object(&map);
        }
    }

    if let Some(caps) = LEVEL_LINE.captures(trimmed) {
        return Signal::Control(ControlSignal::Log {
            level: LogLevel::parse(&caps[1]),
            message: caps[2].to_string(),
        });
    }

    if let Some(map) = parse_compact_line(trimmed) {
        return normalize_object(&map);
    }

    Signal::Raw(text.to_string())
}

/// Parse `STEP_FAIL no=2 reason=Element not found` into a flattened event.
///
/// A value extends over following words until the next `key=` token. Words
/// before the first key become `msg`.
fn parse_compact_line(line: &str) -> Option<Map<String, Value>> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    let kind = EventKind::recognize(first)?;
    // Event names are upper-case on the wire; `log rotated` is ordinary text.
    if kind == EventKind::Raw || first != kind.as_str() {
        return None;
    }

    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(kind.as_str().to_string()));

    let mut leading: Vec<&str> = Vec::new();
    let mut current: Option<(String, String)> = None;
    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) if is_field_key(key) => {
                if let Some((k, v)) = current.take() {
                    insert_compact(&mut map, k, v);
                }
                current = Some((key.to_string(), value.to_string()));
            }
            _ => match current.as_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(token);
                }
                None => leading.push(token),
            },
        }
    }
    if let Some((k, v)) = current.take() {
        insert_compact(&mut map, k, v);
    }
    if !leading.is_empty() && !map.contains_key("msg") {
        map.insert("msg".to_string(), Value::String(leading.join(" ")));
    }

    Some(map)
}

fn insert_compact(map: &mut Map<String, Value>, key: String, value: String) {
    // `type` names the event itself, so a step's action kind travels as `stepType`.
    let key = if key == "type" { "stepType".to_string() } else { key };
    map.insert(key, Value::String(value));
}

fn is_field_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn normalize_object(map: &Map<String, Value>) -> Signal {
    let kind = map
        .get("type")
        .and_then(Value::as_str)
        .map(EventKind::parse)
        .unwrap_or(EventKind::Raw);
    let fields = EventFields::new(map);

    let control = match kind {
        EventKind::StepStart | EventKind::StepOk | EventKind::StepFail | EventKind::StepSkip => {
            return Signal::Patch(fields.step_patch(kind));
        }
        EventKind::Artifact => return Signal::Patch(fields.artifact_patch()),
        EventKind::SheetStart => ControlSignal::SheetStart {
            sheet: fields.sheet(),
        },
        EventKind::SheetEnd => ControlSignal::SheetEnd {
            sheet: fields.sheet(),
        },
        EventKind::RunExit => ControlSignal::RunExit {
            elapsed_ms: fields.elapsed_ms(),
        },
        EventKind::Log => ControlSignal::Log {
            level: fields
                .event_text("level")
                .map(|l| LogLevel::parse(&l))
                .unwrap_or(LogLevel::Info),
            message: fields.message().unwrap_or_default(),
        },
        EventKind::Raw => {
            return match fields.metadata_patch() {
                Some(patch) => Signal::Patch(patch),
                None => Signal::Raw(
                    fields
                        .message()
                        .unwrap_or_else(|| serde_json::to_string(map).unwrap_or_default()),
                ),
            };
        }
    };

    match fields.metadata_patch() {
        Some(patch) => Signal::ControlWithStep(control, patch),
        None => Signal::Control(control),
    }
}

/// Field lookup across the nested (`step`, `error`, `extra`) and flattened
/// shapes of an event.
struct EventFields<'a> {
    event: &'a Map<String, Value>,
    step: Option<&'a Map<String, Value>>,
    error: Option<&'a Value>,
    extra: Option<&'a Map<String, Value>>,
}

impl<'a> EventFields<'a> {
    fn new(event: &'a Map<String, Value>) -> Self {
        Self {
            event,
            step: event.get("step").and_then(Value::as_object),
            error: event.get("error"),
            extra: event.get("extra").and_then(Value::as_object),
        }
    }

    fn in_event(&self, key: &str) -> Option<&'a Value> {
        self.event.get(key)
    }

    fn in_step(&self, key: &str) -> Option<&'a Value> {
        self.step.and_then(|s| s.get(key))
    }

    fn in_error(&self, key: &str) -> Option<&'a Value> {
        self.error.and_then(Value::as_object).and_then(|e| e.get(key))
    }

    fn in_extra(&self, key: &str) -> Option<&'a Value> {
        self.extra.and_then(|e| e.get(key))
    }

    fn event_text(&self, key: &str) -> Option<String> {
        self.in_event(key).and_then(text)
    }

    fn no(&self) -> Option<i64> {
        [
            self.in_step("no"),
            self.in_event("no"),
            self.in_event("stepNo"),
            self.in_step("stepNo"),
        ]
        .into_iter()
        .flatten()
        .find_map(int)
    }

    fn sheet(&self) -> Option<String> {
        let sheet = first_text(&[
            self.in_event("sheet"),
            self.in_step("sheet"),
            self.in_event("sheetName"),
        ]);
        normalize_sheet(sheet.as_deref())
    }

    fn elapsed_ms(&self) -> Option<u64> {
        [
            self.in_step("ms"),
            self.in_event("elapsedMs"),
            self.in_event("ms"),
            self.in_step("elapsedMs"),
        ]
        .into_iter()
        .flatten()
        .find_map(millis)
    }

    fn message(&self) -> Option<String> {
        first_text(&[
            self.in_event("msg"),
            self.in_event("message"),
            self.in_event("text"),
        ])
    }

    fn fail_image(&self) -> Option<String> {
        first_text(&[
            self.in_event("failImg"),
            self.in_event("failImagePath"),
            self.in_error("failImg"),
            self.in_step("failImg"),
        ])
    }

    /// Key plus the metadata copied from every step-bearing event.
    fn base_patch(&self) -> StepPatch {
        StepPatch {
            sheet: self.sheet(),
            no: self.no(),
            elapsed_ms: self.elapsed_ms(),
            ok_image_path: first_text(&[
                self.in_event("okImg"),
                self.in_event("okImagePath"),
                self.in_step("okImg"),
            ]),
            ..Default::default()
        }
    }

    /// Timing and success screenshots are taken from any event that names a step.
    fn metadata_patch(&self) -> Option<StepPatch> {
        let patch = self.base_patch();
        let annotated = patch.elapsed_ms.is_some() || patch.ok_image_path.is_some();
        (patch.no.is_some() && annotated).then_some(patch)
    }

    fn step_patch(&self, kind: EventKind) -> StepPatch {
        let mut patch = self.base_patch();

        patch.name = first_text(&[
            self.in_step("name"),
            self.in_event("name"),
            self.in_event("stepName"),
        ]);
        patch.kind = first_text(&[
            self.in_step("type"),
            self.in_event("stepType"),
            self.in_event("action"),
            self.in_step("action"),
        ]);
        patch.selector = self.selector();
        patch.visible_if = self.visible_if();

        patch.result = match kind {
            EventKind::StepOk => Some(StepResult::Ok),
            EventKind::StepFail => Some(StepResult::Fail),
            EventKind::StepSkip => Some(StepResult::Skip),
            _ => None,
        };

        if kind == EventKind::StepFail {
            patch.reason = first_text(&[
                self.in_error("reason"),
                self.error.filter(|e| e.is_string()),
                self.in_event("reason"),
                self.in_step("reason"),
                self.in_extra("reason"),
                self.in_event("msg"),
            ]);
            patch.evidence_path = first_text(&[
                self.in_error("evidencePath"),
                self.in_event("evidencePath"),
                self.in_step("evidencePath"),
                self.in_extra("evidencePath"),
            ])
            .map(PathWrite::Replace);
            patch.fail_image_path = self.fail_image().map(PathWrite::Replace);
        }

        patch
    }

    /// Artifacts only fill evidence slots that are still empty, so a generic
    /// upload never replaces the screenshot captured by `STEP_FAIL`.
    fn artifact_patch(&self) -> StepPatch {
        let mut patch = self.base_patch();
        patch.evidence_path = first_text(&[
            self.in_event("evidencePath"),
            self.in_event("path"),
            self.in_event("url"),
            self.in_extra("evidencePath"),
        ])
        .map(PathWrite::FillEmpty);
        patch.fail_image_path = self.fail_image().map(PathWrite::FillEmpty);
        patch
    }

    fn selector(&self) -> Option<StructuredField> {
        let mut selector = [self.in_step("selector"), self.in_event("selector")]
            .into_iter()
            .flatten()
            .find_map(StructuredField::from_value);

        let by = first_text(&[self.in_step("by"), self.in_event("by")]);
        let value = first_text(&[self.in_step("value"), self.in_event("value")]);
        if by.is_none() && value.is_none() {
            return selector;
        }

        match selector.as_mut() {
            Some(StructuredField::Text(_)) => {}
            Some(StructuredField::Object(map)) => {
                if let Some(by) = by {
                    map.entry("by").or_insert(Value::String(by));
                }
                if let Some(value) = value {
                    map.entry("value").or_insert(Value::String(value));
                }
            }
            None => {
                let mut map = Map::new();
                if let Some(by) = by {
                    map.insert("by".to_string(), Value::String(by));
                }
                if let Some(value) = value {
                    map.insert("value".to_string(), Value::String(value));
                }
                selector = Some(StructuredField::Object(map));
            }
        }
        selector
    }

    fn visible_if(&self) -> Option<StructuredField> {
        let mut visible_if = [self.in_step("visibleIf"), self.in_event("visibleIf")]
            .into_iter()
            .flatten()
            .find_map(StructuredField::from_value);

        let has_expr = match &visible_if {
            Some(StructuredField::Object(map)) => map.contains_key("expr"),
            Some(StructuredField::Text(_)) => true,
            None => false,
        };
        if !has_expr {
            if let Some(cond) = first_text(&[self.in_step("cond"), self.in_event("cond")]) {
                merge_cond(&mut visible_if, &cond);
            }
        }
        visible_if
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_text(candidates: &[Option<&Value>]) -> Option<String> {
    candidates.iter().flatten().find_map(|v| text(v))
}

fn int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

fn millis(value: &Value) -> Option<u64> {
    let ms = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (ms.is_finite() && ms >= 0.0).then(|| ms.round() as u64)
}
