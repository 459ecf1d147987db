//! One-shot replay of an already captured run log

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::normalizer::InboundItem;
use crate::view::RunViewHandle;

/// Captured log payload, resolved once at the ingestion boundary
#[derive(Debug, Clone, PartialEq)]
pub enum LogSource {
    /// Newline separated text
    Text(String),
    Lines(Vec<InboundItem>),
    /// A single structured payload
    Object(Map<String, Value>),
}

/// Keys under which a structured payload may carry its lines
const LINE_KEYS: &[&str] = &["rawLines", "lines", "events", "log"];

impl LogSource {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(text) => LogSource::Text(text),
            Value::Array(items) => LogSource::Lines(items.into_iter().map(InboundItem::from).collect()),
            Value::Object(map) => LogSource::Object(map),
            Value::Null => LogSource::Lines(Vec::new()),
            other => LogSource::Text(other.to_string()),
        }
    }

    /// Interpret file contents: a JSON array or object when it parses as one,
    /// plain text otherwise.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim_start();
        if trimmed.starts_with('[') || trimmed.starts_with('{') {
            match serde_json::from_str::<Value>(&text) {
                Ok(value @ (Value::Array(_) | Value::Object(_))) => return Self::from_value(value),
                _ => debug!("log payload looks like JSON but does not parse, using text"),
            }
        }
        LogSource::Text(text)
    }

    /// Flatten into the ordered item list fed to the normalizer.
    pub fn into_items(self) -> Vec<InboundItem> {
        match self {
            LogSource::Text(text) => split_lines(&text),
            LogSource::Lines(items) => items.into_iter().filter(|item| !is_blank(item)).collect(),
            LogSource::Object(mut map) => {
                let key = LINE_KEYS.iter().find(|key| {
                    matches!(map.get(**key), Some(Value::Array(_)) | Some(Value::String(_)))
                });
                match key.and_then(|key| map.remove(*key)) {
                    Some(value) => Self::from_value(value).into_items(),
                    None => vec![InboundItem::Object(map)],
                }
            }
        }
    }
}

fn split_lines(text: &str) -> Vec<InboundItem> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(InboundItem::from)
        .collect()
}

fn is_blank(item: &InboundItem) -> bool {
    matches!(item, InboundItem::Text(text) if text.trim().is_empty())
}

/// Feeds a captured log through the pipeline in one synchronous pass
#[derive(Debug, Clone)]
pub struct StaticLogChannel {
    source: LogSource,
}

impl StaticLogChannel {
    pub fn new(source: LogSource) -> Self {
        Self { source }
    }

    /// Reset the view, ingest every line and finalize. Returns the line count.
    pub fn run(self, handle: &mut RunViewHandle) -> usize {
        let items = self.source.into_items();
        let count = items.len();

        handle.update(|view| {
            view.reset();
            for item in items {
                view.ingest(item, true);
            }
            view.finalize();
        });

        info!(run_id = %handle.view().run_id(), lines = count, "static log replayed");
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::RunView;
    use qadash_common::{RunStatus, StepResult};
    use serde_json::json;

    #[test]
    fn test_text_source_splits_lines() {
        let source = LogSource::from_text("STEP_OK no=1\r\n\n  \n[INFO] done\n");
        assert_eq!(
            source.into_items(),
            vec![InboundItem::from("STEP_OK no=1"), InboundItem::from("[INFO] done")]
        );
    }

    #[test]
    fn test_json_array_source() {
        let source = LogSource::from_text(r#"["STEP_OK no=1", {"type": "STEP_FAIL", "no": 2}, ""]"#);
        let items = source.into_items();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], InboundItem::Object(_)));
    }

    #[test]
    fn test_object_source() {
        let wrapped = LogSource::from_value(json!({"runId": "r1", "rawLines": ["a", "b"]}));
        assert_eq!(wrapped.into_items().len(), 2);

        let single = LogSource::from_value(json!({"type": "STEP_OK", "no": 4}));
        assert_eq!(single.into_items().len(), 1);
    }

    #[test]
    fn test_broken_json_is_text() {
        let source = LogSource::from_text("[INFO] starting\nSTEP_OK no=1");
        assert!(matches!(source, LogSource::Text(_)));
        assert_eq!(source.into_items().len(), 2);
    }

    #[test]
    fn test_replay_resets_and_finalizes() {
        let (mut handle, rx) = RunViewHandle::new(RunView::new("static-1", 2000));
        handle.update(|v| v.ingest(InboundItem::from("STEP_FAIL no=9"), true));

        let count = StaticLogChannel::new(LogSource::from_text(
            "STEP_START no=1 name=Open app\nSTEP_OK no=1\nSTEP_SKIP no=2\n",
        ))
        .run(&mut handle);
        assert_eq!(count, 3);

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.meta.status, RunStatus::Pass);
        assert!(snapshot.terminal);
        assert!(snapshot.step(None, 9).is_none());
        assert_eq!(snapshot.step(None, 2).map(|s| s.result), Some(StepResult::Skip));
        assert_eq!(snapshot.raw_lines.len(), 3);
    }

    #[test]
    fn test_unfinished_replay_stays_running() {
        let (mut handle, _rx) = RunViewHandle::new(RunView::new("static-2", 2000));
        StaticLogChannel::new(LogSource::from_text("STEP_START no=1 name=Stuck")).run(&mut handle);
        assert_eq!(handle.view().status(), RunStatus::Running);
        assert!(handle.view().is_terminal());
    }
}
