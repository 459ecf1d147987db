//! Keyed step table and the deterministic field-merge rule
//!
//! Merging is value-based: a field only ever strengthens or is replaced by a
//! non-empty value, so re-applying a patch is a no-op and a fixed patch
//! sequence always converges to the same record.

use qadash_common::{normalize_sheet, StepKey, StepRecord, StepResult, StructuredField};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// How a path-valued patch field is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathWrite {
    /// Last write wins
    Replace(String),
    /// Only fills a slot that is still empty
    FillEmpty(String),
}

/// Partial update for one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPatch {
    pub sheet: Option<String>,
    pub no: Option<i64>,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub selector: Option<StructuredField>,
    pub visible_if: Option<StructuredField>,
    /// Legacy visibility shorthand, merged into `visible_if.expr`
    pub cond: Option<String>,
    pub result: Option<StepResult>,
    pub reason: Option<String>,
    pub elapsed_ms: Option<u64>,
    pub evidence_path: Option<PathWrite>,
    pub ok_image_path: Option<String>,
    pub fail_image_path: Option<PathWrite>,
}

impl StepPatch {
    pub fn for_step(sheet: Option<&str>, no: i64) -> Self {
        Self {
            sheet: normalize_sheet(sheet),
            no: Some(no),
            ..Default::default()
        }
    }

    pub fn key(&self) -> Option<StepKey> {
        self.no.map(|no| StepKey::new(self.sheet.as_deref(), no))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_result(mut self, result: StepResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_elapsed_ms(mut self, ms: u64) -> Self {
        self.elapsed_ms = Some(ms);
        self
    }
}

impl From<&StepRecord> for StepPatch {
    fn from(record: &StepRecord) -> Self {
        Self {
            sheet: record.sheet.clone(),
            no: Some(record.no),
            name: record.name.clone(),
            kind: record.kind.clone(),
            selector: record.selector.clone(),
            visible_if: record.visible_if.clone(),
            cond: None,
            result: Some(record.result),
            reason: record.reason.clone(),
            elapsed_ms: record.elapsed_ms,
            evidence_path: record.evidence_path.clone().map(PathWrite::Replace),
            ok_image_path: record.ok_image_path.clone(),
            fail_image_path: record.fail_image_path.clone().map(PathWrite::Replace),
        }
    }
}

/// Merge `patch` onto `existing`.
///
/// Returns `None` only when there is no existing record and the patch has no
/// step number to create one from.
pub fn apply(existing: Option<&StepRecord>, patch: &StepPatch) -> Option<StepRecord> {
    let mut record = match existing {
        Some(record) => record.clone(),
        None => StepRecord::new(&patch.key()?),
    };

    merge_text(&mut record.name, patch.name.as_deref());
    merge_text(&mut record.kind, patch.kind.as_deref());
    merge_structured(&mut record.selector, patch.selector.as_ref());
    merge_structured(&mut record.visible_if, patch.visible_if.as_ref());
    if let Some(cond) = patch.cond.as_deref() {
        merge_cond(&mut record.visible_if, cond);
    }

    // An explicit `unknown` carries no information and must not regress a verdict.
    if let Some(result) = patch.result.filter(StepResult::is_resolved) {
        record.result = result;
    }
    merge_text(&mut record.reason, patch.reason.as_deref());
    if let Some(ms) = patch.elapsed_ms {
        record.elapsed_ms = Some(ms);
    }
    merge_path(&mut record.evidence_path, patch.evidence_path.as_ref());
    merge_text(&mut record.ok_image_path, patch.ok_image_path.as_deref());
    merge_path(&mut record.fail_image_path, patch.fail_image_path.as_ref());

    Some(record)
}

/// Fold a legacy `cond` string into `visibleIf.expr`.
pub fn merge_cond(slot: &mut Option<StructuredField>, cond: &str) {
    if cond.trim().is_empty() {
        return;
    }
    if let Some(StructuredField::Object(map)) = slot.as_mut() {
        map.insert("expr".to_string(), Value::String(cond.to_string()));
        return;
    }
    let mut map = Map::new();
    map.insert("expr".to_string(), Value::String(cond.to_string()));
    *slot = Some(StructuredField::Object(map));
}

fn merge_text(slot: &mut Option<String>, value: Option<&str>) {
    if let Some(value) = value {
        if !value.trim().is_empty() {
            *slot = Some(value.to_string());
        }
    }
}

fn merge_path(slot: &mut Option<String>, value: Option<&PathWrite>) {
    match value {
        Some(PathWrite::Replace(path)) => merge_text(slot, Some(path)),
        Some(PathWrite::FillEmpty(path)) if slot.is_none() => merge_text(slot, Some(path)),
        _ => {}
    }
}

fn merge_structured(slot: &mut Option<StructuredField>, value: Option<&StructuredField>) {
    let Some(value) = value else {
        return;
    };
    match value {
        StructuredField::Text(text) => {
            if !text.trim().is_empty() {
                *slot = Some(value.clone());
            }
        }
        StructuredField::Object(incoming) => {
            if let Some(StructuredField::Object(existing)) = slot.as_mut() {
                for (k, v) in incoming.iter().filter(|(_, v)| !v.is_null()) {
                    existing.insert(k.clone(), v.clone());
                }
                return;
            }
            let fresh: Map<String, Value> = incoming
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !fresh.is_empty() {
                *slot = Some(StructuredField::Object(fresh));
            }
        }
    }
}

/// Result of applying one patch to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted(StepKey),
    Updated(StepKey),
    Unchanged(StepKey),
    /// Patch had no step number and was dropped
    MissingKey,
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, ApplyOutcome::Inserted(_) | ApplyOutcome::Updated(_))
    }
}

/// Keyed table `(sheet, no) -> StepRecord`
#[derive(Debug, Clone, Default)]
pub struct MergeStore {
    records: HashMap<StepKey, StepRecord>,
}

impl MergeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a patch in place.
    pub fn apply(&mut self, patch: &StepPatch) -> ApplyOutcome {
        let Some(key) = patch.key() else {
            return ApplyOutcome::MissingKey;
        };
        let Some(merged) = apply(self.records.get(&key), patch) else {
            return ApplyOutcome::MissingKey;
        };

        let outcome = match self.records.get(&key) {
            None => ApplyOutcome::Inserted(key.clone()),
            Some(prev) if *prev == merged => return ApplyOutcome::Unchanged(key),
            Some(_) => ApplyOutcome::Updated(key.clone()),
        };
        self.records.insert(key, merged);
        outcome
    }

    /// Load an already-shaped record, merging with anything present.
    pub fn hydrate(&mut self, record: &StepRecord) -> ApplyOutcome {
        self.apply(&StepPatch::from(record))
    }

    pub fn get(&self, key: &StepKey) -> Option<&StepRecord> {
        self.records.get(key)
    }

    /// Records in unspecified order; see `ordering::snapshot` for display order.
    pub fn records(&self) -> impl Iterator<Item = &StepRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> StructuredField {
        StructuredField::from_value(&value).unwrap()
    }

    #[test]
    fn test_reapplying_patch_is_noop() {
        let patch = StepPatch::for_step(None, 1)
            .with_name("Open app")
            .with_result(StepResult::Ok)
            .with_elapsed_ms(40);

        let mut store = MergeStore::new();
        assert!(matches!(store.apply(&patch), ApplyOutcome::Inserted(_)));
        let once = store.get(&StepKey::new(None, 1)).cloned().unwrap();

        assert!(matches!(store.apply(&patch), ApplyOutcome::Unchanged(_)));
        assert_eq!(store.get(&StepKey::new(None, 1)), Some(&once));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_disjoint_patches_commute() {
        let elapsed = StepPatch::for_step(None, 1).with_elapsed_ms(120);
        let named = StepPatch::for_step(None, 1).with_name("Tap button");

        let a = apply(apply(None, &elapsed).as_ref(), &named).unwrap();
        let b = apply(apply(None, &named).as_ref(), &elapsed).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.elapsed_ms, Some(120));
        assert_eq!(a.name.as_deref(), Some("Tap button"));
    }

    #[test]
    fn test_fail_survives_patch_without_result() {
        let failed = apply(None, &StepPatch::for_step(None, 2).with_result(StepResult::Fail)).unwrap();
        let later = apply(Some(&failed), &StepPatch::for_step(None, 2).with_elapsed_ms(9)).unwrap();
        assert_eq!(later.result, StepResult::Fail);

        let explicit_unknown = apply(
            Some(&later),
            &StepPatch::for_step(None, 2).with_result(StepResult::Unknown),
        )
        .unwrap();
        assert_eq!(explicit_unknown.result, StepResult::Fail);
    }

    #[test]
    fn test_blank_name_does_not_clobber() {
        let named = apply(None, &StepPatch::for_step(None, 1).with_name("Login")).unwrap();
        let blank = apply(Some(&named), &StepPatch::for_step(None, 1).with_name("")).unwrap();
        assert_eq!(blank.name.as_deref(), Some("Login"));

        let mut kind = StepPatch::for_step(None, 1);
        kind.kind = Some("   ".to_string());
        assert_eq!(apply(Some(&named), &kind).unwrap().kind, None);
    }

    #[test]
    fn test_selector_objects_shallow_merge() {
        let mut first = StepPatch::for_step(None, 1);
        first.selector = Some(object(json!({"by": "id", "value": "login", "timeout": 5})));
        let mut second = StepPatch::for_step(None, 1);
        second.selector = Some(object(json!({"value": "submit", "index": null})));

        let record = apply(apply(None, &first).as_ref(), &second).unwrap();
        assert_eq!(
            record.selector,
            Some(object(json!({"by": "id", "value": "submit", "timeout": 5})))
        );
    }

    #[test]
    fn test_selector_string_replaces_wholesale() {
        let mut first = StepPatch::for_step(None, 1);
        first.selector = Some(object(json!({"by": "id", "value": "login"})));
        let mut second = StepPatch::for_step(None, 1);
        second.selector = Some(StructuredField::Text("//button[1]".to_string()));

        let record = apply(apply(None, &first).as_ref(), &second).unwrap();
        assert_eq!(record.selector, Some(StructuredField::Text("//button[1]".to_string())));
    }

    #[test]
    fn test_cond_merges_into_visible_if_expr() {
        let mut first = StepPatch::for_step(None, 1);
        first.visible_if = Some(object(json!({"expr": "old", "timeoutMs": 500})));
        let mut second = StepPatch::for_step(None, 1);
        second.cond = Some("env == 'prod'".to_string());

        let record = apply(apply(None, &first).as_ref(), &second).unwrap();
        assert_eq!(
            record.visible_if,
            Some(object(json!({"expr": "env == 'prod'", "timeoutMs": 500})))
        );

        let bare = apply(None, &second).unwrap();
        assert_eq!(bare.visible_if, Some(object(json!({"expr": "env == 'prod'"}))));
    }

    #[test]
    fn test_fill_empty_paths_do_not_overwrite() {
        let mut failure = StepPatch::for_step(None, 3).with_result(StepResult::Fail);
        failure.evidence_path = Some(PathWrite::Replace("/fail.png".to_string()));
        let mut artifact = StepPatch::for_step(None, 3);
        artifact.evidence_path = Some(PathWrite::FillEmpty("/generic.zip".to_string()));
        artifact.fail_image_path = Some(PathWrite::FillEmpty("/shot.png".to_string()));

        let record = apply(apply(None, &failure).as_ref(), &artifact).unwrap();
        assert_eq!(record.evidence_path.as_deref(), Some("/fail.png"));
        assert_eq!(record.fail_image_path.as_deref(), Some("/shot.png"));

        let reversed = apply(apply(None, &artifact).as_ref(), &failure).unwrap();
        assert_eq!(reversed.evidence_path.as_deref(), Some("/fail.png"));
    }

    #[test]
    fn test_patch_without_step_number_is_dropped() {
        let mut store = MergeStore::new();
        let patch = StepPatch {
            name: Some("orphan".to_string()),
            ..Default::default()
        };
        assert_eq!(store.apply(&patch), ApplyOutcome::MissingKey);
        assert!(store.is_empty());
    }

    #[test]
    fn test_hydrate_uses_same_rules() {
        let mut store = MergeStore::new();
        store.apply(&StepPatch::for_step(Some("A"), 1).with_name("Login"));

        let mut record = StepRecord::new(&StepKey::new(Some("A"), 1));
        record.result = StepResult::Ok;
        assert!(store.hydrate(&record).changed());

        let merged = store.get(&StepKey::new(Some("A"), 1)).unwrap();
        assert_eq!(merged.name.as_deref(), Some("Login"));
        assert_eq!(merged.result, StepResult::Ok);
        assert_eq!(merged.id, "A#1");
    }
}
