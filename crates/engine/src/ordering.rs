//! Display ordering of step records

use std::cmp::Ordering;

use qadash_common::StepRecord;

use crate::merge::MergeStore;

/// `(sheet, no)` ascending; the unnamed sheet sorts first and step numbers
/// compare numerically.
pub fn compare_steps(a: &StepRecord, b: &StepRecord) -> Ordering {
    sheet_of(a).cmp(&sheet_of(b)).then(a.no.cmp(&b.no))
}

fn sheet_of(record: &StepRecord) -> Option<&str> {
    record.sheet.as_deref().filter(|s| !s.is_empty())
}

/// Stable, sorted copy of every record in the store.
pub fn snapshot(store: &MergeStore) -> Vec<StepRecord> {
    let mut steps: Vec<StepRecord> = store.records().cloned().collect();
    steps.sort_by(compare_steps);
    steps
}
