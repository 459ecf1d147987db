//! Overall run status projection

use qadash_common::{RunStatus, StepRecord, StepResult};

/// Derive the run status from the current step set.
///
/// Priority: any failed step is FAIL regardless of `running_hint`; otherwise
/// the run is RUNNING while the hint is set or any step is unresolved; else
/// PASS. Full recomputation on every call.
pub fn derive<'a, I>(records: I, running_hint: bool) -> RunStatus
where
    I: IntoIterator<Item = &'a StepRecord>,
{
    let mut unresolved = false;
    for record in records {
        match record.result {
            StepResult::Fail => return RunStatus::Fail,
            StepResult::Unknown => unresolved = true,
            StepResult::Ok | StepResult::Skip => {}
        }
    }

    if running_hint || unresolved {
        RunStatus::Running
    } else {
        RunStatus::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qadash_common::StepKey;

    fn steps(results: &[StepResult]) -> Vec<StepRecord> {
        results
            .iter()
            .enumerate()
            .map(|(i, result)| {
                let mut record = StepRecord::new(&StepKey::new(None, i as i64 + 1));
                record.result = *result;
                record
            })
            .collect()
    }

    #[test]
    fn test_failure_is_sticky() {
        let records = steps(&[StepResult::Ok, StepResult::Fail]);
        assert_eq!(derive(&records, false), RunStatus::Fail);
        assert_eq!(derive(&records, true), RunStatus::Fail);
    }

    #[test]
    fn test_all_ok_passes_when_finished() {
        let records = steps(&[StepResult::Ok, StepResult::Ok]);
        assert_eq!(derive(&records, false), RunStatus::Pass);
        assert_eq!(derive(&records, true), RunStatus::Running);
    }

    #[test]
    fn test_unresolved_step_keeps_running() {
        let records = steps(&[StepResult::Ok, StepResult::Unknown]);
        assert_eq!(derive(&records, false), RunStatus::Running);
    }

    #[test]
    fn test_skips_count_as_resolved() {
        let records = steps(&[StepResult::Skip, StepResult::Ok]);
        assert_eq!(derive(&records, false), RunStatus::Pass);
    }

    #[test]
    fn test_empty_run() {
        assert_eq!(derive(&Vec::<StepRecord>::new(), false), RunStatus::Pass);
        assert_eq!(derive(&Vec::<StepRecord>::new(), true), RunStatus::Running);
    }
}
