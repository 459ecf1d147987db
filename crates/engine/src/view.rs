//! Per-mount run view: merge store, log tail and run metadata
//!
//! A `RunView` is created when a run view is mounted, reset when its run or
//! ingestion mode changes, and dropped on teardown. Adapters receive it
//! through a [`RunViewHandle`], which publishes a fresh [`RunSnapshot`]
//! after every mutation.

use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use qadash_common::{ConnectivityState, RunMeta, RunSnapshot, RunStatus, StepKey, StepRecord};

use crate::channel::report::RunReport;
use crate::log_tail::LogTailBuffer;
use crate::merge::{ApplyOutcome, MergeStore, StepPatch};
use crate::normalizer::{normalize, ControlSignal, InboundItem, LogLevel, Signal};
use crate::ordering;
use crate::status;

/// What a single `ingest` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    Step(ApplyOutcome),
    /// Step patch without a step number; only the log line was kept
    MissingKey,
    Log,
    Sheet,
    RunExit,
    Raw,
}

/// Owned reconciliation state for one mounted run view
#[derive(Debug)]
pub struct RunView {
    run_id: String,
    store: MergeStore,
    log: LogTailBuffer,
    status: RunStatus,
    elapsed_ms: Option<u64>,
    terminal: bool,
    current_sheet: Option<String>,
    connectivity: ConnectivityState,
    error: Option<String>,
}

impl RunView {
    pub fn new(run_id: impl Into<String>, log_capacity: usize) -> Self {
        Self {
            run_id: run_id.into(),
            store: MergeStore::new(),
            log: LogTailBuffer::new(log_capacity),
            status: RunStatus::Running,
            elapsed_ms: None,
            terminal: false,
            current_sheet: None,
            connectivity: ConnectivityState::default(),
            error: None,
        }
    }

    /// Drop every step, line and flag, keeping the run id and capacity.
    pub fn reset(&mut self) {
        self.store.clear();
        self.log.clear();
        self.status = RunStatus::Running;
        self.elapsed_ms = None;
        self.terminal = false;
        self.current_sheet = None;
        self.connectivity = ConnectivityState::default();
        self.error = None;
    }

    /// Feed one inbound item through normalization and merge.
    ///
    /// The item's line is always appended to the log tail first, even when
    /// the resulting patch is dropped for lacking a step number.
    pub fn ingest(&mut self, item: InboundItem, running_hint: bool) -> Ingested {
        self.log.append(item.log_line());

        let outcome = match normalize(&item) {
            Signal::Patch(patch) => self.apply_patch(patch),
            Signal::Control(signal) => self.apply_control(signal),
            Signal::ControlWithStep(signal, patch) => {
                let outcome = self.apply_control(signal);
                self.apply_patch(patch);
                outcome
            }
            Signal::Raw(_) => Ingested::Raw,
        };

        if self.terminal {
            self.recompute_terminal();
        } else {
            self.recompute(running_hint);
        }
        outcome
    }

    /// Late events after completion still merge, but cannot reopen the run.
    /// Only a late failure may move the status, from PASS to FAIL.
    fn recompute_terminal(&mut self) {
        if status::derive(self.store.records(), false) == RunStatus::Fail {
            self.status = RunStatus::Fail;
        }
    }

    fn apply_patch(&mut self, mut patch: StepPatch) -> Ingested {
        if patch.sheet.is_none() {
            patch.sheet = self.current_sheet.clone();
        }
        match self.store.apply(&patch) {
            ApplyOutcome::MissingKey => {
                trace!(run_id = %self.run_id, "dropping step patch without a step number");
                Ingested::MissingKey
            }
            outcome => {
                debug!(run_id = %self.run_id, ?outcome, "applied step patch");
                Ingested::Step(outcome)
            }
        }
    }

    fn apply_control(&mut self, signal: ControlSignal) -> Ingested {
        match signal {
            ControlSignal::Log { level, message } => {
                emit_run_log(&self.run_id, level, &message);
                Ingested::Log
            }
            ControlSignal::SheetStart { sheet } => {
                debug!(run_id = %self.run_id, ?sheet, "sheet started");
                self.current_sheet = sheet;
                Ingested::Sheet
            }
            ControlSignal::SheetEnd { sheet } => {
                debug!(run_id = %self.run_id, ?sheet, "sheet ended");
                if sheet.is_none() || sheet == self.current_sheet {
                    self.current_sheet = None;
                }
                Ingested::Sheet
            }
            ControlSignal::RunExit { elapsed_ms } => {
                if elapsed_ms.is_some() {
                    self.elapsed_ms = elapsed_ms;
                }
                Ingested::RunExit
            }
        }
    }

    /// Declare the ingestion source complete and derive the terminal status.
    pub fn finalize(&mut self) {
        self.terminal = true;
        self.recompute(false);
        info!(run_id = %self.run_id, status = %self.status, steps = self.store.len(), "run view finalized");
    }

    /// Load a precomputed report, bypassing normalization.
    pub fn hydrate(&mut self, report: RunReport) {
        self.reset();

        let mut dropped = 0usize;
        for patch in report.step_patches() {
            if self.store.apply(&patch) == ApplyOutcome::MissingKey {
                dropped += 1;
            }
        }
        if dropped > 0 {
            trace!(run_id = %self.run_id, dropped, "report steps without a step number");
        }
        for line in report.raw_lines {
            self.log.append(line);
        }
        self.elapsed_ms = report.meta.elapsed_ms();

        self.finalize();
        if self.store.is_empty() {
            if let Some(status) = report.meta.status() {
                self.status = status;
            }
        }
    }

    pub fn set_connectivity(&mut self, state: ConnectivityState) {
        if let Some(err) = &state.last_error {
            warn!(run_id = %self.run_id, error = %err, "live channel error");
        }
        self.connectivity = state;
    }

    /// Surface a terminal, user-visible error.
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(run_id = %self.run_id, error = %message, "run view failed");
        self.error = Some(message);
        self.terminal = true;
    }

    fn recompute(&mut self, running_hint: bool) {
        self.status = status::derive(self.store.records(), running_hint);
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn store(&self) -> &MergeStore {
        &self.store
    }

    pub fn log(&self) -> &LogTailBuffer {
        &self.log
    }

    pub fn connectivity(&self) -> &ConnectivityState {
        &self.connectivity
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn current_sheet(&self) -> Option<&str> {
        self.current_sheet.as_deref()
    }

    /// Explicit run duration, else the sum of known step durations.
    pub fn elapsed_ms(&self) -> Option<u64> {
        self.elapsed_ms.or_else(|| {
            self.store
                .records()
                .filter_map(|r| r.elapsed_ms)
                .fold(None, |acc, ms| Some(acc.unwrap_or(0) + ms))
        })
    }

    pub fn step(&self, sheet: Option<&str>, no: i64) -> Option<&StepRecord> {
        self.store.get(&StepKey::new(sheet, no))
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            steps: ordering::snapshot(&self.store),
            meta: RunMeta {
                run_id: self.run_id.clone(),
                status: self.status,
                elapsed_ms: self.elapsed_ms(),
            },
            raw_lines: self.log.to_vec(),
            connected: self.connectivity.connected,
            error: self.error.clone(),
            terminal: self.terminal,
        }
    }
}

fn emit_run_log(run_id: &str, level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => debug!(target: "qadash::runlog", run_id, "{}", message),
        LogLevel::Info => info!(target: "qadash::runlog", run_id, "{}", message),
        LogLevel::Warn => warn!(target: "qadash::runlog", run_id, "{}", message),
        LogLevel::Error | LogLevel::Fail => error!(target: "qadash::runlog", run_id, "{}", message),
    }
}

/// Owned handle passed to ingestion adapters.
///
/// Wraps the mount's `RunView` and republishes its snapshot on every update.
#[derive(Debug)]
pub struct RunViewHandle {
    view: RunView,
    tx: watch::Sender<RunSnapshot>,
}

impl RunViewHandle {
    pub fn new(view: RunView) -> (Self, watch::Receiver<RunSnapshot>) {
        let (tx, rx) = watch::channel(view.snapshot());
        (Self { view, tx }, rx)
    }

    /// Mutate the view and publish the resulting snapshot.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut RunView) -> R) -> R {
        let out = f(&mut self.view);
        self.tx.send_replace(self.view.snapshot());
        out
    }

    pub fn view(&self) -> &RunView {
        &self.view
    }

    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.tx.subscribe()
    }

    pub fn into_view(self) -> RunView {
        self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qadash_common::StepResult;
    use serde_json::json;

    fn feed(view: &mut RunView, lines: &[&str]) {
        for line in lines {
            view.ingest(InboundItem::from(*line), true);
        }
    }

    #[test]
    fn test_end_to_end_failure() {
        let mut view = RunView::new("run-1", 2000);
        feed(
            &mut view,
            &[
                "STEP_START no=1 name=Open app",
                "STEP_OK no=1",
                "STEP_START no=2 name=Tap login",
                "STEP_FAIL no=2 reason=Timeout evidencePath=/e.png",
            ],
        );
        assert_eq!(view.status(), RunStatus::Fail);
        assert!(!view.is_terminal());

        assert_eq!(view.ingest(InboundItem::from("RUN_EXIT"), true), Ingested::RunExit);
        view.finalize();

        let snapshot = view.snapshot();
        assert_eq!(snapshot.meta.status, RunStatus::Fail);
        assert!(snapshot.terminal);

        let first = snapshot.step(None, 1).unwrap();
        assert_eq!(first.result, StepResult::Ok);
        assert_eq!(first.name.as_deref(), Some("Open app"));

        let second = snapshot.step(None, 2).unwrap();
        assert_eq!(second.result, StepResult::Fail);
        assert_eq!(second.reason.as_deref(), Some("Timeout"));
        assert_eq!(second.evidence_path.as_deref(), Some("/e.png"));
        assert_eq!(snapshot.raw_lines.len(), 5);
    }

    #[test]
    fn test_running_until_finalized() {
        let mut view = RunView::new("run-2", 2000);
        feed(&mut view, &["STEP_OK no=1", "STEP_OK no=2"]);
        assert_eq!(view.status(), RunStatus::Running);

        view.finalize();
        assert_eq!(view.status(), RunStatus::Pass);

        // Late events merge but the run stays terminal.
        view.ingest(InboundItem::from("STEP_START no=3 name=Late"), true);
        assert_eq!(view.status(), RunStatus::Pass);
        assert!(view.is_terminal());
        assert_eq!(view.step(None, 3).unwrap().name.as_deref(), Some("Late"));
    }

    #[test]
    fn test_late_failure_after_finalize() {
        let mut view = RunView::new("run-2b", 2000);
        feed(&mut view, &["STEP_OK no=1", "RUN_EXIT"]);
        view.finalize();
        assert_eq!(view.status(), RunStatus::Pass);

        feed(&mut view, &["STEP_START no=2 name=late"]);
        assert_eq!(view.status(), RunStatus::Pass);

        feed(&mut view, &["STEP_FAIL no=2 reason=Crashed"]);
        assert_eq!(view.status(), RunStatus::Fail);

        feed(&mut view, &["STEP_START no=4"]);
        assert_eq!(view.status(), RunStatus::Fail);
        assert!(view.snapshot().terminal);
    }

    #[test]
    fn test_log_event_carries_step_metadata() {
        let mut view = RunView::new("run-2c", 2000);
        feed(&mut view, &["STEP_START no=3"]);

        let outcome = view.ingest(
            InboundItem::from(json!({"type": "LOG", "no": 3, "elapsedMs": 50, "okImg": "/ok.png", "msg": "done"})),
            true,
        );
        assert_eq!(outcome, Ingested::Log);

        let step = view.step(None, 3).unwrap();
        assert_eq!(step.elapsed_ms, Some(50));
        assert_eq!(step.ok_image_path.as_deref(), Some("/ok.png"));
        assert_eq!(step.result, StepResult::Unknown);
        assert_eq!(view.status(), RunStatus::Running);
    }

    #[test]
    fn test_keyless_patch_still_logged() {
        let mut view = RunView::new("run-3", 2000);
        let outcome = view.ingest(InboundItem::from("STEP_OK name=whatever"), true);
        assert_eq!(outcome, Ingested::MissingKey);
        assert!(view.store().is_empty());
        assert_eq!(view.log().len(), 1);
    }

    #[test]
    fn test_sheet_context_applies_to_unsheeted_steps() {
        let mut view = RunView::new("run-4", 2000);
        view.ingest(InboundItem::from(json!({"type": "SHEET_START", "sheet": "Checkout"})), true);
        view.ingest(InboundItem::from("STEP_OK no=1"), true);
        view.ingest(InboundItem::from(json!({"type": "SHEET_END", "sheet": "Checkout"})), true);
        view.ingest(InboundItem::from("STEP_OK no=1"), true);

        assert!(view.step(Some("Checkout"), 1).is_some());
        assert!(view.step(None, 1).is_some());
        assert_eq!(view.current_sheet(), None);
    }

    #[test]
    fn test_elapsed_falls_back_to_step_sum() {
        let mut view = RunView::new("run-5", 2000);
        assert_eq!(view.elapsed_ms(), None);
        feed(&mut view, &["STEP_OK no=1 elapsedMs=100", "STEP_OK no=2 ms=250"]);
        assert_eq!(view.elapsed_ms(), Some(350));

        view.ingest(InboundItem::from("RUN_EXIT elapsedMs=1000"), true);
        assert_eq!(view.elapsed_ms(), Some(1000));
    }

    #[test]
    fn test_reset_discards_everything() {
        let mut view = RunView::new("run-6", 2000);
        feed(&mut view, &["STEP_FAIL no=1"]);
        view.set_error("boom");
        view.reset();

        let snapshot = view.snapshot();
        assert!(snapshot.steps.is_empty());
        assert!(snapshot.raw_lines.is_empty());
        assert_eq!(snapshot.error, None);
        assert!(!snapshot.terminal);
        assert_eq!(snapshot.meta.run_id, "run-6");
    }

    #[test]
    fn test_handle_publishes_each_update() {
        let (mut handle, rx) = RunViewHandle::new(RunView::new("run-7", 2000));
        assert!(rx.borrow().steps.is_empty());

        handle.update(|v| v.ingest(InboundItem::from("STEP_OK no=1"), true));
        assert_eq!(rx.borrow().steps.len(), 1);
        assert_eq!(rx.borrow().meta.status, RunStatus::Running);

        handle.update(|v| v.finalize());
        assert_eq!(rx.borrow().meta.status, RunStatus::Pass);
        assert!(rx.borrow().terminal);
    }
}
