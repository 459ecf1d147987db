//! Run view mount lifecycle
//!
//! A [`RunMount`] owns one fresh `RunView`, one adapter task and the
//! cancellation token that disposes it. [`RunViewer`] keeps at most one
//! mount and replaces it when the run or the ingestion mode changes.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qadash_common::{Result, RunSnapshot};

use crate::channel::{
    LiveChannel, LiveExit, LiveSource, LogSource, ReportFetchChannel, ReportOutcome, SseLiveSource,
    StaticLogChannel,
};
use crate::config::EngineConfig;
use crate::view::{RunView, RunViewHandle};

/// Ingestion strategy of a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestMode {
    Live,
    StaticLog,
    Report,
}

impl std::fmt::Display for IngestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestMode::Live => write!(f, "live"),
            IngestMode::StaticLog => write!(f, "static-log"),
            IngestMode::Report => write!(f, "report"),
        }
    }
}

/// The single channel a mount is fed from
pub enum IngestSource {
    Live(Box<dyn LiveSource>),
    StaticLog(LogSource),
    Report(ReportFetchChannel),
}

impl IngestSource {
    /// Live subscription over Server-Sent Events
    pub fn live(config: &EngineConfig, run_id: &str) -> Result<Self> {
        Ok(IngestSource::Live(Box::new(SseLiveSource::from_config(config, run_id)?)))
    }

    pub fn report(config: &EngineConfig, run_id: &str) -> Result<Self> {
        Ok(IngestSource::Report(ReportFetchChannel::from_config(config, run_id)?))
    }

    pub fn mode(&self) -> IngestMode {
        match self {
            IngestSource::Live(_) => IngestMode::Live,
            IngestSource::StaticLog(_) => IngestMode::StaticLog,
            IngestSource::Report(_) => IngestMode::Report,
        }
    }
}

/// How a mount's adapter task finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountExit {
    Live(LiveExit),
    StaticLog { lines: usize },
    Report(ReportOutcome),
}

/// One mounted run view and its adapter task
pub struct RunMount {
    run_id: String,
    mode: IngestMode,
    cancel: CancellationToken,
    rx: watch::Receiver<RunSnapshot>,
    task: Option<JoinHandle<MountExit>>,
}

impl RunMount {
    /// Create a fresh view for `run_id` and start feeding it from `source`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn mount(run_id: impl Into<String>, source: IngestSource, config: &EngineConfig) -> Self {
        let run_id = run_id.into();
        let mode = source.mode();
        let (mut handle, rx) = RunViewHandle::new(RunView::new(run_id.clone(), config.log_capacity));
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            match source {
                IngestSource::Live(source) => {
                    MountExit::Live(LiveChannel::new(source).run(&mut handle, &token).await)
                }
                IngestSource::StaticLog(log) => MountExit::StaticLog {
                    lines: StaticLogChannel::new(log).run(&mut handle),
                },
                IngestSource::Report(channel) => {
                    MountExit::Report(channel.run(&mut handle, &token).await)
                }
            }
        });

        info!(%run_id, %mode, "run view mounted");
        Self {
            run_id,
            mode,
            cancel,
            rx,
            task: Some(task),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn mode(&self) -> IngestMode {
        self.mode
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> RunSnapshot {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }

    /// Wait until the view is terminal, or the adapter stopped publishing.
    pub async fn wait_terminal(&self) -> RunSnapshot {
        let mut rx = self.rx.clone();
        let reached = rx
            .wait_for(|snapshot| snapshot.terminal)
            .await
            .map(|snapshot| RunSnapshot::clone(&snapshot));
        reached.unwrap_or_else(|_| rx.borrow().clone())
    }

    /// Cancel the adapter and wait for it to stop.
    pub async fn dispose(mut self) -> Option<MountExit> {
        self.cancel.cancel();
        let task = self.task.take()?;
        match task.await {
            Ok(exit) => {
                info!(run_id = %self.run_id, mode = %self.mode, ?exit, "run view disposed");
                Some(exit)
            }
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "adapter task failed");
                None
            }
        }
    }
}

impl Drop for RunMount {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!(run_id = %self.run_id, "run mount dropped, cancelling adapter");
            self.cancel.cancel();
        }
    }
}

/// Holds at most one mount and remounts on run or mode change
pub struct RunViewer {
    config: EngineConfig,
    current: Option<RunMount>,
}

impl RunViewer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn current(&self) -> Option<&RunMount> {
        self.current.as_ref()
    }

    /// Show `run_id` fed from `source`.
    ///
    /// Keeps the existing mount when run and mode are unchanged and returns
    /// false; otherwise disposes it, mounts fresh and returns true.
    pub async fn show(&mut self, run_id: &str, source: IngestSource) -> bool {
        if let Some(mount) = &self.current {
            if mount.run_id() == run_id && mount.mode() == source.mode() {
                debug!(%run_id, mode = %mount.mode(), "run view unchanged");
                return false;
            }
        }

        self.unmount().await;
        self.current = Some(RunMount::mount(run_id, source, &self.config));
        true
    }

    pub async fn unmount(&mut self) -> Option<MountExit> {
        match self.current.take() {
            Some(mount) => mount.dispose().await,
            None => None,
        }
    }
}
