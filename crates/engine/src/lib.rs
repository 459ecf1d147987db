//! QADash run-view engine
//!
//! Reconciles partial, duplicated and out-of-order step events from a test
//! run into one ordered step table, a bounded log tail and a derived run
//! status. Events arrive through one of three channels: a live push
//! subscription, a captured log, or a precomputed report.

pub mod channel;
pub mod config;
pub mod log_tail;
pub mod merge;
pub mod mount;
pub mod normalizer;
pub mod ordering;
pub mod status;
pub mod view;

pub use channel::{
    memory_source, LiveChannel, LiveEvent, LiveSender, LiveSource, LogSource, ReportFetchChannel,
    RunReport, SseLiveSource, StaticLogChannel,
};
pub use config::EngineConfig;
pub use log_tail::{LogTailBuffer, DEFAULT_LOG_CAPACITY};
pub use merge::{ApplyOutcome, MergeStore, StepPatch};
pub use mount::{IngestMode, IngestSource, MountExit, RunMount, RunViewer};
pub use normalizer::{normalize, InboundItem, Signal};
pub use view::{Ingested, RunView, RunViewHandle};
