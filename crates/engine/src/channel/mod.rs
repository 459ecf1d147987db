//! Ingestion channels
//!
//! Exactly one channel feeds a mounted run view: a live push subscription,
//! a captured log replay, or a precomputed report fetch.

pub mod live;
pub mod report;
pub mod sse;
pub mod static_log;

pub use live::{memory_source, LiveChannel, LiveEvent, LiveExit, LiveSender, LiveSource, LiveState, MemoryLiveSource};
pub use report::{ReportFetchChannel, ReportOutcome, RunReport};
pub use sse::{SseFrame, SseLiveSource, SseParser};
pub use static_log::{LogSource, StaticLogChannel};
