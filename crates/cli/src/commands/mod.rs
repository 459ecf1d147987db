//! CLI Commands

pub mod config;
pub mod replay;
pub mod report;
pub mod watch;

use qadash_common::{RunSnapshot, RunStatus};

/// Process exit code for a finished run view
pub fn exit_code(snapshot: &RunSnapshot) -> i32 {
    match (snapshot.meta.status, &snapshot.error) {
        (_, Some(_)) => 2,
        (RunStatus::Fail, None) => 1,
        (RunStatus::Pass, None) => 0,
        // Interrupted before the run finished
        (RunStatus::Running, None) => 3,
    }
}
