//! Replay a captured run log

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use qadash_common::RunSnapshot;
use qadash_engine::{EngineConfig, IngestSource, LogSource, RunMount};

use crate::output::{print_snapshot, OutputFormat};

#[derive(Args)]
pub struct ReplayArgs {
    /// Captured log: plain text, a JSON array of lines, or a JSON object
    pub file: PathBuf,

    /// Run ID shown in the output (defaults to the file name)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Log lines shown after the step table
    #[arg(long, default_value = "20")]
    pub tail: usize,
}

fn run_id_for(file: &Path) -> String {
    file.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("replay")
        .to_string()
}

pub async fn execute(args: ReplayArgs, config: &EngineConfig, format: OutputFormat) -> Result<RunSnapshot> {
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let run_id = args.run_id.unwrap_or_else(|| run_id_for(&args.file));
    let source = LogSource::from_text(content);
    debug!(%run_id, file = %args.file.display(), "replaying captured log");

    let mount = RunMount::mount(run_id, IngestSource::StaticLog(source), config);
    let snapshot = mount.wait_terminal().await;
    mount.dispose().await;

    print_snapshot(&snapshot, format, args.tail);
    Ok(snapshot)
}
