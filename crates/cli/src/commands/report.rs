//! Load a precomputed run report

use anyhow::Result;
use clap::Args;
use tracing::debug;

use qadash_common::RunSnapshot;
use qadash_engine::{EngineConfig, IngestSource, RunMount};

use crate::output::{print_snapshot, OutputFormat};

#[derive(Args)]
pub struct ReportArgs {
    /// Run ID
    pub run_id: String,

    /// Log lines shown after the step table
    #[arg(long, default_value = "20")]
    pub tail: usize,
}

pub async fn execute(args: ReportArgs, config: &EngineConfig, format: OutputFormat) -> Result<RunSnapshot> {
    debug!(run_id = %args.run_id, candidates = ?config.report_urls(&args.run_id), "fetching report");

    let source = IngestSource::report(config, &args.run_id)?;
    let mount = RunMount::mount(args.run_id, source, config);
    let snapshot = mount.wait_terminal().await;
    mount.dispose().await;

    print_snapshot(&snapshot, format, args.tail);
    Ok(snapshot)
}
