//! Watch a run live

use std::collections::HashMap;

use anyhow::Result;
use clap::Args;

use qadash_common::{RunSnapshot, StepResult};
use qadash_engine::{EngineConfig, IngestSource, RunMount};

use crate::output::{
    format_ms, print_info, print_snapshot, print_warning, result_mark, status_label, OutputFormat,
};

#[derive(Args)]
pub struct WatchArgs {
    /// Run ID
    pub run_id: String,

    /// Log lines shown after the step table
    #[arg(long, default_value = "20")]
    pub tail: usize,
}

/// Progress printed while the run is still going
#[derive(Default)]
struct Progress {
    reported: HashMap<String, StepResult>,
    connected: bool,
    status: Option<String>,
}

impl Progress {
    fn update(&mut self, snapshot: &RunSnapshot) {
        if snapshot.connected != self.connected {
            self.connected = snapshot.connected;
            if snapshot.connected {
                print_info("Connected");
            } else if !snapshot.terminal {
                print_warning("Disconnected, waiting for the stream to reconnect");
            }
        }

        for step in &snapshot.steps {
            if !step.result.is_resolved() || self.reported.get(&step.id) == Some(&step.result) {
                continue;
            }
            self.reported.insert(step.id.clone(), step.result);
            println!(
                "  {} {} {} {}",
                result_mark(step.result),
                step.id,
                step.name.as_deref().unwrap_or(""),
                format_ms(step.elapsed_ms)
            );
        }

        let status = status_label(snapshot.meta.status);
        if self.status.as_ref() != Some(&status) {
            println!("  status {}", status);
            self.status = Some(status);
        }
    }
}

pub async fn execute(args: WatchArgs, config: &EngineConfig, format: OutputFormat) -> Result<RunSnapshot> {
    let source = IngestSource::live(config, &args.run_id)?;
    let mount = RunMount::mount(args.run_id.clone(), source, config);
    let mut rx = mount.subscribe();

    let show_progress = matches!(format, OutputFormat::Table | OutputFormat::Plain);
    if show_progress {
        print_info(&format!("Watching run {} at {}", args.run_id, config.live_url(&args.run_id)));
    }

    let mut progress = Progress::default();
    loop {
        let snapshot = rx.borrow_and_update().clone();
        if show_progress {
            progress.update(&snapshot);
        }
        if snapshot.terminal {
            break;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                print_warning("Interrupted");
                break;
            }
        }
    }

    let snapshot = mount.snapshot();
    mount.dispose().await;

    print_snapshot(&snapshot, format, args.tail);
    Ok(snapshot)
}
