//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use qadash_common::{RunSnapshot, RunStatus, StepRecord, StepResult};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Step row as shown to the user
#[derive(Debug, Serialize)]
pub struct StepDisplay {
    pub id: String,
    pub name: String,
    pub result: String,
    pub elapsed: String,
    pub detail: String,
}

impl From<&StepRecord> for StepDisplay {
    fn from(step: &StepRecord) -> Self {
        let detail = step
            .reason
            .clone()
            .or_else(|| step.fail_image_path.clone())
            .or_else(|| step.evidence_path.clone())
            .or_else(|| step.selector.as_ref().map(|s| s.to_string()))
            .unwrap_or_default();

        Self {
            id: step.id.clone(),
            name: step.name.clone().unwrap_or_default(),
            result: step.result.to_string(),
            elapsed: format_ms(step.elapsed_ms),
            detail,
        }
    }
}

impl TableDisplay for StepDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Step", "Name", "Result", "Elapsed", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.result.clone(),
            self.elapsed.clone(),
            self.detail.clone(),
        ]
    }
}

pub fn format_ms(ms: Option<u64>) -> String {
    match ms {
        Some(ms) if ms >= 1000 => format!("{:.1}s", ms as f64 / 1000.0),
        Some(ms) => format!("{}ms", ms),
        None => "-".to_string(),
    }
}

pub fn status_label(status: RunStatus) -> String {
    match status {
        RunStatus::Pass => "PASS".green().bold().to_string(),
        RunStatus::Fail => "FAIL".red().bold().to_string(),
        RunStatus::Running => "RUNNING".yellow().bold().to_string(),
    }
}

pub fn result_mark(result: StepResult) -> String {
    match result {
        StepResult::Ok => "✓".green().to_string(),
        StepResult::Fail => "✗".red().to_string(),
        StepResult::Skip => "-".dimmed().to_string(),
        StepResult::Unknown => "…".yellow().to_string(),
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No steps recorded.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Print the final run view. `tail` limits the log lines shown in table and plain output.
pub fn print_snapshot(snapshot: &RunSnapshot, format: OutputFormat, tail: usize) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(snapshot).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(snapshot).unwrap_or_default());
        }
        OutputFormat::Table | OutputFormat::Plain => {
            println!(
                "Run {}  {}  {}",
                snapshot.meta.run_id.bold(),
                status_label(snapshot.meta.status),
                format_ms(snapshot.meta.elapsed_ms).dimmed()
            );

            let steps: Vec<StepDisplay> = snapshot.steps.iter().map(StepDisplay::from).collect();
            print_list(&steps, format);

            let skip = snapshot.raw_lines.len().saturating_sub(tail);
            if tail > 0 && skip < snapshot.raw_lines.len() {
                println!();
                println!("{}", format!("Last {} log line(s):", snapshot.raw_lines.len() - skip).dimmed());
                for line in &snapshot.raw_lines[skip..] {
                    println!("  {}", line);
                }
            }

            if let Some(error) = &snapshot.error {
                print_error(error);
            }
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    eprintln!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use qadash_common::StepKey;

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(None), "-");
        assert_eq!(format_ms(Some(250)), "250ms");
        assert_eq!(format_ms(Some(4200)), "4.2s");
    }

    #[test]
    fn test_step_display_prefers_reason() {
        let mut step = StepRecord::new(&StepKey::new(Some("Login"), 2));
        step.name = Some("Tap login".to_string());
        step.result = StepResult::Fail;
        step.reason = Some("Timeout".to_string());
        step.evidence_path = Some("/e.png".to_string());

        let row = StepDisplay::from(&step).row();
        assert_eq!(row, vec!["Login#2", "Tap login", "fail", "-", "Timeout"]);
    }
}
