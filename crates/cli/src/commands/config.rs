//! Configuration commands

use std::path::Path;

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;

use qadash_engine::EngineConfig;

use crate::output::{print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the endpoints used for a run
    Urls {
        /// Run ID
        run_id: String,
    },
}

#[derive(Serialize)]
pub struct EndpointDisplay {
    pub channel: String,
    pub url: String,
}

impl TableDisplay for EndpointDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Channel", "URL"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.channel.clone(), self.url.clone()]
    }
}

fn endpoints(config: &EngineConfig, run_id: &str) -> Vec<EndpointDisplay> {
    let live = EndpointDisplay {
        channel: "live".to_string(),
        url: config.live_url(run_id),
    };
    let reports = config
        .report_urls(run_id)
        .into_iter()
        .enumerate()
        .map(|(i, url)| EndpointDisplay {
            channel: format!("report #{}", i + 1),
            url,
        });
    std::iter::once(live).chain(reports).collect()
}

/// `config init` runs before the configuration file is loaded.
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    EngineConfig::default().save(path)?;
    print_success(&format!("Wrote default configuration to {}", path.display()));
    Ok(())
}

pub fn execute(cmd: ConfigCommands, config: &EngineConfig, path: &Path, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show => match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            OutputFormat::Yaml => println!("{}", serde_yaml::to_string(config)?),
            OutputFormat::Table | OutputFormat::Plain => {
                println!("# {}", path.display());
                println!("{}", toml::to_string_pretty(config)?);
            }
        },
        ConfigCommands::Init { force } => init(path, force)?,
        ConfigCommands::Urls { run_id } => print_list(&endpoints(config, &run_id), format),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_endpoints_lists_live_then_reports() {
        let rows = endpoints(&EngineConfig::default(), "r1");
        let channels: Vec<_> = rows.iter().map(|r| r.channel.as_str()).collect();
        assert_eq!(channels, vec!["live", "report #1", "report #2"]);
        assert_eq!(rows[2].url, "http://127.0.0.1:8080/run-results/r1");
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("qadash.toml");

        init(&path, false).unwrap();
        assert!(init(&path, false).is_err());
        init(&path, true).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), EngineConfig::default());
    }
}
