//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use qadash_common::{Error, Result};

use crate::log_tail::DEFAULT_LOG_CAPACITY;

const RUN_ID_PLACEHOLDER: &str = "{run_id}";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backend base URL
    pub base_url: String,

    /// Lines retained by each run view's log tail
    pub log_capacity: usize,

    /// Live event channel
    pub live: LiveConfig,

    /// Static report fetch
    pub report: ReportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            live: LiveConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

/// Live push subscription settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Subscription path, `{run_id}` is substituted
    pub path_template: String,

    /// Reconnect delay until the server sends its own `retry:`
    pub retry_ms: u64,

    pub connect_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            path_template: "/events/runs/{run_id}/logs".to_string(),
            retry_ms: 3000,
            connect_timeout_secs: 10,
        }
    }
}

/// Report fetch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Candidate paths tried in order
    pub candidates: Vec<String>,

    pub timeout_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            candidates: vec![
                "/runs/{run_id}/report".to_string(),
                "/run-results/{run_id}".to_string(),
            ],
            timeout_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.log_capacity == 0 {
            return Err(Error::InvalidConfig("log_capacity must be at least 1".to_string()));
        }
        if self.report.candidates.is_empty() {
            return Err(Error::InvalidConfig(
                "report.candidates must list at least one endpoint".to_string(),
            ));
        }
        let templates = std::iter::once(&self.live.path_template).chain(&self.report.candidates);
        for template in templates {
            if !template.contains(RUN_ID_PLACEHOLDER) {
                return Err(Error::InvalidConfig(format!(
                    "endpoint template {:?} is missing {}",
                    template, RUN_ID_PLACEHOLDER
                )));
            }
        }
        Ok(())
    }

    /// Live subscription URL for a run
    pub fn live_url(&self, run_id: &str) -> String {
        self.expand(&self.live.path_template, run_id)
    }

    /// Report candidate URLs for a run, in order
    pub fn report_urls(&self, run_id: &str) -> Vec<String> {
        self.report
            .candidates
            .iter()
            .map(|template| self.expand(template, run_id))
            .collect()
    }

    fn expand(&self, template: &str, run_id: &str) -> String {
        let path = template.replace(RUN_ID_PLACEHOLDER, &urlencoding::encode(run_id));
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
