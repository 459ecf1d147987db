//! One-shot report fetch
//!
//! Tries an ordered list of candidate endpoints; the first 2xx response that
//! decodes as a report wins and is hydrated straight into the run view.
//! Exhausting every candidate leaves a terminal error on the view. There is
//! no retry loop.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qadash_common::{normalize_sheet, Error, Result, RunStatus, StepResult, StructuredField};

use crate::config::EngineConfig;
use crate::merge::{PathWrite, StepPatch};
use crate::view::RunViewHandle;

/// Precomputed run report: `{ meta, steps[], rawLines[] }`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    #[serde(default)]
    pub meta: ReportMeta,
    #[serde(default)]
    pub steps: Vec<ReportStep>,
    #[serde(default)]
    pub raw_lines: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMeta {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub elapsed_ms: Option<Value>,
}

impl ReportMeta {
    pub fn status(&self) -> Option<RunStatus> {
        self.status.as_deref().and_then(RunStatus::parse)
    }

    pub fn elapsed_ms(&self) -> Option<u64> {
        self.elapsed_ms.as_ref().and_then(millis)
    }
}

/// Step as stored by the backend. Numbers may arrive as strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStep {
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub no: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub selector: Option<Value>,
    #[serde(default)]
    pub visible_if: Option<Value>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub elapsed_ms: Option<Value>,
    #[serde(default)]
    pub evidence_path: Option<String>,
    #[serde(default, alias = "okImg")]
    pub ok_image_path: Option<String>,
    #[serde(default, alias = "failImg")]
    pub fail_image_path: Option<String>,
}

impl ReportStep {
    pub fn to_patch(&self) -> StepPatch {
        StepPatch {
            sheet: normalize_sheet(self.sheet.as_deref()),
            no: self.no.as_ref().and_then(number).map(|n| n as i64),
            name: self.name.clone(),
            kind: self.kind.clone(),
            selector: self.selector.as_ref().and_then(StructuredField::from_value),
            visible_if: self.visible_if.as_ref().and_then(StructuredField::from_value),
            cond: None,
            result: self.result.as_deref().map(StepResult::parse),
            reason: self.reason.clone(),
            elapsed_ms: self.elapsed_ms.as_ref().and_then(millis),
            evidence_path: self.evidence_path.clone().map(PathWrite::Replace),
            ok_image_path: self.ok_image_path.clone(),
            fail_image_path: self.fail_image_path.clone().map(PathWrite::Replace),
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    let n: f64 = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn millis(value: &Value) -> Option<u64> {
    number(value).filter(|ms| *ms >= 0.0).map(|ms| ms.round() as u64)
}

impl RunReport {
    pub fn step_patches(&self) -> Vec<StepPatch> {
        self.steps.iter().map(ReportStep::to_patch).collect()
    }
}

/// How a fetch attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Hydrated { url: String },
    Exhausted,
    /// Mount was disposed before the response arrived; nothing applied
    Stale,
}

/// One-shot GET against ordered candidate endpoints
#[derive(Debug, Clone)]
pub struct ReportFetchChannel {
    client: reqwest::Client,
    candidates: Vec<String>,
}

impl ReportFetchChannel {
    pub fn new(client: reqwest::Client, candidates: Vec<String>) -> Self {
        Self { client, candidates }
    }

    pub fn from_config(config: &EngineConfig, run_id: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.report.timeout_secs))
            .build()?;
        Ok(Self::new(client, config.report_urls(run_id)))
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Try each candidate in order; first decodable 2xx wins.
    pub async fn fetch(&self) -> Result<(String, RunReport)> {
        let mut last_error = String::from("no candidate endpoints configured");

        for url in &self.candidates {
            debug!(%url, "fetching run report");
            let response = match self.client.get(url).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(%url, error = %e, "report request failed");
                    last_error = format!("{}: {}", url, e);
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                warn!(%url, %status, "report endpoint returned error status");
                last_error = format!("HTTP {} from {}", status.as_u16(), url);
                continue;
            }

            match response.json::<RunReport>().await {
                Ok(report) => return Ok((url.clone(), report)),
                Err(e) => {
                    warn!(%url, error = %e, "report body did not decode");
                    last_error = format!("{}: invalid report body: {}", url, e);
                }
            }
        }

        Err(Error::FetchExhausted {
            attempts: self.candidates.len(),
            last_error,
        })
    }

    /// Fetch and apply, unless the mount was cancelled in the meantime.
    pub async fn run(self, handle: &mut RunViewHandle, cancel: &CancellationToken) -> ReportOutcome {
        let result = tokio::select! {
            _ = cancel.cancelled() => return ReportOutcome::Stale,
            result = self.fetch() => result,
        };

        // The owning view may have been reset while the response was in flight.
        if cancel.is_cancelled() {
            debug!(run_id = %handle.view().run_id(), "discarding stale report response");
            return ReportOutcome::Stale;
        }

        match result {
            Ok((url, report)) => {
                info!(%url, steps = report.steps.len(), "run report loaded");
                handle.update(|view| view.hydrate(report));
                ReportOutcome::Hydrated { url }
            }
            Err(e) => {
                handle.update(|view| view.set_error(e.to_string()));
                ReportOutcome::Exhausted
            }
        }
    }
}
