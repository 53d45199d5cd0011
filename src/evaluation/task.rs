//! Eval-tool command lines.
//!
//! The orchestrator only needs a shell command; this builds the one for the
//! `evalscope` CLI in service mode, pointed at an OpenAI-compatible endpoint.
//! Its `--work-dir` is the job's output root, which makes the tool write
//! `<work-dir>/<timestamp>/reports/<model>/<dataset>.json`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::job::EvalJob;
use crate::util::shell_join;

/// One model/dataset evaluation against a serving endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalTask {
    /// Served model name
    pub model: String,
    /// OpenAI-compatible base URL, e.g. `http://10.0.0.5:8000/v1`
    pub api_url: String,
    /// Bearer key for the endpoint
    #[serde(default)]
    pub api_key: Option<String>,
    /// Dataset name
    pub dataset: String,
    /// Cap on samples per dataset
    #[serde(default)]
    pub limit: Option<u32>,
    /// Concurrent requests issued by the tool
    #[serde(default = "default_batch_size")]
    pub eval_batch_size: u32,
    /// Sampling parameters passed through verbatim
    #[serde(default)]
    pub generation_config: Option<serde_json::Value>,
    /// Per-dataset arguments passed through verbatim
    #[serde(default)]
    pub dataset_args: Option<serde_json::Value>,
    /// Anything else to append
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Eval tool executable
    #[serde(default = "default_tool")]
    pub tool: String,
}

fn default_batch_size() -> u32 {
    8
}

fn default_tool() -> String {
    "evalscope".to_string()
}

impl EvalTask {
    pub fn new(model: impl Into<String>, api_url: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_url: api_url.into(),
            api_key: None,
            dataset: dataset.into(),
            limit: None,
            eval_batch_size: default_batch_size(),
            generation_config: None,
            dataset_args: None,
            extra_args: Vec::new(),
            tool: default_tool(),
        }
    }

    /// Fresh job for this task under `base_dir`.
    pub fn job(&self, base_dir: &str, timeout: Duration) -> EvalJob {
        EvalJob::new(base_dir, &self.model, &self.dataset, timeout)
    }

    /// Shell command that runs the evaluation for `job`.
    pub fn command(&self, job: &EvalJob) -> String {
        let mut args: Vec<String> = vec![
            self.tool.clone(),
            "eval".to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--api-url".to_string(),
            self.api_url.clone(),
            "--eval-type".to_string(),
            "service".to_string(),
            "--datasets".to_string(),
            self.dataset.clone(),
            "--eval-batch-size".to_string(),
            self.eval_batch_size.to_string(),
            "--work-dir".to_string(),
            job.output_dir(),
        ];
        if let Some(key) = &self.api_key {
            args.push("--api-key".to_string());
            args.push(key.clone());
        }
        if let Some(limit) = self.limit {
            args.push("--limit".to_string());
            args.push(limit.to_string());
        }
        if let Some(cfg) = &self.generation_config {
            args.push("--generation-config".to_string());
            args.push(cfg.to_string());
        }
        if let Some(ds) = &self.dataset_args {
            args.push("--dataset-args".to_string());
            args.push(ds.to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        shell_join(&args)
    }
}
