//! Evaluation job identity, remote artifact paths and probe results.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// One evaluation run on a remote host.
///
/// The `work_dir` token names every artifact of the run. It is not persisted
/// anywhere, so a caller that wants to resume polling after a restart must
/// keep it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalJob {
    /// Opaque token, unique per run
    pub work_dir: String,
    /// Remote directory holding the pid/log files and the output tree
    pub base_dir: String,
    /// Model name as it appears in the report path
    pub model: String,
    /// Dataset name as it appears in the report path
    pub dataset: String,
    /// Wall-clock budget for polling
    pub timeout: Duration,
}

impl EvalJob {
    /// Create a job with a freshly generated work-directory token.
    pub fn new(
        base_dir: impl Into<String>,
        model: impl Into<String>,
        dataset: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self::resume(generate_work_dir(), base_dir, model, dataset, timeout)
    }

    /// Rebuild a job around an existing token.
    pub fn resume(
        work_dir: impl Into<String>,
        base_dir: impl Into<String>,
        model: impl Into<String>,
        dataset: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            base_dir: base_dir.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dataset: dataset.into(),
            timeout,
        }
    }

    /// `<base_dir>/<work_dir>.pid`
    pub fn pid_file(&self) -> String {
        format!("{}/{}.pid", self.base_dir, self.work_dir)
    }

    /// `<base_dir>/<work_dir>.log`
    pub fn log_file(&self) -> String {
        format!("{}/{}.log", self.base_dir, self.work_dir)
    }

    /// `<base_dir>/<work_dir>`, the eval tool's output root.
    pub fn output_dir(&self) -> String {
        format!("{}/{}", self.base_dir, self.work_dir)
    }

    /// `<base_dir>/<work_dir>/*/reports/<model>/<dataset>.json`
    pub fn result_glob(&self) -> String {
        format!(
            "{}/*/reports/{}/{}.json",
            self.output_dir(),
            self.model,
            self.dataset
        )
    }
}

/// `eval_<YYYYmmdd_HHMMSS>_<8 hex>`
pub fn generate_work_dir() -> String {
    format!(
        "eval_{}_{}",
        Utc::now().format("%Y%m%d_%H%M%S"),
        &Uuid::new_v4().simple().to_string()[..8]
    )
}

/// Observable state of a job at one probe instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Completed,
    Failed,
    Unknown,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a probe learned about the job's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PidObservation {
    /// No readable pid file
    NotObserved,
    /// Pid read and the process exists
    Alive(u32),
    /// Pid read but the process is gone
    Dead(u32),
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub message: String,
    pub pid: PidObservation,
}

impl JobStatus {
    pub fn new(state: JobState, message: impl Into<String>, pid: PidObservation) -> Self {
        Self {
            state,
            message: message.into(),
            pid,
        }
    }

    /// `(state, message)` pair, handy for logging and assertions.
    pub fn pair(&self) -> (&'static str, &str) {
        (self.state.as_str(), self.message.as_str())
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.state, self.message)
    }
}
