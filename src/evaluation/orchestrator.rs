//! Remote evaluation orchestrator.
//!
//! Launches an evaluation in the background on the remote host, then polls
//! it until it completes, fails or runs out of time:
//!
//! - `running`   -> log progress, wait `poll_interval`
//! - `completed` -> read the score and return
//! - `failed`    -> [`EvalError::JobFailed`]
//! - `unknown`   -> warn, wait `unknown_backoff`
//! - probe error -> warn, wait `transient_backoff`
//!
//! Only the timeout and a failed job escape the loop. Every wait is clamped to
//! the remaining budget so the timeout fires on schedule.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::job::{EvalJob, JobState, JobStatus};
use super::launcher;
use super::prober::{ProbeConfig, StatusProber};
use crate::remote::{ChannelError, RemoteChannel, RunOptions};
use crate::util::{last_line, quote_glob, shell_quote};

static SCORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""score"\s*:\s*(-?[0-9]+(?:\.[0-9]+)?(?:[eE][-+]?[0-9]+)?)"#)
        .expect("score regex is valid")
});

/// Errors surfaced by an evaluation run
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Evaluation {work_dir} timed out after {elapsed:?}")]
    Timeout { work_dir: String, elapsed: Duration },

    #[error("Evaluation {work_dir} failed: {message}")]
    JobFailed { work_dir: String, message: String },

    #[error("Remote channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("No score found in results of {work_dir}")]
    ScoreNotFound { work_dir: String },

    #[error("Invalid score value: {0}")]
    InvalidScore(String),
}

/// Poll loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Wait between probes while the job is running
    #[serde(with = "crate::util::secs_f64")]
    pub poll_interval: Duration,
    /// Wait after a probe raised a channel error
    #[serde(with = "crate::util::secs_f64")]
    pub transient_backoff: Duration,
    /// Wait after an `unknown` probe
    #[serde(with = "crate::util::secs_f64")]
    pub unknown_backoff: Duration,
    /// Probe settings
    pub probe: ProbeConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            transient_backoff: Duration::from_secs(10),
            unknown_backoff: Duration::from_secs(10),
            probe: ProbeConfig::default(),
        }
    }
}

/// Finished evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub work_dir: String,
    pub model: String,
    pub dataset: String,
    pub score: f64,
    pub elapsed_secs: f64,
}

/// Drives evaluations on one host.
pub struct EvalOrchestrator<C: RemoteChannel> {
    channel: C,
    config: PollConfig,
}

impl<C: RemoteChannel> EvalOrchestrator<C> {
    pub fn new(channel: C, config: PollConfig) -> Self {
        Self { channel, config }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    fn prober(&self) -> StatusProber<'_, C> {
        StatusProber::new(&self.channel, &self.config.probe)
    }

    /// Single probe of `job`.
    pub async fn check_eval_status(&self, job: &EvalJob) -> Result<JobStatus, ChannelError> {
        self.prober().check_eval_status(job).await
    }

    /// Launch `command` for `job` and poll it to completion.
    #[instrument(skip(self, job, command), fields(work_dir = %job.work_dir, dataset = %job.dataset))]
    pub async fn run_eval(&self, job: &EvalJob, command: &str) -> Result<EvalOutcome, EvalError> {
        launcher::launch(&self.channel, job, command).await?;
        self.wait(job).await
    }

    /// Poll an already launched job to completion and read its score.
    pub async fn wait(&self, job: &EvalJob) -> Result<EvalOutcome, EvalError> {
        let started = Instant::now();
        info!(
            "Polling evaluation {} (timeout {}s)",
            job.work_dir,
            job.timeout.as_secs()
        );

        loop {
            let elapsed = started.elapsed();
            if elapsed >= job.timeout {
                error!(
                    "Evaluation {} timed out after {:.0}s",
                    job.work_dir,
                    elapsed.as_secs_f64()
                );
                return Err(EvalError::Timeout {
                    work_dir: job.work_dir.clone(),
                    elapsed,
                });
            }

            let status = match self.check_eval_status(job).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(
                        "Transient error while probing {}: {}; retrying in {}s",
                        job.work_dir,
                        e,
                        self.config.transient_backoff.as_secs()
                    );
                    self.pause(started, job.timeout, self.config.transient_backoff)
                        .await;
                    continue;
                }
            };

            match status.state {
                JobState::Running => {
                    match self.latest_progress(job).await {
                        Some(line) => info!(
                            "[{} {:.0}s] {}",
                            job.work_dir,
                            started.elapsed().as_secs_f64(),
                            line
                        ),
                        None => debug!("{}: {}", job.work_dir, status.message),
                    }
                    self.pause(started, job.timeout, self.config.poll_interval)
                        .await;
                }
                JobState::Completed => {
                    info!("Evaluation {} completed: {}", job.work_dir, status.message);
                    break;
                }
                JobState::Failed => {
                    error!("Evaluation {} failed: {}", job.work_dir, status.message);
                    return Err(EvalError::JobFailed {
                        work_dir: job.work_dir.clone(),
                        message: status.message,
                    });
                }
                JobState::Unknown => {
                    warn!(
                        "Evaluation {} state unknown ({}); retrying in {}s",
                        job.work_dir,
                        status.message,
                        self.config.unknown_backoff.as_secs()
                    );
                    self.pause(started, job.timeout, self.config.unknown_backoff)
                        .await;
                }
            }
        }

        let score = self.read_score(job).await?;
        let elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            "Evaluation {} finished: model={}, dataset={}, score={}, duration={:.1}s",
            job.work_dir, job.model, job.dataset, score, elapsed_secs
        );

        Ok(EvalOutcome {
            work_dir: job.work_dir.clone(),
            model: job.model.clone(),
            dataset: job.dataset.clone(),
            score,
            elapsed_secs,
        })
    }

    /// Last line of the job log, if it can be read.
    pub async fn latest_progress(&self, job: &EvalJob) -> Option<String> {
        match self.prober().tail_log(job, 1).await {
            Ok(tail) => last_line(&tail).map(str::to_string),
            Err(e) => {
                debug!("Could not read progress for {}: {}", job.work_dir, e);
                None
            }
        }
    }

    /// First `"score": <number>` found in the job's result file.
    pub async fn read_score(&self, job: &EvalJob) -> Result<f64, EvalError> {
        let command = format!(
            "grep -o -h -E {} {} | head -n 1",
            shell_quote(r#""score": *-?[0-9][0-9.eE+-]*"#),
            quote_glob(&job.result_glob())
        );
        let out = self
            .channel
            .run(
                &command,
                &RunOptions::with_timeout(self.config.probe.command_timeout),
            )
            .await?;
        parse_score(&out.stdout).transpose().ok_or_else(|| EvalError::ScoreNotFound {
            work_dir: job.work_dir.clone(),
        })?
    }

    async fn pause(&self, started: Instant, budget: Duration, wait: Duration) {
        let remaining = budget.saturating_sub(started.elapsed());
        tokio::time::sleep(wait.min(remaining)).await;
    }
}

/// Extract the first `"score": <number>` from text.
///
/// `Ok(None)` when no score field is present.
pub fn parse_score(text: &str) -> Result<Option<f64>, EvalError> {
    let Some(caps) = SCORE_RE.captures(text) else {
        return Ok(None);
    };
    let raw = &caps[1];
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| EvalError::InvalidScore(raw.to_string()))
}
