//! Job status probing.
//!
//! Signals are consulted in a fixed order: process liveness, then the log
//! tail, then the result file. A live process always wins, whatever the log
//! says.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use super::job::{EvalJob, JobState, JobStatus, PidObservation};
use crate::remote::{ChannelError, RemoteChannel, RunOptions};
use crate::util::{last_line, quote_glob, shell_quote};

/// Line the eval tool prints once a run finished cleanly.
pub const SUCCESS_MARKER: &str = "Evaluation task completed";

/// Case-insensitive needles that mark a failed run.
const FAILURE_MARKERS: [&str; 2] = ["traceback", "error"];

/// Probe tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Lines read from the end of the log
    pub tail_lines: u32,
    /// Log reads before falling back to the result file
    pub retry_log_check: u32,
    /// Pause between log reads
    #[serde(with = "crate::util::secs_f64")]
    pub log_retry_delay: Duration,
    /// Timeout for each individual remote command
    #[serde(with = "crate::util::secs_f64")]
    pub command_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            tail_lines: 20,
            retry_log_check: 3,
            log_retry_delay: Duration::from_secs(2),
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Reads remote state and classifies a job.
pub struct StatusProber<'a, C: RemoteChannel + ?Sized> {
    channel: &'a C,
    config: &'a ProbeConfig,
}

impl<'a, C: RemoteChannel + ?Sized> StatusProber<'a, C> {
    pub fn new(channel: &'a C, config: &'a ProbeConfig) -> Self {
        Self { channel, config }
    }

    fn options(&self) -> RunOptions {
        RunOptions::with_timeout(self.config.command_timeout)
    }

    /// Classify the job's current state.
    ///
    /// Channel errors are returned as-is; the poll loop decides what to do
    /// with them.
    #[instrument(skip(self, job), fields(work_dir = %job.work_dir))]
    pub async fn check_eval_status(&self, job: &EvalJob) -> Result<JobStatus, ChannelError> {
        let pid = self.observe_pid(job).await?;
        if let PidObservation::Alive(p) = pid {
            return Ok(JobStatus::new(
                JobState::Running,
                format!("Process {} is running", p),
                pid,
            ));
        }

        let attempts = self.config.retry_log_check.max(1);
        for attempt in 1..=attempts {
            let tail = self.tail_log(job, self.config.tail_lines).await?;
            if let Some(status) = classify_log_tail(&tail, pid) {
                return Ok(status);
            }
            debug!(
                "Log check {}/{} inconclusive for {}",
                attempt, attempts, job.work_dir
            );
            if attempt < attempts {
                tokio::time::sleep(self.config.log_retry_delay).await;
            }
        }

        if self.result_file_exists(job).await? {
            return Ok(JobStatus::new(
                JobState::Completed,
                "Result file found (log verification skipped)",
                pid,
            ));
        }

        let message = match pid {
            PidObservation::NotObserved => {
                "No pid file, no log verdict and no result file yet".to_string()
            }
            PidObservation::Dead(p) | PidObservation::Alive(p) => format!(
                "Process {} exited without a log verdict or result file",
                p
            ),
        };
        Ok(JobStatus::new(JobState::Unknown, message, pid))
    }

    /// Read the pid file and check whether that process still exists.
    pub async fn observe_pid(&self, job: &EvalJob) -> Result<PidObservation, ChannelError> {
        let out = self
            .channel
            .run(&format!("cat {}", shell_quote(&job.pid_file())), &self.options())
            .await?;
        if !out.success() {
            return Ok(PidObservation::NotObserved);
        }
        let pid = match out.stdout.trim().parse::<u32>() {
            Ok(pid) => pid,
            Err(_) => {
                debug!("Unreadable pid file content: {:?}", out.stdout);
                return Ok(PidObservation::NotObserved);
            }
        };

        // an exited job whose parent never reaped it still shows up as `Z`
        let ps = self
            .channel
            .run(&format!("ps -p {} -o stat=", pid), &self.options())
            .await?;
        let stat = ps.stdout.trim();
        Ok(if ps.success() && !stat.starts_with('Z') {
            PidObservation::Alive(pid)
        } else {
            PidObservation::Dead(pid)
        })
    }

    /// Last `lines` lines of the job log. A missing log reads as empty.
    pub async fn tail_log(&self, job: &EvalJob, lines: u32) -> Result<String, ChannelError> {
        let out = self
            .channel
            .run(
                &format!("tail -n {} {}", lines, shell_quote(&job.log_file())),
                &self.options(),
            )
            .await?;
        Ok(if out.success() { out.stdout } else { String::new() })
    }

    pub async fn result_file_exists(&self, job: &EvalJob) -> Result<bool, ChannelError> {
        let out = self
            .channel
            .run(
                &format!("ls -1 {} 2>/dev/null", quote_glob(&job.result_glob())),
                &self.options(),
            )
            .await?;
        Ok(out.success() && !out.stdout.trim().is_empty())
    }
}

/// Verdict carried by a log tail, if any. Success is checked before failure.
pub fn classify_log_tail(tail: &str, pid: PidObservation) -> Option<JobStatus> {
    if tail.contains(SUCCESS_MARKER) {
        return Some(JobStatus::new(
            JobState::Completed,
            format!("Log verified: {}", SUCCESS_MARKER),
            pid,
        ));
    }
    let lowered = tail.to_lowercase();
    if FAILURE_MARKERS.iter().any(|m| lowered.contains(m)) {
        let line = last_line(tail).unwrap_or_default();
        return Some(JobStatus::new(
            JobState::Failed,
            format!("Found error in log: {}", line),
            pid,
        ));
    }
    None
}
