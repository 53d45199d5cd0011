//! Remote evaluation: launch a job in the background on a host, then poll it
//! until it finishes and read its score.

pub mod job;
pub mod launcher;
pub mod orchestrator;
pub mod prober;
pub mod task;

pub use job::{generate_work_dir, EvalJob, JobState, JobStatus, PidObservation};
pub use launcher::{background_command, launch, launch_command};
pub use orchestrator::{parse_score, EvalError, EvalOrchestrator, EvalOutcome, PollConfig};
pub use prober::{classify_log_tail, ProbeConfig, StatusProber, SUCCESS_MARKER};
pub use task::EvalTask;
