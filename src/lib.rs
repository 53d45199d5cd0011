//! QA harness for the AMaaS LLM-serving platform.
//!
//! The centrepiece is the remote evaluation orchestrator: start an eval-tool
//! run on a GPU host in the background, poll it over SSH until it finishes,
//! and read back its score.
//!
//! ## Module Structure
//!
//! - `remote/`: command channels (SSH, local shell)
//! - `evaluation/`: job model, launcher, status prober, poll loop
//! - `docker`: inference-engine container deployment over a channel
//! - `auth`: platform credential session
//! - `models`: served model categories and their checks
//! - `worker/`: bounded task pool
//! - `retry`: staged retry policies
//! - `config`: TOML configuration
//! - `util/`: shell quoting helpers

/// Shared utility functions
pub mod util;

/// Staged retry policies
pub mod retry;

/// Remote command channels
pub mod remote;

/// Remote evaluation pipeline
pub mod evaluation;

/// Container deployment
pub mod docker;

/// Platform credential session
pub mod auth;

/// Served model categories
pub mod models;

/// Background workers
pub mod worker;

/// Harness configuration
pub mod config;

pub use auth::{PlatformConfig, Session, SessionError};
pub use config::{DeploySettings, DeployTarget, EvalSettings, HarnessConfig};
pub use docker::{ContainerDeployer, ContainerSpec, ContainerStatus, DeployError};
pub use evaluation::{
    EvalError, EvalJob, EvalOrchestrator, EvalOutcome, EvalTask, JobState, JobStatus,
    PidObservation, PollConfig, ProbeConfig, StatusProber,
};
pub use models::{ModelError, ModelKind, ModelOps, ServedModel};
pub use remote::{
    ChannelError, CommandOutput, LocalChannel, RemoteChannel, RunOptions, SshChannel, SshConfig,
};
pub use retry::{retry_async, RetryPolicy, RetryStage};
pub use worker::{TaskPool, TaskReport};
