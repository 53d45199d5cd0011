//! Inference-engine containers on remote hosts.
//!
//! Everything is plain `docker` CLI driven over a [`RemoteChannel`], one
//! command at a time: stop the old container, start the new one, wait for its
//! HTTP endpoint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::remote::{ChannelError, RemoteChannel, RunOptions};
use crate::util::{shell_join, shell_quote};

/// Deployment errors
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Remote channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("docker {action} failed for {container} (rc={exit_code}): {stderr}")]
    Docker {
        action: &'static str,
        container: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("{url} not ready after {waited:?}")]
    NotReady { url: String, waited: Duration },
}

/// Container to run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name (also used to stop/replace it)
    pub name: String,
    /// Image reference
    pub image: String,
    /// `--gpus` value, e.g. `all` or `"device=0,1"`
    #[serde(default)]
    pub gpus: Option<String>,
    /// `host:container` port mappings; ignored with host networking
    #[serde(default)]
    pub ports: Vec<String>,
    /// `host:container[:ro]` bind mounts
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Shared memory size (e.g. "16g")
    #[serde(default)]
    pub shm_size: Option<String>,
    /// Use `--network host`
    #[serde(default)]
    pub host_network: bool,
    /// Use `--ipc host`
    #[serde(default)]
    pub ipc_host: bool,
    /// Extra `docker run` flags
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Arguments passed to the image entrypoint
    #[serde(default)]
    pub command: Vec<String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            gpus: None,
            ports: Vec::new(),
            volumes: Vec::new(),
            env: BTreeMap::new(),
            shm_size: None,
            host_network: false,
            ipc_host: false,
            extra_args: Vec::new(),
            command: Vec::new(),
        }
    }

    /// `docker run -d ...` for this spec.
    pub fn run_command(&self) -> String {
        let mut args: Vec<String> = vec![
            "docker".into(),
            "run".into(),
            "-d".into(),
            "--name".into(),
            self.name.clone(),
        ];
        if let Some(gpus) = &self.gpus {
            args.push("--gpus".into());
            args.push(gpus.clone());
        }
        if self.host_network {
            args.push("--network".into());
            args.push("host".into());
        } else {
            for port in &self.ports {
                args.push("-p".into());
                args.push(port.clone());
            }
        }
        if self.ipc_host {
            args.push("--ipc".into());
            args.push("host".into());
        }
        if let Some(shm) = &self.shm_size {
            args.push("--shm-size".into());
            args.push(shm.clone());
        }
        for volume in &self.volumes {
            args.push("-v".into());
            args.push(volume.clone());
        }
        for (key, value) in &self.env {
            args.push("-e".into());
            args.push(format!("{}={}", key, value));
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        shell_join(&args)
    }
}

/// Container state as reported by `docker inspect`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Absent,
}

/// Manages containers on one host.
pub struct ContainerDeployer<C: RemoteChannel> {
    channel: C,
    command_timeout: Duration,
}

impl<C: RemoteChannel> ContainerDeployer<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            command_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn options(&self) -> RunOptions {
        RunOptions::with_timeout(self.command_timeout)
    }

    /// Current state of container `name`.
    pub async fn status(&self, name: &str) -> Result<ContainerStatus, DeployError> {
        let out = self
            .channel
            .run(
                &format!(
                    "docker inspect -f '{{{{.State.Running}}}}' {}",
                    shell_quote(name)
                ),
                &self.options(),
            )
            .await?;
        if !out.success() {
            return Ok(ContainerStatus::Absent);
        }
        Ok(match out.stdout.trim() {
            "true" => ContainerStatus::Running,
            _ => ContainerStatus::Stopped,
        })
    }

    /// Stop and remove `name`. A container that does not exist is already
    /// stopped.
    pub async fn stop(&self, name: &str) -> Result<(), DeployError> {
        match self.status(name).await? {
            ContainerStatus::Absent => {
                debug!("Container {} not present on {}", name, self.channel.target());
                return Ok(());
            }
            ContainerStatus::Running => {
                info!("Stopping container {} on {}", name, self.channel.target());
                let out = self
                    .channel
                    .run(&format!("docker stop {}", shell_quote(name)), &self.options())
                    .await?;
                if !out.success() {
                    warn!("docker stop {} failed: {}", name, out.stderr.trim());
                }
            }
            ContainerStatus::Stopped => {}
        }

        let out = self
            .channel
            .run(&format!("docker rm -f {}", shell_quote(name)), &self.options())
            .await?;
        if !out.success() {
            return Err(DeployError::Docker {
                action: "rm",
                container: name.to_string(),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        info!("Removed container {} on {}", name, self.channel.target());
        Ok(())
    }

    /// Start a container from `spec`. Returns the container id.
    pub async fn start(&self, spec: &ContainerSpec) -> Result<String, DeployError> {
        let command = spec.run_command();
        info!("Starting container {} on {}", spec.name, self.channel.target());
        debug!("{}", command);

        // a repeated `docker run --name` would only hit a name conflict
        let out = self
            .channel
            .run(&command, &self.options().at_most_once())
            .await?;
        if !out.success() {
            return Err(DeployError::Docker {
                action: "run",
                container: spec.name.clone(),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        let id = out.stdout.trim().to_string();
        info!(
            "Started container {} ({})",
            spec.name,
            &id[..12.min(id.len())]
        );
        Ok(id)
    }

    /// Replace whatever runs under `spec.name` with a fresh container.
    pub async fn restart(&self, spec: &ContainerSpec) -> Result<String, DeployError> {
        self.stop(&spec.name).await?;
        self.start(spec).await
    }

    /// Last `tail` lines of the container's output.
    pub async fn logs(&self, name: &str, tail: u32) -> Result<String, DeployError> {
        let out = self
            .channel
            .run(
                &format!("docker logs --tail {} {}", tail, shell_quote(name)),
                &self.options(),
            )
            .await?;
        if !out.success() {
            return Err(DeployError::Docker {
                action: "logs",
                container: name.to_string(),
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        // docker logs writes the container's stderr to stderr
        Ok(out.output())
    }

    /// Poll `url` from the host until it answers 2xx or `timeout` elapses.
    ///
    /// Channel errors count as "not ready yet".
    pub async fn wait_ready(
        &self,
        url: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), DeployError> {
        let started = Instant::now();
        let command = format!("curl -sf -o /dev/null {}", shell_quote(url));
        info!("Waiting for {} (timeout {}s)", url, timeout.as_secs());

        loop {
            match self
                .channel
                .run(&command, &RunOptions::with_timeout(interval.max(Duration::from_secs(5))))
                .await
            {
                Ok(out) if out.success() => {
                    info!(
                        "{} ready after {:.0}s",
                        url,
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(());
                }
                Ok(out) => debug!("{} not ready (rc={})", url, out.exit_code),
                Err(e) => warn!("Readiness probe for {} failed: {}", url, e),
            }

            let waited = started.elapsed();
            if waited + interval > timeout {
                return Err(DeployError::NotReady {
                    url: url.to_string(),
                    waited,
                });
            }
            tokio::time::sleep(interval).await;
        }
    }
}
