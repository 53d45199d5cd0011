//! Harness configuration
//!
//! Loaded from a TOML file with one section per subsystem:
//! - `[ssh]`: target host and reconnect schedule
//! - `[eval]`: remote base directory, timeout, poll tuning
//! - `[platform]`: platform API endpoint and login
//! - `[deploy]`: readiness polling and container specs
//!
//! Every field has a default, so an empty file is a valid config. Secrets can
//! be supplied through `AMAAS_*` environment variables instead of the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::auth::PlatformConfig;
use crate::docker::ContainerSpec;
use crate::evaluation::PollConfig;
use crate::remote::SshConfig;

/// Complete harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub ssh: SshConfig,
    pub eval: EvalSettings,
    pub platform: PlatformConfig,
    pub deploy: DeploySettings,
}

/// Evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalSettings {
    /// Remote directory for pid/log files and eval output
    pub base_dir: String,
    /// Wall-clock budget per evaluation
    pub timeout_secs: u64,
    /// Evaluations run side by side
    pub max_parallel: usize,
    /// Poll loop tuning
    pub poll: PollConfig,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            base_dir: "/tmp/amaas-eval".to_string(),
            timeout_secs: 4 * 3600,
            max_parallel: 1,
            poll: PollConfig::default(),
        }
    }
}

impl EvalSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// How long a fresh container may take to answer its health URL
    pub readiness_timeout_secs: u64,
    /// Pause between health probes
    pub readiness_interval_secs: u64,
    /// Known containers, addressable by name from the CLI
    pub containers: Vec<DeployTarget>,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            readiness_timeout_secs: 900,
            readiness_interval_secs: 10,
            containers: Vec::new(),
        }
    }
}

impl DeploySettings {
    pub fn find(&self, name: &str) -> Option<&DeployTarget> {
        self.containers.iter().find(|t| t.spec.name == name)
    }
}

/// A container plus the URL that tells when it is ready
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployTarget {
    #[serde(flatten)]
    pub spec: ContainerSpec,
    /// Health URL, probed from the host itself
    #[serde(default)]
    pub health_url: Option<String>,
}

impl HarnessConfig {
    /// `$XDG_CONFIG_HOME/amaas-harness/config.toml` (or platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("amaas-harness").join("config.toml"))
    }

    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: HarnessConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// `path` if given, else the default path if it exists, else defaults.
    /// Environment overrides are applied last.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::load(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override selected fields from `AMAAS_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AMAAS_PLATFORM_URL") {
            self.platform.base_url = v;
        }
        if let Ok(v) = std::env::var("AMAAS_USERNAME") {
            self.platform.username = v;
        }
        if let Ok(v) = std::env::var("AMAAS_PASSWORD") {
            self.platform.password = v;
        }
        if let Ok(v) = std::env::var("AMAAS_SSH_HOST") {
            self.ssh.host = v;
        }
        if let Ok(v) = std::env::var("AMAAS_SSH_USER") {
            self.ssh.user = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: HarnessConfig = toml::from_str("").unwrap();
        assert_eq!(config.eval.base_dir, "/tmp/amaas-eval");
        assert_eq!(config.eval.poll.poll_interval, Duration::from_secs(30));
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.platform.login_path, "/v1/auth/login");
        assert!(config.deploy.containers.is_empty());
    }

    #[test]
    fn test_load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[ssh]
host = "gpu-07"
user = "qa"
retry = {{ stages = [{{ attempts = 2, delay = 1 }}] }}

[eval]
base_dir = "/mnt/nas/evals"
timeout_secs = 7200
max_parallel = 2

[eval.poll]
poll_interval = 15

[eval.poll.probe]
retry_log_check = 5

[platform]
base_url = "http://10.1.1.1:8080"
username = "tester"

[[deploy.containers]]
name = "vllm-qwen"
image = "vllm/vllm-openai:v0.6.3"
gpus = "all"
ports = ["8000:8000"]
health_url = "http://127.0.0.1:8000/health"
"#
        )
        .unwrap();

        let config = HarnessConfig::load(file.path()).unwrap();
        assert_eq!(config.ssh.destination(), "qa@gpu-07");
        assert_eq!(config.ssh.retry.max_retries(), 2);
        assert_eq!(config.eval.timeout(), Duration::from_secs(7200));
        assert_eq!(config.eval.max_parallel, 2);
        assert_eq!(config.eval.poll.poll_interval, Duration::from_secs(15));
        assert_eq!(config.eval.poll.transient_backoff, Duration::from_secs(10));
        assert_eq!(config.eval.poll.probe.retry_log_check, 5);
        assert_eq!(config.platform.username, "tester");

        let target = config.deploy.find("vllm-qwen").unwrap();
        assert_eq!(target.spec.gpus.as_deref(), Some("all"));
        assert_eq!(
            target.health_url.as_deref(),
            Some("http://127.0.0.1:8000/health")
        );
        assert!(config.deploy.find("missing").is_none());
    }

    #[test]
    fn test_load_reports_path_on_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[eval]\ntimeout_secs = \"soon\"\n").unwrap();
        let err = HarnessConfig::load(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("AMAAS_PLATFORM_URL", "http://override:9000");
        std::env::set_var("AMAAS_PASSWORD", "from-env");
        std::env::set_var("AMAAS_SSH_USER", "ops");

        let mut config = HarnessConfig::default();
        config.apply_env_overrides();

        std::env::remove_var("AMAAS_PLATFORM_URL");
        std::env::remove_var("AMAAS_PASSWORD");
        std::env::remove_var("AMAAS_SSH_USER");

        assert_eq!(config.platform.base_url, "http://override:9000");
        assert_eq!(config.platform.password, "from-env");
        assert_eq!(config.ssh.user.as_deref(), Some("ops"));
    }

    #[test]
    #[serial]
    fn test_resolve_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[eval]\nbase_dir = \"/srv/evals\"\n").unwrap();
        let config = HarnessConfig::resolve(Some(file.path())).unwrap();
        assert_eq!(config.eval.base_dir, "/srv/evals");
    }
}
