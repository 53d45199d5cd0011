//! Detached job launch.

use std::time::Duration;
use tracing::{debug, info};

use super::job::EvalJob;
use crate::remote::{ChannelError, RemoteChannel, RunOptions};
use crate::util::{escape_single_quotes, shell_quote};

/// Build a command that runs `command` in the background with its output in
/// `log_file` and its pid in `pid_file`, returning immediately.
pub fn background_command(command: &str, log_file: &str, pid_file: &str) -> String {
    format!(
        "nohup bash -c '{}' > {} 2>&1 & echo $! > {}",
        escape_single_quotes(command),
        shell_quote(log_file),
        shell_quote(pid_file)
    )
}

/// Upper bound for the launch round trip; the job itself is detached.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Full remote launch line for `job`.
///
/// The background part is grouped so `mkdir` finishes before the pid file is
/// written, and so the detached job holds no descriptor of the session.
pub fn launch_command(job: &EvalJob, command: &str) -> String {
    format!(
        "mkdir -p {} && {{ {}; }}",
        shell_quote(&job.base_dir),
        background_command(command, &job.log_file(), &job.pid_file())
    )
}

/// Start `command` for `job` on the channel's host.
///
/// Only channel errors are reported here. A command that cannot start shows
/// up later as a dead pid and an error in the log. The launch is sent at most
/// once so a dropped session never starts a second evaluator.
pub async fn launch<C: RemoteChannel + ?Sized>(
    channel: &C,
    job: &EvalJob,
    command: &str,
) -> Result<(), ChannelError> {
    let remote = launch_command(job, command);
    debug!("Launch command for {}: {}", job.work_dir, remote);

    let options = RunOptions::with_timeout(LAUNCH_TIMEOUT).at_most_once();
    let out = channel.run(&remote, &options).await?;
    info!(
        "Launched evaluation {} on {} (model={}, dataset={}, rc={})",
        job.work_dir,
        channel.target(),
        job.model,
        job.dataset,
        out.exit_code
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MockChannel;
    use crate::evaluation::job::{JobState, PidObservation};
    use crate::evaluation::prober::{ProbeConfig, StatusProber};
    use crate::remote::{CommandOutput, LocalChannel};

    #[test]
    fn test_background_command_shape() {
        let cmd = background_command("evalscope eval --model m", "/d/x.log", "/d/x.pid");
        assert_eq!(
            cmd,
            "nohup bash -c 'evalscope eval --model m' > /d/x.log 2>&1 & echo $! > /d/x.pid"
        );
    }

    #[test]
    fn test_background_command_escapes_single_quotes() {
        let cmd = background_command(
            r#"evalscope eval --generation-config '{"temperature": 0}'"#,
            "/d/x.log",
            "/d/x.pid",
        );
        assert!(cmd.starts_with(
            r#"nohup bash -c 'evalscope eval --generation-config '"'"'{"temperature": 0}'"'"''"#
        ));
    }

    #[test]
    fn test_background_command_quotes_paths_with_spaces() {
        let cmd = background_command("true", "/my dir/x.log", "/my dir/x.pid");
        assert!(cmd.contains("> '/my dir/x.log' 2>&1"));
        assert!(cmd.ends_with("echo $! > '/my dir/x.pid'"));
    }

    #[tokio::test]
    async fn test_launch_sends_single_command() {
        let channel = MockChannel::new(|_| Ok(CommandOutput::ok("")));
        let job = EvalJob::resume("w1", "/data/evals", "m", "d", Duration::from_secs(60));

        launch(&channel, &job, "sleep 1").await.unwrap();

        let commands = channel.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(
            commands[0],
            "mkdir -p /data/evals && { nohup bash -c 'sleep 1' > /data/evals/w1.log 2>&1 & \
             echo $! > /data/evals/w1.pid; }"
        );
    }

    #[tokio::test]
    async fn test_launch_propagates_channel_errors() {
        let channel = MockChannel::new(|_| {
            Err(ChannelError::Connection {
                host: "gpu".to_string(),
                message: "refused".to_string(),
            })
        });
        let job = EvalJob::resume("w1", "/data", "m", "d", Duration::from_secs(60));
        assert!(launch(&channel, &job, "true").await.is_err());
    }

    #[tokio::test]
    async fn test_launch_into_fresh_base_dir_writes_pid_first() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ProbeConfig::default();

        for i in 0..10 {
            let base = tmp.path().join(format!("round-{}", i)).join("evals");
            let job = EvalJob::resume(
                format!("w{}", i),
                base.to_string_lossy(),
                "m",
                "d",
                Duration::from_secs(60),
            );
            let started = std::time::Instant::now();
            launch(
                &LocalChannel::new(),
                &job,
                "echo 'WARNING: retry after connection error'; sleep 3",
            )
            .await
            .unwrap();
            assert!(started.elapsed() < Duration::from_secs(2), "launch blocked");
            assert!(std::path::Path::new(&job.pid_file()).exists());

            tokio::time::sleep(Duration::from_millis(200)).await;
            let status = StatusProber::new(&LocalChannel::new(), &config)
                .check_eval_status(&job)
                .await
                .unwrap();
            assert_eq!(status.state, JobState::Running, "round {}: {}", i, status);
            assert!(matches!(status.pid, PidObservation::Alive(_)));
        }
    }

    #[tokio::test]
    async fn test_launch_is_sent_at_most_once() {
        let channel = MockChannel::new(|_| Ok(CommandOutput::ok("")));
        let job = EvalJob::resume("w1", "/data", "m", "d", Duration::from_secs(60));
        launch(&channel, &job, "true").await.unwrap();
        assert!(channel.options()[0].at_most_once);
        assert_eq!(channel.options()[0].timeout, Some(LAUNCH_TIMEOUT));
    }
}
