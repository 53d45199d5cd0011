//! run / status / wait commands

use crate::style::*;
use amaas_harness::{
    EvalJob, EvalOrchestrator, EvalOutcome, EvalTask, HarnessConfig, RemoteChannel, TaskPool,
};
use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

type Orchestrator = EvalOrchestrator<Arc<dyn RemoteChannel>>;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Model name as served by the endpoint
    #[arg(short, long)]
    model: String,

    /// OpenAI-compatible API url the eval tool talks to
    #[arg(long, env = "AMAAS_EVAL_API_URL")]
    api_url: String,

    /// API key for the serving endpoint
    #[arg(long, env = "AMAAS_EVAL_API_KEY")]
    api_key: Option<String>,

    /// Dataset to evaluate; repeat to run several
    #[arg(short, long = "dataset", required = true)]
    datasets: Vec<String>,

    /// Samples per dataset
    #[arg(long)]
    limit: Option<u32>,

    #[arg(long, default_value = "8")]
    batch_size: u32,

    /// Generation config as JSON
    #[arg(long)]
    generation_config: Option<String>,

    /// Timeout per evaluation in seconds (overrides [eval].timeout_secs)
    #[arg(long)]
    timeout: Option<u64>,

    /// Evaluations running at once (overrides [eval].max_parallel)
    #[arg(short = 'j', long)]
    parallel: Option<usize>,
}

#[derive(Args, Debug)]
pub struct JobArgs {
    /// Work-directory token printed when the job was launched
    work_dir: String,

    #[arg(short, long)]
    model: String,

    #[arg(short, long)]
    dataset: String,

    /// Timeout in seconds counted from now (overrides [eval].timeout_secs)
    #[arg(long)]
    timeout: Option<u64>,
}

impl JobArgs {
    fn job(&self, config: &HarnessConfig) -> EvalJob {
        let timeout = self
            .timeout
            .map(Duration::from_secs)
            .unwrap_or_else(|| config.eval.timeout());
        EvalJob::resume(
            &self.work_dir,
            &config.eval.base_dir,
            &self.model,
            &self.dataset,
            timeout,
        )
    }
}

fn orchestrator(config: &HarnessConfig, channel: Arc<dyn RemoteChannel>) -> Orchestrator {
    EvalOrchestrator::new(channel, config.eval.poll.clone())
}

pub async fn run(
    config: &HarnessConfig,
    channel: Arc<dyn RemoteChannel>,
    args: RunArgs,
) -> Result<()> {
    let generation_config = args
        .generation_config
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("--generation-config is not valid JSON")?;
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.eval.timeout());
    let parallel = args.parallel.unwrap_or(config.eval.max_parallel);

    print_header("Remote evaluation");
    print_key_value("Host", channel.target());
    print_key_value("Model", &args.model);
    print_key_value("Datasets", &args.datasets.join(", "));
    print_key_value("Timeout", &format!("{}s", timeout.as_secs()));
    println!();

    let orchestrator = Arc::new(orchestrator(config, channel));
    let mut pool: TaskPool<EvalOutcome> = TaskPool::new("eval", parallel);

    for dataset in &args.datasets {
        let mut task = EvalTask::new(&args.model, &args.api_url, dataset);
        task.api_key = args.api_key.clone();
        task.limit = args.limit;
        task.eval_batch_size = args.batch_size;
        task.generation_config = generation_config.clone();

        let job = task.job(&config.eval.base_dir, timeout);
        let command = task.command(&job);
        println!(
            "  {} {} {}",
            style_dim("launch"),
            dataset,
            style_dim(&format!("(work dir {})", job.work_dir))
        );

        let orchestrator = Arc::clone(&orchestrator);
        pool.spawn(dataset.clone(), async move {
            let outcome = orchestrator.run_eval(&job, &command).await?;
            Ok(outcome)
        });
    }

    let reports = pool.join().await;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Dataset", "Work dir", "Score", "Elapsed", "Result"]);

    let mut failures = 0usize;
    for report in &reports {
        match &report.result {
            Ok(outcome) => {
                table.add_row(vec![
                    Cell::new(&outcome.dataset),
                    Cell::new(&outcome.work_dir),
                    Cell::new(format!("{:.4}", outcome.score)),
                    Cell::new(format!("{:.0}s", outcome.elapsed_secs)),
                    Cell::new("ok").fg(Color::Green),
                ]);
            }
            Err(e) => {
                failures += 1;
                table.add_row(vec![
                    Cell::new(&report.label),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new(format!("{:.0}s", report.elapsed.as_secs_f64())),
                    Cell::new(format!("{:#}", e)).fg(Color::Red),
                ]);
            }
        }
    }
    println!("\n{}\n", table);

    if failures > 0 {
        println!(
            "  {} {}/{} evaluations failed\n",
            icon_error(),
            failures,
            reports.len()
        );
        anyhow::bail!("{} evaluation(s) failed", failures);
    }
    println!("  {} All evaluations completed\n", icon_success());
    Ok(())
}

pub async fn status(
    config: &HarnessConfig,
    channel: Arc<dyn RemoteChannel>,
    args: JobArgs,
) -> Result<()> {
    let job = args.job(config);
    let orchestrator = orchestrator(config, channel);
    let status = orchestrator
        .check_eval_status(&job)
        .await
        .with_context(|| format!("probing {}", job.work_dir))?;

    print_header(&format!("Evaluation {}", job.work_dir));
    let state = status.state.as_str();
    print_key_value_colored("State", state, state_color(state));
    print_key_value("Message", &status.message);
    print_key_value("Log", &job.log_file());
    if let Some(line) = orchestrator.latest_progress(&job).await {
        print_key_value("Last line", &line);
    }
    println!();
    Ok(())
}

pub async fn wait(
    config: &HarnessConfig,
    channel: Arc<dyn RemoteChannel>,
    args: JobArgs,
) -> Result<()> {
    let job = args.job(config);
    info!("Resuming {} ({}/{})", job.work_dir, job.model, job.dataset);
    let outcome = orchestrator(config, channel)
        .wait(&job)
        .await
        .with_context(|| format!("waiting for {}", job.work_dir))?;

    print_header(&format!("Evaluation {}", outcome.work_dir));
    print_key_value("Model", &outcome.model);
    print_key_value("Dataset", &outcome.dataset);
    print_key_value_colored("Score", &format!("{:.4}", outcome.score), colors::GREEN);
    print_key_value("Elapsed", &format!("{:.0}s", outcome.elapsed_secs));
    println!();
    Ok(())
}
