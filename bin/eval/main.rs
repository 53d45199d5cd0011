//! AMaaS evaluation CLI
//!
//! Runs remote evaluations, manages inference containers and checks served
//! models on the AMaaS platform.

mod commands;
mod style;

use amaas_harness::{HarnessConfig, LocalChannel, RemoteChannel, SshChannel};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "amaas-eval")]
#[command(about = "Remote evaluation and deployment harness for AMaaS", version)]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true, env = "AMAAS_CONFIG")]
    config: Option<PathBuf>,

    /// Target host, overrides [ssh].host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Run commands on this machine instead of over SSH
    #[arg(long, global = true)]
    local: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch evaluations and wait for their scores
    Run(commands::eval::RunArgs),

    /// Probe an evaluation once
    Status(commands::eval::JobArgs),

    /// Resume polling an evaluation started earlier
    Wait(commands::eval::JobArgs),

    /// Manage inference containers
    #[command(subcommand)]
    Deploy(commands::deploy::DeployCommand),

    /// Send a probe request to a served model
    CheckModel(commands::model::CheckArgs),

    /// Scale a model through the platform API
    Scale(commands::model::ScaleArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("amaas_harness={}", default_level).parse()?)
                .add_directive(format!("amaas_eval={}", default_level).parse()?),
        )
        .with_target(false)
        .init();

    let mut config = HarnessConfig::resolve(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.ssh.host = host;
    }

    let channel: Arc<dyn RemoteChannel> = if cli.local {
        Arc::new(LocalChannel::new())
    } else {
        Arc::new(SshChannel::new(config.ssh.clone()))
    };
    info!("Target: {}", channel.target());

    match cli.command {
        Commands::Run(args) => commands::eval::run(&config, channel, args).await,
        Commands::Status(args) => commands::eval::status(&config, channel, args).await,
        Commands::Wait(args) => commands::eval::wait(&config, channel, args).await,
        Commands::Deploy(cmd) => commands::deploy::run(&config, channel, cmd).await,
        Commands::CheckModel(args) => commands::model::check(args).await,
        Commands::Scale(args) => commands::model::scale(&config, args).await,
    }
}
