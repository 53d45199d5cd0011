//! deploy subcommands

use crate::style::*;
use amaas_harness::{ContainerDeployer, DeployTarget, HarnessConfig, RemoteChannel};
use anyhow::{Context, Result};
use clap::Subcommand;
use std::sync::Arc;
use std::time::Duration;

#[derive(Subcommand, Debug)]
pub enum DeployCommand {
    /// Start a configured container and wait for its health URL
    Start {
        name: String,
        /// Do not wait for readiness
        #[arg(long)]
        no_wait: bool,
    },
    /// Stop and remove a container
    Stop { name: String },
    /// Stop, then start again
    Restart {
        name: String,
        #[arg(long)]
        no_wait: bool,
    },
    /// Show container state
    Status { name: String },
    /// Print the container's recent output
    Logs {
        name: String,
        #[arg(short = 'n', long, default_value = "100")]
        tail: u32,
    },
}

fn target<'a>(config: &'a HarnessConfig, name: &str) -> Result<&'a DeployTarget> {
    config
        .deploy
        .find(name)
        .with_context(|| format!("No container named '{}' in [[deploy.containers]]", name))
}

pub async fn run(
    config: &HarnessConfig,
    channel: Arc<dyn RemoteChannel>,
    command: DeployCommand,
) -> Result<()> {
    let deployer = ContainerDeployer::new(channel);

    match command {
        DeployCommand::Start { name, no_wait } => {
            let target = target(config, &name)?;
            let id = deployer.start(&target.spec).await?;
            println!("  {} Started {} {}", icon_success(), name, style_dim(&id));
            if !no_wait {
                wait_ready(config, &deployer, target).await?;
            }
        }
        DeployCommand::Stop { name } => {
            deployer.stop(&name).await?;
            println!("  {} Stopped {}", icon_success(), name);
        }
        DeployCommand::Restart { name, no_wait } => {
            let target = target(config, &name)?;
            let id = deployer.restart(&target.spec).await?;
            println!("  {} Restarted {} {}", icon_success(), name, style_dim(&id));
            if !no_wait {
                wait_ready(config, &deployer, target).await?;
            }
        }
        DeployCommand::Status { name } => {
            let status = deployer.status(&name).await?;
            let word = format!("{:?}", status).to_lowercase();
            print_header(&format!("Container {}", name));
            print_key_value("Host", deployer.channel().target());
            print_key_value_colored("State", &word, state_color(&word));
            if let Some(target) = config.deploy.find(&name) {
                print_key_value("Image", &target.spec.image);
            }
            println!();
        }
        DeployCommand::Logs { name, tail } => {
            let logs = deployer.logs(&name, tail).await?;
            println!("{}", logs);
        }
    }
    Ok(())
}

async fn wait_ready(
    config: &HarnessConfig,
    deployer: &ContainerDeployer<Arc<dyn RemoteChannel>>,
    target: &DeployTarget,
) -> Result<()> {
    let Some(url) = &target.health_url else {
        return Ok(());
    };
    deployer
        .wait_ready(
            url,
            Duration::from_secs(config.deploy.readiness_timeout_secs),
            Duration::from_secs(config.deploy.readiness_interval_secs),
        )
        .await?;
    println!("  {} {} is ready", icon_success(), url);
    Ok(())
}
