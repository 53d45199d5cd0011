//! check-model / scale commands

use crate::style::*;
use amaas_harness::{HarnessConfig, ModelKind, ModelOps, ServedModel, Session};
use anyhow::{Context, Result};
use clap::Args;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// llm, vlm, embedding, rerank, parser or audio
    #[arg(short, long)]
    kind: ModelKind,

    /// Served model name
    #[arg(short, long)]
    name: String,

    /// Serving endpoint base URL
    #[arg(short, long)]
    url: String,

    #[arg(long, env = "AMAAS_MODEL_API_KEY")]
    api_key: Option<String>,

    /// Send this input instead of the built-in probe and print the answer
    #[arg(long)]
    input: Option<String>,
}

#[derive(Args, Debug)]
pub struct ScaleArgs {
    /// Model name registered on the platform
    #[arg(short, long)]
    name: String,

    #[arg(short, long)]
    replicas: u32,
}

pub async fn check(args: CheckArgs) -> Result<()> {
    let mut model = ServedModel::new(args.kind, &args.name, &args.url)?;
    if let Some(key) = args.api_key {
        model = model.with_api_key(key);
    }

    match args.input {
        Some(input) => {
            let answer = model.run(&input).await?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
        None => {
            model
                .check()
                .await
                .with_context(|| format!("{} model {} failed its check", args.kind, args.name))?;
            println!(
                "  {} {} {} answered at {}",
                icon_success(),
                args.kind,
                style_bold(&args.name),
                model.url()
            );
        }
    }
    Ok(())
}

pub async fn scale(config: &HarnessConfig, args: ScaleArgs) -> Result<()> {
    let session = Session::new(config.platform.clone())?;
    // Replica management only talks to the platform, never the serving URL.
    let model = ServedModel::new(ModelKind::Llm, &args.name, session.base_url())?;
    let response = model
        .create_replica(&session, args.replicas)
        .await
        .with_context(|| format!("scaling {} on {}", args.name, session.base_url()))?;

    println!(
        "  {} {} scaled to {} replicas",
        icon_success(),
        style_bold(&args.name),
        args.replicas
    );
    println!("{}", style_dim(&response.to_string()));
    Ok(())
}
