use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use api::{AppConfig, build_orchestrator, telemetry};
use pipeline::RunOptions;

/// Run the extraction pipeline once over a novel and print the counts.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source text; defaults to `run.default_source_path` from config
    path: Option<PathBuf>,

    /// Clear the graph and the progress ledger first
    #[arg(long)]
    reset: bool,

    /// Override the configured model
    #[arg(long)]
    model: Option<String>,

    /// Override the configured temperature
    #[arg(long)]
    temperature: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init()?;

    let config = AppConfig::load()?;
    let path = args
        .path
        .or_else(|| config.run.default_source_path.clone())
        .context("No source path given and run.default_source_path is not set")?;

    let mut orchestrator = build_orchestrator(&config).await?;
    let options = RunOptions {
        reset: args.reset,
        model: args.model,
        temperature: args.temperature,
    };

    let result = orchestrator.run(&path, &options).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
