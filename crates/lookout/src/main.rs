use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lookout_engine::config::{ConfigLoader, LookoutConfig};
use lookout_engine::scenario::{Scenario, ScenarioRunner};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lookout", version, about = "Lookout condition-resolution runner")]
struct Args {
    /// Config file (defaults to $LOOKOUT_CONFIG, ./lookout.yaml, then ~/.lookout/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a scenario file and report how its wait settled
    Run {
        scenario: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    CheckConfig,
}

async fn load_config(path: Option<&Path>) -> Result<LookoutConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_preferring(Some(path)).await?,
        None => ConfigLoader::load_default().await?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr so reports on stdout stay machine-readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref()).await?;

    match args.command {
        Command::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { scenario, json } => {
            let parsed = Scenario::load(&scenario)
                .await
                .with_context(|| format!("loading scenario {}", scenario.display()))?;
            let report = ScenarioRunner::new(config).run(parsed).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
            Ok(if report.succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
