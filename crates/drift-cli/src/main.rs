//! drift - autonomous agent runtime
//!
//! Thin command-line front end over `drift-core`: loads configuration,
//! wires the runtime, and streams status to the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use drift_core::agent::{LifecycleController, Runtime};
use drift_core::ai::HttpModelClient;
use drift_core::config::RuntimeConfig;

/// Environment variable carrying the gateway API key.
const API_KEY_VAR: &str = "DRIFT_API_KEY";

#[derive(Parser)]
#[command(name = "drift")]
#[command(about = "Autonomous long-running agent runtime", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the main agent on a goal until interrupted
    Run {
        /// The goal text
        goal: Option<String>,

        /// Read the goal from a file instead
        #[arg(long)]
        goal_file: Option<PathBuf>,
    },

    /// Run a one-off tournament on a topic and print the final artifacts
    Tournament {
        topic: String,

        /// Workers per stage, comma separated and non-increasing, e.g. 4,3,2
        #[arg(long)]
        stages: Option<String>,

        #[arg(long)]
        debate_rounds: Option<u32>,
    },

    /// Print the default configuration as TOML
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(RuntimeConfig::default()),
    }
}

fn build_runtime(config: RuntimeConfig) -> Result<Runtime> {
    let api_key = std::env::var(API_KEY_VAR)
        .with_context(|| format!("{API_KEY_VAR} must be set to reach the model gateway"))?;
    let client = Arc::new(HttpModelClient::new(config.model.base_url.clone(), api_key));
    Ok(Runtime::new(config, client)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Config => {
            println!("{}", RuntimeConfig::default_toml());
        }

        Commands::Run { goal, goal_file } => {
            let goal = match (goal, goal_file) {
                (Some(goal), _) => goal,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading goal from {}", path.display()))?,
                (None, None) => bail!("provide a goal argument or --goal-file"),
            };

            let runtime = build_runtime(config)?;
            let controller = Arc::new(LifecycleController::new(runtime));
            let mut status_rx = controller.subscribe().await;
            controller.start(Some(goal)).await?;
            info!("agent started; press ctrl-c to stop");

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("stopping agent");
                        controller.stop().await;
                        break;
                    }
                    status = status_rx.recv() => match status {
                        Ok(snapshot) => {
                            println!(
                                "[{}] loop={} tokens={} context={:.1}% last={}",
                                snapshot.status,
                                snapshot.loop_count,
                                snapshot.total_tokens,
                                snapshot.context_usage_percent * 100.0,
                                snapshot.last_action.as_deref().unwrap_or("-"),
                            );
                        }
                        // Lagging just drops intermediates; the stream resumes.
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
            }

            let last = controller.status().await;
            println!(
                "final: status={} loops={} tokens={}",
                last.status, last.loop_count, last.total_tokens
            );
        }

        Commands::Tournament {
            topic,
            stages,
            debate_rounds,
        } => {
            let stages = stages
                .map(|raw| {
                    raw.split(',')
                        .map(|part| part.trim().parse::<usize>())
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()
                .context("stages must be comma-separated integers")?;

            let runtime = build_runtime(config)?;
            let id = runtime.tournaments.create(&topic, stages, debate_rounds)?;
            info!(tournament = %id, "tournament starting");
            let tournament = runtime.tournaments.run(&id, &runtime.cancellation).await?;

            println!("tournament {} finished: {:?}", tournament.id, tournament.status);
            for artifact in &tournament.final_artifacts {
                println!(
                    "--- {} ({})\n{}",
                    artifact.filename,
                    artifact.description.as_deref().unwrap_or("no description"),
                    artifact.content
                );
            }
            if let Some(error) = &tournament.error {
                bail!("tournament failed: {error}");
            }
        }
    }

    Ok(())
}
