//! Hook binary: one JSON object in on stdin, exactly one JSON object out on
//! stdout. Diagnostics go to stderr; the exit code is 0 for every logical
//! outcome.

use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use reviewgate::{
    CompletionOrchestrator, HookConfig, HookInput, HookOutput, HookPaths, StageOrchestrator,
};

#[derive(Parser)]
#[command(name = "reviewgate", version, about = "Completion-review orchestration hook")]
struct Cli {
    /// Installation root (default: ~/.claude/hooks, or $REVIEWGATE_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Review a completion edge (the default when no subcommand is given)
    Completion,
    /// Review a single tool call for the given stage
    Stage {
        #[arg(long, default_value = "code")]
        stage: String,
    },
    /// Delete all persisted state for a session
    Cleanup {
        #[arg(long)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = HookPaths::resolve(cli.root.clone());
    let config = HookConfig::load(&paths.config_path());

    let output = match cli.command.unwrap_or(Command::Completion) {
        Command::Completion => run_completion(config, paths).await,
        Command::Stage { stage } => run_stage(&stage, config, paths).await,
        Command::Cleanup { session } => return run_cleanup(&session, paths).await,
    };

    // stdout carries exactly one JSON object and nothing else; the hook
    // paths never exit nonzero
    match serde_json::to_string(&output) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!("failed to serialize output: {e}");
            println!(r#"{{"continue": true, "systemMessage": ""}}"#);
        }
    }
    Ok(())
}

async fn run_completion(config: HookConfig, paths: HookPaths) -> HookOutput {
    let Some(input) = read_input() else {
        return HookOutput::message("[completion] input parse failed");
    };

    let orchestrator = match CompletionOrchestrator::new(config, paths) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!("orchestrator init failed: {e}");
            return HookOutput::message(format!("[completion] internal error: {e}"));
        }
    };

    match orchestrator.orchestrate(input).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("orchestration failed: {e}");
            HookOutput::message(format!("[completion] internal error: {e}"))
        }
    }
}

async fn run_stage(stage: &str, config: HookConfig, paths: HookPaths) -> HookOutput {
    let Some(input) = read_input() else {
        return HookOutput::message("[review] input parse failed");
    };

    let orchestrator = match StageOrchestrator::new(config, paths) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!("orchestrator init failed: {e}");
            return HookOutput::message(format!("[review] internal error: {e}"));
        }
    };

    match orchestrator.orchestrate(stage, input).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("stage review failed: {e}");
            HookOutput::message(format!("[review] internal error: {e}"))
        }
    }
}

async fn run_cleanup(session: &str, paths: HookPaths) -> anyhow::Result<()> {
    let store = reviewgate::state::StateStore::new(paths.state_dir())
        .context("opening state store")?;
    store
        .cleanup_session(session)
        .await
        .with_context(|| format!("cleaning up state for session {session}"))?;
    Ok(())
}

fn read_input() -> Option<HookInput> {
    let mut buffer = String::new();
    std::io::stdin().read_to_string(&mut buffer).ok()?;
    serde_json::from_str(&buffer).ok()
}
