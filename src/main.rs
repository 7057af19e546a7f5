use action_sandbox::bridge::GuiBridge;
use action_sandbox::{Action, ActionExecutor, ActionResult, ExecutorError, SandboxConfig};
use anyhow::{Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "action-sandbox")]
#[command(about = "Action execution worker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a single action and print its result
    Run {
        /// Action descriptor (JSON)
        #[arg(short, long)]
        action: PathBuf,
        /// Input data as a JSON object
        #[arg(short, long, default_value = "{}")]
        input: String,
    },
    /// Read jobs as JSON lines from stdin and write results to stdout
    Serve,
    /// Capture the GUI target's screen as base64 PNG
    Capture {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

/// Job received on stdin
#[derive(Debug, Deserialize)]
struct ActionJob {
    job_id: String,
    action: Action,
    #[serde(default)]
    input: Value,
}

/// Result written to stdout, one per job
#[derive(Debug, Serialize)]
struct JobResult {
    job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JobError>,
}

#[derive(Debug, Serialize)]
struct JobError {
    kind: String,
    message: String,
}

impl JobResult {
    fn from_outcome(job_id: String, outcome: std::result::Result<ActionResult, ExecutorError>) -> Self {
        match outcome {
            Ok(result) => Self {
                job_id,
                result: Some(result),
                error: None,
            },
            Err(e) => Self {
                job_id,
                result: None,
                error: Some(JobError {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("action_sandbox=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SandboxConfig::from_env();

    match cli.command {
        Commands::Run { action, input } => run_once(&config, &action, &input).await,
        Commands::Serve => serve(&config).await,
        Commands::Capture { out } => capture(&config, out).await,
    }
}

async fn run_once(config: &SandboxConfig, action_path: &Path, input: &str) -> Result<()> {
    let raw = tokio::fs::read_to_string(action_path)
        .await
        .with_context(|| format!("Failed to read action descriptor {}", action_path.display()))?;
    let action: Action = serde_json::from_str(&raw).context("Invalid action descriptor")?;
    let input: Value = serde_json::from_str(input).context("Invalid input data")?;

    let executor = ActionExecutor::from_config(config)?;
    info!("Executing action '{}' ({})", action.name, action.execution_mode);

    let result = executor.execute_action(&action, &input).await?;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

async fn serve(config: &SandboxConfig) -> Result<()> {
    let executor = Arc::new(ActionExecutor::from_config(config)?);
    let (tx, mut rx) = mpsc::unbounded_channel::<JobResult>();

    // Single writer so result lines never interleave
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(result) = rx.recv().await {
            let line = match serde_json::to_string(&result) {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to serialize result for job {}: {}", result.job_id, e);
                    continue;
                }
            };
            if let Err(e) = stdout.write_all(format!("{}\n", line).as_bytes()).await {
                error!("Failed to write result: {}", e);
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    info!("Waiting for jobs on stdin...");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let job: ActionJob = match serde_json::from_str(&line) {
            Ok(job) => job,
            Err(e) => {
                warn!("Failed to parse job: {}", e);
                continue;
            }
        };
        info!("Received job: job_id={}, action={}", job.job_id, job.action.name);

        let executor = Arc::clone(&executor);
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = executor.execute_action(&job.action, &job.input).await;
            if let Err(e) = &outcome {
                error!("Job {} failed ({}): {}", job.job_id, e.kind(), e);
            }
            let _ = tx.send(JobResult::from_outcome(job.job_id, outcome));
        });
    }

    info!("Input closed; waiting for {} running job(s)", executor.in_flight_count());
    drop(tx);
    writer.await.context("Result writer failed")?;
    Ok(())
}

async fn capture(config: &SandboxConfig, out: Option<PathBuf>) -> Result<()> {
    let bridge = GuiBridge::from_config(config)?;
    let png = bridge.capture_screen(&CancellationToken::new()).await?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
    info!("Captured {} bytes from {}", png.len(), bridge.target());

    match out {
        Some(path) => tokio::fs::write(&path, encoded)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", encoded),
    }
    Ok(())
}
