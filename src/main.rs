use anyhow::Result;
use clap::{Parser, Subcommand};
use medic::config::Config;
use medic::pipeline::{PatchOutcome, PendingLog, Pipeline};
use medic::supervisor::Supervisor;
use medic::tail::{LogTailer, LogWatcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "medic",
    about = "Supervise a worker and patch the function that crashed it",
    version
)]
struct Args {
    /// Path to a JSON config file (defaults to ./medic.json, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Start the worker and heal it as errors appear (default)
    Run {
        /// Worker command, overriding the configured one
        #[arg(last = true)]
        worker: Vec<String>,
    },
    /// Remove the error log and its read pointer
    Reset,
    /// Read new log entries once and attempt a single patch
    Scan,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("medic=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Cmd::Run { worker: Vec::new() }) {
        Cmd::Run { worker } => {
            if !worker.is_empty() {
                config.worker = worker;
                config.validate()?;
            }
            run(config).await
        }
        Cmd::Reset => reset(&config),
        Cmd::Scan => scan(&config).await,
    }
}

fn reset(config: &Config) -> Result<()> {
    let tailer = LogTailer::new(&config.log_file, config.pointer_path());
    let removed = tailer.reset()?;
    if removed.is_empty() {
        eprintln!("Nothing to remove.");
    }
    for path in removed {
        eprintln!("Removed {}", path.display());
    }
    Ok(())
}

async fn scan(config: &Config) -> Result<()> {
    let tailer = LogTailer::new(&config.log_file, config.pointer_path());
    tailer.ensure_files_exist()?;
    let pipeline = Pipeline::from_config(config)?;

    match pipeline.scan_once(&tailer, config).await? {
        Some(outcome) => eprintln!("{}", outcome),
        None => eprintln!("No new errors in {}.", config.log_file.display()),
    }
    Ok(())
}

fn spawn_attempt(pipeline: &Arc<Pipeline>, chunk: String, outcomes: &mpsc::Sender<PatchOutcome>) {
    let pipeline = Arc::clone(pipeline);
    let tx = outcomes.clone();
    tokio::spawn(async move {
        let outcome = pipeline.run_surgical_patch(&chunk).await;
        let _ = tx.send(outcome).await;
    });
}

async fn run(config: Config) -> Result<()> {
    let tailer = LogTailer::new(&config.log_file, config.pointer_path());
    tailer.ensure_files_exist()?;

    let pipeline = Arc::new(Pipeline::from_config(&config)?);
    let mut supervisor = Supervisor::from_config(&config)?;
    supervisor.start_child()?;

    let (watch, mut chunks) = LogWatcher::spawn(tailer, config.poll_interval());
    let (outcome_tx, mut outcomes) = mpsc::channel::<PatchOutcome>(4);
    let mut exit_check = tokio::time::interval(Duration::from_millis(500));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tracing::info!(
        log = %config.log_file.display(),
        worker = %config.worker.join(" "),
        "watching for runtime errors"
    );

    let mut in_flight = false;
    let mut pending = PendingLog::default();

    loop {
        tokio::select! {
            Some(chunk) = chunks.recv() => {
                if !config.is_trigger(&chunk) {
                    continue;
                }
                if in_flight {
                    tracing::info!("patch already in progress; queued new log entries");
                    pending.push(&chunk);
                    continue;
                }
                spawn_attempt(&pipeline, chunk, &outcome_tx);
                in_flight = true;
            }
            Some(outcome) = outcomes.recv() => {
                in_flight = false;
                if outcome.is_applied() {
                    if let Err(e) = supervisor.restart_child("patch applied").await {
                        tracing::error!(error = %format!("{:#}", e), "failed to restart worker");
                    }
                }
                if let Some(queued) = pending.take() {
                    spawn_attempt(&pipeline, queued, &outcome_tx);
                    in_flight = true;
                }
            }
            _ = exit_check.tick() => {
                if let Some(status) = supervisor.poll_exit() {
                    tracing::info!(%status, "worker is down; waiting for a patch to restart it");
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    watch.stop().await;
    supervisor.shutdown().await;
    Ok(())
}
