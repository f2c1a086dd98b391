use clap::Parser;
use face_screen::{
    config::AppConfig,
    models::job::JobStatus,
    services::engine::{DatasetSource, Engine},
};
use garde::Validate;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Screen one CSV of check-in photos without running the HTTP server.
#[derive(Debug, Parser)]
#[command(name = "face-screen-batch", version)]
struct Args {
    /// CSV file to process
    #[arg(short, long)]
    input: PathBuf,

    /// Copy the annotated CSV here when the job finishes
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Worker pool width (defaults to CONCURRENCY)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Rows between partial writes (defaults to CHECKPOINT_INTERVAL)
    #[arg(long)]
    checkpoint_interval: Option<usize>,

    /// Do not keep images in which no face was found
    #[arg(long)]
    no_artifacts: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = Args::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let mut job_config = config.job_defaults();
    if let Some(concurrency) = args.concurrency {
        job_config.concurrency = concurrency;
    }
    if let Some(interval) = args.checkpoint_interval {
        job_config.checkpoint_interval = interval;
    }
    if args.no_artifacts {
        job_config.persist_artifacts = false;
    }
    if let Err(e) = job_config.validate() {
        tracing::error!(error = %e, "Invalid job options");
        return ExitCode::FAILURE;
    }

    let engine = match Engine::from_config(&config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize engine");
            return ExitCode::FAILURE;
        }
    };

    let source_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input.csv".to_string());
    let (job_id, handle) = engine.submit(
        DatasetSource::File(args.input.clone()),
        source_name,
        job_config,
    );
    tracing::info!(job_id = %job_id, input = %args.input.display(), "Batch job submitted");

    tokio::pin!(handle);
    tokio::select! {
        _ = &mut handle => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(job_id = %job_id, "Received SIGINT, cancelling job");
            if let Err(e) = engine.cancel(job_id) {
                tracing::warn!(job_id = %job_id, error = %e, "Cancel failed");
            }
            handle.await.ok();
        }
    }

    let job = match engine.status(job_id) {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(error = %e, "Job disappeared");
            return ExitCode::FAILURE;
        }
    };

    if let (Some(output), Some(location)) = (&args.output, &job.result_location) {
        if let Err(e) = tokio::fs::copy(location, output).await {
            tracing::error!(error = %e, output = %output.display(), "Failed to copy results");
            return ExitCode::FAILURE;
        }
    }

    match serde_json::to_string_pretty(&job) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to render job"),
    }

    match job.status {
        JobStatus::Completed => ExitCode::SUCCESS,
        JobStatus::Cancelled => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    }
}
