//! Video effect worker binary.
//!
//! Two modes: `serve` runs the queue-driven worker, `process` applies
//! an effect to a single local file and exits.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use roto_models::{EffectParams, EffectType, JobId, JobMessage, OutputQuality};
use validator::Validate;
use roto_queue::JobQueue;
use roto_storage::S3Gateway;
use roto_worker::{
    JobConsumer, JobLogger, ProcessingPipeline, WorkerConfig, WorkerError, WorkerResult,
};

#[derive(Parser)]
#[command(name = "roto-worker", version, about = "Rotoscoping video effect worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run as a queue-driven worker service
    Serve,
    /// Enqueue a job for the worker fleet
    Submit {
        /// Bucket holding the source and destination objects
        #[arg(long)]
        bucket: String,
        /// Source object key
        #[arg(long)]
        input_key: String,
        /// Destination object key
        #[arg(long)]
        output_key: String,
        /// Effect to apply
        #[arg(long, default_value = "scanner_darkly")]
        effect: String,
        /// Output quality tier: low, medium, high
        #[arg(long, default_value = "medium")]
        quality: String,
        /// Effect parameter overrides as JSON
        #[arg(long)]
        params: Option<String>,
    },
    /// Apply an effect to a single local video file
    Process {
        /// Input video file
        #[arg(long)]
        input: PathBuf,
        /// Output video file
        #[arg(long)]
        output: PathBuf,
        /// Effect to apply
        #[arg(long, default_value = "scanner_darkly")]
        effect: String,
        /// Output quality tier: low, medium, high
        #[arg(long, default_value = "medium")]
        quality: String,
        /// Named parameter preset: sketch, poster
        #[arg(long)]
        preset: Option<String>,
        /// Effect parameter overrides as JSON; absent fields take defaults
        #[arg(long, conflicts_with = "preset")]
        params: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS connections)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("roto=info".parse().unwrap())
        .add_directive("ort=warn".parse().unwrap())
        .add_directive("onnxruntime=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve => serve().await,
        Command::Submit {
            bucket,
            input_key,
            output_key,
            effect,
            quality,
            params,
        } => submit(bucket, input_key, output_key, effect, quality, params).await,
        Command::Process {
            input,
            output,
            effect,
            quality,
            preset,
            params,
        } => process_one(input, output, effect, quality, preset, params).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Run the queue-driven worker until shutdown.
async fn serve() -> WorkerResult<()> {
    info!("Starting roto-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let queue = JobQueue::from_env()?;
    queue.init().await?;
    info!(
        "Queue depth at startup: {} ({} dead-lettered)",
        queue.len().await?,
        queue.dlq_len().await?
    );

    let store = S3Gateway::from_env().await?;
    store.check_connectivity().await?;
    info!("Connected to bucket '{}'", store.bucket());

    let pipeline = ProcessingPipeline::new(&config)?;

    let consumer = JobConsumer::new(
        Arc::new(store),
        Arc::new(queue),
        Arc::new(pipeline),
        config,
    )?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx.send(true).ok();
    });

    consumer.run(shutdown_rx).await?;

    info!("Worker shutdown complete");
    Ok(())
}

/// Enqueue one job on the stream.
async fn submit(
    bucket: String,
    input_key: String,
    output_key: String,
    effect: String,
    quality: String,
    params_json: Option<String>,
) -> WorkerResult<()> {
    let effect = EffectType::parse(&effect)
        .ok_or_else(|| WorkerError::invalid_job(format!("Unknown effect '{effect}'")))?;

    let mut message = JobMessage::new(bucket, input_key, output_key, effect);
    message.quality = parse_quality(&quality)?;
    if let Some(json) = params_json {
        message.params = Some(
            serde_json::from_str(&json)
                .map_err(|e| WorkerError::invalid_job(format!("Effect params: {e}")))?,
        );
    }
    message
        .validate()
        .map_err(|e| WorkerError::invalid_job(e.to_string()))?;

    let queue = JobQueue::from_env()?;
    queue.init().await?;
    let message_id = queue.enqueue(&message).await?;

    info!(
        job_id = %message.id,
        message_id = %message_id,
        "Job enqueued"
    );
    Ok(())
}

/// Apply an effect to one local file.
async fn process_one(
    input: PathBuf,
    output: PathBuf,
    effect: String,
    quality: String,
    preset: Option<String>,
    params_json: Option<String>,
) -> WorkerResult<()> {
    let effect = EffectType::parse(&effect)
        .ok_or_else(|| WorkerError::invalid_job(format!("Unknown effect '{effect}'")))?;
    let quality = parse_quality(&quality)?;

    let params = match (preset.as_deref(), params_json) {
        (_, Some(json)) => serde_json::from_str::<EffectParams>(&json)
            .map_err(|e| WorkerError::invalid_job(format!("Effect params: {e}")))?,
        (Some("sketch"), None) => EffectParams::sketch(),
        (Some("poster"), None) => EffectParams::poster(),
        (Some(other), None) => {
            return Err(WorkerError::invalid_job(format!("Unknown preset '{other}'")))
        }
        (None, None) => EffectParams::default(),
    };

    let config = WorkerConfig::from_env();
    let pipeline = ProcessingPipeline::new(&config)?;
    let logger = JobLogger::new(&JobId::new(), effect.as_str());

    let report = pipeline
        .process_file(&input, &output, effect, quality, params, &logger)
        .await?;

    info!(
        frames = report.frames_processed,
        skipped = report.frames_skipped,
        strategy = ?report.strategy,
        degraded = report.degraded,
        output = %output.display(),
        "Processing complete"
    );
    Ok(())
}

fn parse_quality(s: &str) -> WorkerResult<OutputQuality> {
    match s {
        "low" => Ok(OutputQuality::Low),
        "medium" => Ok(OutputQuality::Medium),
        "high" => Ok(OutputQuality::High),
        other => Err(WorkerError::invalid_job(format!(
            "Unknown quality '{other}' (expected low, medium, or high)"
        ))),
    }
}
