//! `likeness-worker` -- turns job messages into generated images.
//!
//! Reads job messages as JSON lines on stdin, runs each one through
//! ComfyUI and writes one JSON outcome line per job to stdout. Logs go
//! to stderr. See [`WorkerConfig::from_env`] for the environment
//! variables.

use std::sync::Arc;

use likeness_comfyui::api::ComfyUIApi;
use likeness_comfyui::client::ComfyUIClient;
use likeness_comfyui::session::GenerationSession;
use likeness_pipeline::files::TokioFileService;
use likeness_pipeline::job::JobPipeline;
use likeness_pipeline::storage::S3ObjectStore;
use likeness_worker::config::{LogFormat, WorkerConfig};
use likeness_worker::consumer::JobConsumer;
use likeness_worker::transport::{JsonLinesQueue, JsonLinesSink};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "likeness_worker=info,likeness_pipeline=info,likeness_comfyui=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;
    init_tracing(config.log_format);

    tracing::info!(
        comfyui_host = %config.comfyui_host,
        comfyui_port = config.comfyui_port,
        output_dir = %config.pipeline.output_dir.display(),
        "Starting likeness-worker",
    );

    let cancel = CancellationToken::new();

    let client = ComfyUIClient::from_host(&config.comfyui_host, config.comfyui_port);
    let api = ComfyUIApi::new(client.api_url().to_string());
    let session = Arc::new(GenerationSession::new(client, Arc::new(api)));
    session.start(&cancel).await?;

    let store = S3ObjectStore::connect(&config.s3).await;
    let pipeline = JobPipeline::new(
        session.clone(),
        Arc::new(store),
        Arc::new(TokioFileService),
        config.pipeline.clone(),
    );
    let consumer = JobConsumer::new(pipeline);

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    let mut queue = JsonLinesQueue::new(BufReader::new(tokio::io::stdin()));
    let mut sink = JsonLinesSink::new(tokio::io::stdout());
    let consumed = consumer.run(&mut queue, &mut sink, &cancel).await;

    // `cancel` may already have fired; stopping gets its own token.
    session.stop(&CancellationToken::new()).await?;
    consumed?;

    tracing::info!("likeness-worker stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}
