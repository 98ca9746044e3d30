//! Worker process shell (§4.11).
//!
//! Thin host around `auralis-core`: resolves configuration, loads the
//! model lifecycle once, then reads newline-delimited job JSON from stdin
//! and writes the structured response JSON to stdout — one task spawned
//! per line so overlapping jobs exercise the concurrency model of §5
//! rather than serializing at this shell's own I/O loop.

use std::sync::Arc;

use auralis_core::config::ResolvedConfig;
use auralis_core::job::{handle_job, JobErrorBody, JobRequest, JobResult, Runtime};
use auralis_core::model::lifecycle::ModelLifecycle;
use auralis_core::model::stub::{StubCodec, StubModel};
use auralis_core::model::{AudioCodec, GenerationModel};
use auralis_core::voice_registry::VoiceRegistry;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ResolvedConfig::from_env()?;
    info!(device = %config.device, "resolved configuration");

    let lifecycle = Arc::new(ModelLifecycle::new());
    let (model, codec) = build_backend(&config);

    // Unrecoverable failure here aborts the process (§4.1: "startup aborts
    // with a fatal error, not a request error").
    lifecycle.start(&config, model, codec).await?;

    let voice_registry = Arc::new(VoiceRegistry::new(config.voice_registry_path.clone()));
    let http_client = reqwest::Client::new();

    let runtime = Arc::new(Runtime {
        config,
        lifecycle: lifecycle.clone(),
        voice_registry,
        http_client,
    });

    let shutdown_lifecycle = lifecycle.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received; draining");
        shutdown_lifecycle.shutdown().await;
    });

    run_job_loop(runtime).await
}

#[cfg(feature = "onnx")]
fn build_backend(config: &ResolvedConfig) -> (Arc<dyn GenerationModel>, Arc<dyn AudioCodec>) {
    use auralis_core::model::onnx::{OnnxAudioCodec, OnnxGenerationModel};
    let model = OnnxGenerationModel::load(&config.model_weights_path)
        .expect("failed to load ONNX generation model");
    let codec = OnnxAudioCodec::load(&config.codec_weights_path, config.output_sample_rate)
        .expect("failed to load ONNX audio codec");
    (Arc::new(model), Arc::new(codec))
}

#[cfg(not(feature = "onnx"))]
fn build_backend(_config: &ResolvedConfig) -> (Arc<dyn GenerationModel>, Arc<dyn AudioCodec>) {
    (Arc::new(StubModel), Arc::new(StubCodec))
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Reads one job request per line from stdin, spawning a task per line, and
/// writes the JSON response (one line per job) to stdout.
async fn run_job_loop(runtime: Arc<Runtime>) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let runtime = runtime.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = match serde_json::from_str::<JobRequest>(&line) {
                Ok(request) => handle_job(&runtime, request).await,
                Err(e) => {
                    error!(error = %e, "malformed job request");
                    JobResult::Failure {
                        ok: false,
                        error: JobErrorBody {
                            kind: "InvalidInput".to_string(),
                            message: e.to_string(),
                            details: serde_json::Value::Null,
                        },
                    }
                }
            };
            match serde_json::to_string(&response) {
                Ok(json) => {
                    let _ = tx.send(json);
                }
                Err(e) => error!(error = %e, "failed to serialize job response"),
            }
        });
    }

    drop(tx);
    let _ = writer.await;
    Ok(())
}
