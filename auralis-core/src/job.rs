//! Job Handler (C10) and the external request/response schema (§6).
//!
//! `handle_job` is the single entry point: it composes C1–C9, classifies
//! any failure into an error kind (§7), and is the only component
//! permitted to format the final response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::audio::{assemble, ChunkWaveform};
use crate::config::ResolvedConfig;
use crate::error::AuralisError;
use crate::generation::drive_chunk;
use crate::model::lifecycle::ModelLifecycle;
use crate::prompt::{self, ChunkMethod};
use crate::sink::{self, SinkDirective};
use crate::validate::{self, NormalizedJob};
use crate::voice_registry::VoiceRegistry;

/// The closed, `serde`-deserialized request schema (§6). Unknown fields are
/// captured via `extra` and surfaced as warnings, never silently accepted
/// or rejected (§2.1).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JobRequest {
    pub transcript: String,
    #[serde(default)]
    pub ref_audio: Option<String>,
    #[serde(default)]
    pub scene_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_new_tokens: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub chunk_method: Option<ChunkMethod>,
    #[serde(default)]
    pub chunk_max_word_num: Option<usize>,
    #[serde(default)]
    pub chunk_max_num_turns: Option<usize>,
    #[serde(default)]
    pub ras_win_len: Option<usize>,
    #[serde(default)]
    pub ras_win_max_num_repeat: Option<usize>,
    #[serde(default)]
    pub sink: Option<SinkDirective>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    Inline,
    External,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioPayload {
    pub mode: AudioMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub container: String,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobMetadata {
    pub generated_at: String,
    pub duration_seconds: f64,
    pub generation_latency_seconds: f64,
    pub chunks: usize,
    pub fast_path: String,
    pub voice: Option<String>,
    pub seed: u64,
    pub truncated: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobErrorBody {
    pub kind: String,
    pub message: String,
    pub details: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobResult {
    Success {
        ok: bool,
        audio: AudioPayload,
        text: String,
        metadata: JobMetadata,
    },
    Failure {
        ok: bool,
        error: JobErrorBody,
    },
}

impl JobResult {
    fn success(audio: AudioPayload, text: String, metadata: JobMetadata) -> Self {
        JobResult::Success {
            ok: true,
            audio,
            text,
            metadata,
        }
    }

    fn failure(err: &AuralisError, details: Value) -> Self {
        JobResult::Failure {
            ok: false,
            error: JobErrorBody {
                kind: err.kind_str().to_string(),
                message: err.to_string(),
                details,
            },
        }
    }
}

/// Shared, process-wide capabilities the Job Handler composes per
/// invocation. Constructed once by the worker binary's `main` and passed
/// by reference — no global mutable state (§9).
pub struct Runtime {
    pub config: ResolvedConfig,
    pub lifecycle: Arc<ModelLifecycle>,
    pub voice_registry: Arc<VoiceRegistry>,
    pub http_client: reqwest::Client,
}

/// The single entry point invoked per job (§4.10).
#[instrument(skip(runtime, request), fields(transcript_len = request.transcript.chars().count()))]
pub async fn handle_job(runtime: &Runtime, request: JobRequest) -> JobResult {
    let timeout = std::time::Duration::from_secs(runtime.config.job_timeout_seconds);

    match tokio::time::timeout(timeout, run_job(runtime, request)).await {
        Ok(result) => result,
        Err(_) => {
            warn!("job exceeded timeout; aborting");
            JobResult::failure(&AuralisError::Timeout, Value::Null)
        }
    }
}

async fn run_job(runtime: &Runtime, request: JobRequest) -> JobResult {
    let mut warnings: Vec<String> = request
        .extra
        .keys()
        .map(|k| format!("unrecognized option: {k}"))
        .collect();

    let normalized = match validate::validate(&request, &runtime.config, &runtime.voice_registry) {
        Ok(n) => n,
        Err(errs) => {
            let messages: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
            let kind = errs.first().map(|e| e.kind_str()).unwrap_or("InvalidInput");
            error!(errors = ?messages, "validation failed");
            return JobResult::Failure {
                ok: false,
                error: JobErrorBody {
                    kind: kind.to_string(),
                    message: messages.join("; "),
                    details: serde_json::json!({ "errors": messages }),
                },
            };
        }
    };

    let voice = match &normalized.ref_audio {
        Some(id) => match runtime.voice_registry.lookup(id) {
            Ok(v) => Some(v),
            Err(e) => return JobResult::failure(&e, Value::Null),
        },
        None => None,
    };

    let codec = match runtime.lifecycle.codec() {
        Some(c) => c,
        None => {
            return JobResult::failure(
                &AuralisError::ModelError("codec not loaded".to_string()),
                Value::Null,
            )
        }
    };

    let contexts = match prompt::build(
        &normalized.transcript,
        request.scene_prompt.as_deref(),
        voice.as_deref(),
        normalized.chunk_method,
        normalized.chunk_max_word_num,
        normalized.chunk_max_num_turns,
        codec.as_ref(),
    ) {
        Ok(c) => c,
        Err(e) => return JobResult::failure(&e, Value::Null),
    };

    let gen_start = Instant::now();
    let mut chunk_waveforms = Vec::with_capacity(contexts.len());
    let mut fast_path_used = "dynamic".to_string();
    let mut truncated = false;
    let mut chunks_completed = 0usize;

    for (chunk_index, context) in contexts.iter().enumerate() {
        let acquire_guard = match runtime.lifecycle.acquire().await {
            Ok(g) => g,
            Err(e) => {
                return JobResult::failure(
                    &e,
                    serde_json::json!({ "chunks_completed": chunks_completed }),
                )
            }
        };

        let model = match runtime.lifecycle.model() {
            Some(m) => m,
            None => {
                return JobResult::failure(
                    &AuralisError::ModelError("model not loaded".to_string()),
                    Value::Null,
                )
            }
        };

        let outcome = drive_chunk(
            acquire_guard.lifecycle(),
            model.as_ref(),
            codec.as_ref(),
            context,
            &normalized,
            chunk_index,
        )
        .await;
        drop(acquire_guard);

        match outcome {
            Ok(result) => {
                fast_path_used = result.fast_path.as_metadata_str().to_string();
                truncated |= result.truncated;
                chunk_waveforms.push(ChunkWaveform {
                    samples: result.samples,
                    sample_rate: result.sample_rate,
                });
                chunks_completed += 1;
            }
            Err(e) => {
                error!(chunk_index, error = %e, "chunk generation failed");
                return JobResult::failure(
                    &e,
                    serde_json::json!({ "chunks_completed": chunks_completed }),
                );
            }
        }
    }

    let assembled = assemble(chunk_waveforms, runtime.config.output_sample_rate);
    if assembled.duration_seconds() <= 0.0 {
        return JobResult::failure(
            &AuralisError::GenerationEmpty { chunk_index: 0 },
            Value::Null,
        );
    }

    let container_bytes = match assembled.encode_wav_pcm16() {
        Ok(b) => b,
        Err(e) => return JobResult::failure(&e, Value::Null),
    };

    let audio_payload = match sink::deliver(
        &runtime.http_client,
        &runtime.config,
        request.sink.as_ref(),
        &container_bytes,
        assembled.sample_rate,
    )
    .await
    {
        Ok(payload) => payload,
        Err(e) => return JobResult::failure(&e, Value::Null),
    };

    let generation_latency_seconds = gen_start.elapsed().as_secs_f64();

    info!(
        chunks = contexts.len(),
        fast_path = %fast_path_used,
        duration_seconds = assembled.duration_seconds(),
        "job completed"
    );

    JobResult::success(
        audio_payload,
        normalized.transcript.clone(),
        JobMetadata {
            generated_at: chrono::Utc::now().to_rfc3339(),
            duration_seconds: assembled.duration_seconds(),
            generation_latency_seconds,
            chunks: contexts.len(),
            fast_path: fast_path_used,
            voice: normalized.ref_audio.clone(),
            seed: normalized.seed,
            truncated,
            warnings,
        },
    )
}
