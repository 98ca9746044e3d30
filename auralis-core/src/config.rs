//! Config Resolver (C1).
//!
//! Collects run-time options from the process environment at worker
//! startup into an immutable [`ResolvedConfig`], applying the defaults and
//! ranges documented in the external interface's environment table.
//! Per-job sampling/chunking overrides live on [`crate::job::JobRequest`]
//! and are merged against these defaults by the Validator (C2), not here.

use std::path::PathBuf;

use crate::error::{AuralisError, Result};

/// Length buckets used for ordinary first-word-based fallback when no env
/// override is supplied.
pub const DEFAULT_LENGTH_BUCKETS: &[usize] = &[128, 256, 512, 1024, 2048, 4096];

pub const DEFAULT_OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Object store credentials. Intentionally never constructed from request
/// data — see §6, "Credentials never come from the request body."
#[derive(Debug, Clone)]
pub struct ObjectStoreCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Overrides the canonical `https://{bucket}.s3.{region}.amazonaws.com`
    /// host, for S3-compatible stores (or a local mock) reachable at a
    /// fixed URL instead. `AURALIS_OBJECT_STORE_ENDPOINT`.
    pub endpoint_override: Option<String>,
}

/// Immutable configuration resolved once at process start, threaded through
/// every job invocation.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub model_weights_path: PathBuf,
    pub codec_weights_path: PathBuf,
    pub voice_registry_path: PathBuf,
    pub device: String,
    pub compute_precision: String,
    pub length_buckets: Vec<usize>,
    pub enable_captured_graphs: bool,
    pub max_transcript_chars: usize,
    pub default_temperature: f32,
    pub default_top_k: u32,
    pub default_top_p: f32,
    pub default_max_new_tokens: usize,
    pub object_store_credentials: Option<ObjectStoreCredentials>,
    pub job_timeout_seconds: u64,
    pub inline_payload_cap_bytes: usize,
    pub output_sample_rate: u32,
}

impl ResolvedConfig {
    /// Resolve from the process environment. Missing required variables
    /// abort startup with a fatal error, per §4.1 — this is deliberately
    /// not surfaced as a per-request error kind.
    pub fn from_env() -> Result<Self> {
        let model_weights_path = required_path("AURALIS_MODEL_WEIGHTS_PATH")?;
        let codec_weights_path = required_path("AURALIS_CODEC_WEIGHTS_PATH")?;
        let voice_registry_path = required_path("AURALIS_VOICE_REGISTRY_PATH")?;

        let device = std::env::var("AURALIS_DEVICE").unwrap_or_else(|_| "cpu".to_string());
        let compute_precision =
            std::env::var("AURALIS_COMPUTE_PRECISION").unwrap_or_else(|_| "fp16".to_string());

        let length_buckets = match std::env::var("AURALIS_LENGTH_BUCKETS") {
            Ok(raw) => parse_bucket_list(&raw)?,
            Err(_) => DEFAULT_LENGTH_BUCKETS.to_vec(),
        };

        let enable_captured_graphs = parse_bool_env("AURALIS_ENABLE_CAPTURED_GRAPHS", false)?;
        let max_transcript_chars = parse_usize_env("AURALIS_MAX_TRANSCRIPT_CHARS", 10_000)?;
        let default_temperature = parse_f32_env("AURALIS_DEFAULT_TEMPERATURE", 0.7)?;
        let default_top_k = parse_u32_env("AURALIS_DEFAULT_TOP_K", 50)?;
        let default_top_p = parse_f32_env("AURALIS_DEFAULT_TOP_P", 0.95)?;
        let default_max_new_tokens = parse_usize_env("AURALIS_DEFAULT_MAX_NEW_TOKENS", 2048)?;
        let job_timeout_seconds = parse_u64_env("AURALIS_JOB_TIMEOUT_SECONDS", 120)?;
        let inline_payload_cap_bytes =
            parse_usize_env("AURALIS_INLINE_PAYLOAD_CAP_BYTES", 8 * 1024 * 1024)?;
        let output_sample_rate =
            parse_u32_env("AURALIS_OUTPUT_SAMPLE_RATE", DEFAULT_OUTPUT_SAMPLE_RATE)?;

        let object_store_credentials = match (
            std::env::var("AURALIS_OBJECT_STORE_ACCESS_KEY"),
            std::env::var("AURALIS_OBJECT_STORE_SECRET_KEY"),
            std::env::var("AURALIS_OBJECT_STORE_REGION"),
        ) {
            (Ok(access_key), Ok(secret_key), Ok(region)) => Some(ObjectStoreCredentials {
                access_key,
                secret_key,
                region,
                endpoint_override: std::env::var("AURALIS_OBJECT_STORE_ENDPOINT").ok(),
            }),
            _ => None,
        };

        Ok(Self {
            model_weights_path,
            codec_weights_path,
            voice_registry_path,
            device,
            compute_precision,
            length_buckets,
            enable_captured_graphs,
            max_transcript_chars,
            default_temperature,
            default_top_k,
            default_top_p,
            default_max_new_tokens,
            object_store_credentials,
            job_timeout_seconds,
            inline_payload_cap_bytes,
            output_sample_rate,
        })
    }
}

fn required_path(var: &str) -> Result<PathBuf> {
    std::env::var(var)
        .map(PathBuf::from)
        .map_err(|_| AuralisError::ConfigMissing(format!("required env var {var} is not set")))
}

fn parse_bucket_list(raw: &str) -> Result<Vec<usize>> {
    let mut buckets = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let value: usize = part
            .parse()
            .map_err(|_| AuralisError::ConfigMissing(format!("invalid length bucket: {part}")))?;
        buckets.push(value);
    }
    buckets.sort_unstable();
    if buckets.is_empty() {
        return Err(AuralisError::ConfigMissing(
            "AURALIS_LENGTH_BUCKETS resolved to an empty list".to_string(),
        ));
    }
    Ok(buckets)
}

fn parse_bool_env(var: &str, default: bool) -> Result<bool> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AuralisError::ConfigMissing(format!("invalid boolean for {var}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn parse_usize_env(var: &str, default: usize) -> Result<usize> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AuralisError::ConfigMissing(format!("invalid integer for {var}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn parse_u32_env(var: &str, default: u32) -> Result<u32> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AuralisError::ConfigMissing(format!("invalid integer for {var}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn parse_u64_env(var: &str, default: u64) -> Result<u64> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AuralisError::ConfigMissing(format!("invalid integer for {var}: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn parse_f32_env(var: &str, default: f32) -> Result<f32> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AuralisError::ConfigMissing(format!("invalid number for {var}: {raw}"))),
        Err(_) => Ok(default),
    }
}
