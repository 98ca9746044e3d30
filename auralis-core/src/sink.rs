//! Artifact Sink (C9).
//!
//! Two mutually exclusive delivery modes: inline base64, or a retried
//! streaming upload to an object store. The job's success response is
//! never emitted until this has fully completed (§4.9 "Ordering
//! guarantee").

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backoff::{Error as BackoffError, ExponentialBackoff, ExponentialBackoffBuilder};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::error::{AuralisError, Result};
use crate::job::{AudioMode, AudioPayload};

const CONTAINER_NAME: &str = "wave-pcm-16";
const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);
const JITTER_FRACTION: f64 = 0.20;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkDirective {
    pub bucket: String,
    pub key: String,
}

pub async fn deliver(
    client: &reqwest::Client,
    cfg: &ResolvedConfig,
    directive: Option<&SinkDirective>,
    container_bytes: &[u8],
    sample_rate: u32,
) -> Result<AudioPayload> {
    match directive {
        None => deliver_inline(cfg, container_bytes, sample_rate),
        Some(directive) => deliver_external(client, cfg, directive, container_bytes, sample_rate).await,
    }
}

fn deliver_inline(
    cfg: &ResolvedConfig,
    container_bytes: &[u8],
    sample_rate: u32,
) -> Result<AudioPayload> {
    if container_bytes.len() > cfg.inline_payload_cap_bytes {
        return Err(AuralisError::PayloadTooLarge {
            size: container_bytes.len(),
            cap: cfg.inline_payload_cap_bytes,
        });
    }

    let bytes_base64 = base64::engine::general_purpose::STANDARD.encode(container_bytes);
    Ok(AudioPayload {
        mode: AudioMode::Inline,
        bytes_base64: Some(bytes_base64),
        url: None,
        container: CONTAINER_NAME.to_string(),
        sample_rate,
    })
}

async fn deliver_external(
    client: &reqwest::Client,
    cfg: &ResolvedConfig,
    directive: &SinkDirective,
    container_bytes: &[u8],
    sample_rate: u32,
) -> Result<AudioPayload> {
    let creds = cfg.object_store_credentials.as_ref().ok_or_else(|| {
        AuralisError::ConfigMissing("object store credentials not configured".to_string())
    })?;

    let url = canonical_url(
        creds.endpoint_override.as_deref(),
        &creds.region,
        &directive.bucket,
        &directive.key,
    );
    let attempt = AtomicU32::new(0);

    let outcome = backoff::future::retry(backoff_policy(), || async {
        let this_attempt = attempt.fetch_add(1, Ordering::SeqCst) + 1;
        match upload_once(client, &url, creds, container_bytes).await {
            Ok(()) => Ok(()),
            Err(UploadError::Terminal(msg)) => Err(BackoffError::permanent(
                AuralisError::SinkUnavailable { attempts: this_attempt, last_error: msg },
            )),
            Err(UploadError::Transient(msg)) => {
                warn!(attempt = this_attempt, error = %msg, "transient upload failure");
                let err = AuralisError::SinkUnavailable { attempts: this_attempt, last_error: msg };
                if this_attempt >= MAX_ATTEMPTS {
                    Err(BackoffError::permanent(err))
                } else {
                    Err(BackoffError::transient(err))
                }
            }
        }
    })
    .await;

    match outcome {
        Ok(()) => {
            info!(attempt = attempt.load(Ordering::SeqCst), %url, "external upload succeeded");
            Ok(AudioPayload {
                mode: AudioMode::External,
                bytes_base64: None,
                url: Some(url),
                container: CONTAINER_NAME.to_string(),
                sample_rate,
            })
        }
        Err(e) => Err(e),
    }
}

/// Exponential back-off policy with base 500ms, ±20% jitter, and no
/// elapsed-time cutoff of its own — `deliver_external` caps attempts at
/// `MAX_ATTEMPTS` itself by promoting the error to `Permanent` (§4.9).
fn backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(BASE_BACKOFF)
        .with_multiplier(2.0)
        .with_randomization_factor(JITTER_FRACTION)
        .with_max_elapsed_time(None)
        .build()
}

enum UploadError {
    Transient(String),
    Terminal(String),
}

async fn upload_once(
    client: &reqwest::Client,
    url: &str,
    creds: &crate::config::ObjectStoreCredentials,
    body: &[u8],
) -> std::result::Result<(), UploadError> {
    let response = client
        .put(url)
        .header("content-type", "audio/wav")
        .basic_auth(&creds.access_key, Some(&creds.secret_key))
        .body(body.to_vec())
        .send()
        .await
        .map_err(|e| UploadError::Transient(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        || (status.as_u16() >= 400 && status.as_u16() < 500)
    {
        Err(UploadError::Terminal(format!("upload rejected: {status}")))
    } else {
        Err(UploadError::Transient(format!("upload failed: {status}")))
    }
}

fn canonical_url(endpoint_override: Option<&str>, region: &str, bucket: &str, key: &str) -> String {
    match endpoint_override {
        Some(endpoint) => format!("{}/{bucket}/{key}", endpoint.trim_end_matches('/')),
        None => format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"),
    }
}
