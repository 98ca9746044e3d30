//! Validator (C2).
//!
//! Structural and semantic check of one job payload. All rejections are
//! enumerated in a single pass and returned together — none of this runs
//! any GPU work (§4.2).

use crate::config::ResolvedConfig;
use crate::error::{AuralisError, Result};
use crate::job::JobRequest;
use crate::prompt::ChunkMethod;
use crate::sampling::SamplingPolicy;
use crate::voice_registry::VoiceRegistry;

/// A job payload after defaults have been merged in and ranges checked —
/// safe to hand to C3/C4/C7 without further inspection.
#[derive(Debug, Clone)]
pub struct NormalizedJob {
    pub transcript: String,
    pub ref_audio: Option<String>,
    pub sampling: SamplingPolicy,
    pub max_new_tokens: usize,
    pub seed: u64,
    pub chunk_method: ChunkMethod,
    pub chunk_max_word_num: usize,
    pub chunk_max_num_turns: usize,
}

/// Validate `request` against `cfg`, resolving a voice-ref id through
/// `registry` if present. Returns every violation found in one pass.
pub fn validate(
    request: &JobRequest,
    cfg: &ResolvedConfig,
    registry: &VoiceRegistry,
) -> std::result::Result<NormalizedJob, Vec<AuralisError>> {
    let mut errors = Vec::new();

    let char_count = request.transcript.chars().count();
    if char_count == 0 || char_count > cfg.max_transcript_chars {
        errors.push(AuralisError::InvalidInput(format!(
            "transcript must be 1..={} code points, got {}",
            cfg.max_transcript_chars, char_count
        )));
    }

    let temperature = request.temperature.unwrap_or(cfg.default_temperature);
    if !(0.0..=2.0).contains(&temperature) {
        errors.push(AuralisError::InvalidInput(format!(
            "temperature must be in [0, 2], got {temperature}"
        )));
    }

    let top_k = request.top_k.unwrap_or(cfg.default_top_k);
    if top_k < 1 {
        errors.push(AuralisError::InvalidInput(
            "top_k must be >= 1".to_string(),
        ));
    }

    let top_p = request.top_p.unwrap_or(cfg.default_top_p);
    if !(top_p > 0.0 && top_p <= 1.0) {
        errors.push(AuralisError::InvalidInput(format!(
            "top_p must be in (0, 1], got {top_p}"
        )));
    }

    let max_new_tokens = request
        .max_new_tokens
        .unwrap_or(cfg.default_max_new_tokens);
    if max_new_tokens == 0 {
        errors.push(AuralisError::InvalidInput(
            "max_new_tokens must be > 0".to_string(),
        ));
    } else if request.max_new_tokens.is_some() && max_new_tokens > cfg.default_max_new_tokens {
        errors.push(AuralisError::InvalidInput(format!(
            "max_new_tokens {max_new_tokens} exceeds configured ceiling {}",
            cfg.default_max_new_tokens
        )));
    }

    if let Some(id) = &request.ref_audio {
        if let Err(e) = registry.lookup(id) {
            errors.push(e);
        }
    }

    if let Some(sink) = &request.sink {
        if sink.bucket.is_empty() || sink.key.is_empty() {
            errors.push(AuralisError::InvalidInput(
                "sink directive requires both bucket and key".to_string(),
            ));
        } else if cfg.object_store_credentials.is_none() {
            errors.push(AuralisError::ConfigMissing(
                "sink directive present but no object-store credentials configured".to_string(),
            ));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let seed = request.seed.unwrap_or_else(random_seed);

    Ok(NormalizedJob {
        transcript: request.transcript.clone(),
        ref_audio: request.ref_audio.clone(),
        sampling: SamplingPolicy {
            temperature,
            top_k,
            top_p,
            ras_win_len: request.ras_win_len.unwrap_or(7),
            ras_win_max_num_repeat: request.ras_win_max_num_repeat.unwrap_or(2),
        },
        max_new_tokens,
        seed,
        chunk_method: request.chunk_method.unwrap_or(ChunkMethod::None),
        chunk_max_word_num: request.chunk_max_word_num.unwrap_or(120),
        chunk_max_num_turns: request.chunk_max_num_turns.unwrap_or(4),
    })
}

fn random_seed() -> u64 {
    use rand::RngCore;
    rand::rngs::OsRng.next_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg() -> ResolvedConfig {
        ResolvedConfig {
            model_weights_path: "/tmp".into(),
            codec_weights_path: "/tmp".into(),
            voice_registry_path: "/tmp/nonexistent-registry".into(),
            device: "cpu".into(),
            compute_precision: "fp32".into(),
            length_buckets: vec![128, 256],
            enable_captured_graphs: false,
            max_transcript_chars: 10_000,
            default_temperature: 0.7,
            default_top_k: 50,
            default_top_p: 0.95,
            default_max_new_tokens: 2048,
            object_store_credentials: None,
            job_timeout_seconds: 120,
            inline_payload_cap_bytes: 8 * 1024 * 1024,
            output_sample_rate: 24_000,
        }
    }

    fn request(transcript: &str) -> JobRequest {
        JobRequest {
            transcript: transcript.to_string(),
            ref_audio: None,
            scene_prompt: None,
            temperature: None,
            top_k: None,
            top_p: None,
            max_new_tokens: None,
            seed: None,
            chunk_method: None,
            chunk_max_word_num: None,
            chunk_max_num_turns: None,
            ras_win_len: None,
            ras_win_max_num_repeat: None,
            sink: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn empty_transcript_is_rejected() {
        let registry = VoiceRegistry::new("/tmp/nonexistent-registry".into());
        let err = validate(&request(""), &cfg(), &registry).unwrap_err();
        assert_eq!(err[0].kind_str(), "InvalidInput");
    }

    #[test]
    fn over_limit_transcript_is_rejected() {
        let registry = VoiceRegistry::new("/tmp/nonexistent-registry".into());
        let transcript: String = std::iter::repeat('x').take(10_001).collect();
        let err = validate(&request(&transcript), &cfg(), &registry).unwrap_err();
        assert_eq!(err[0].kind_str(), "InvalidInput");
    }

    #[test]
    fn valid_request_normalizes_with_defaults() {
        let registry = VoiceRegistry::new("/tmp/nonexistent-registry".into());
        let normalized = validate(&request("Hello world."), &cfg(), &registry).unwrap();
        assert_eq!(normalized.sampling.temperature, 0.7);
        assert_eq!(normalized.max_new_tokens, 2048);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let registry = VoiceRegistry::new("/tmp/nonexistent-registry".into());
        let mut req = request("Hello.");
        req.temperature = Some(3.0);
        let err = validate(&req, &cfg(), &registry).unwrap_err();
        assert!(err.iter().any(|e| e.kind_str() == "InvalidInput"));
    }

    #[test]
    fn sink_without_credentials_is_config_missing() {
        let registry = VoiceRegistry::new("/tmp/nonexistent-registry".into());
        let mut req = request("Hello.");
        req.sink = Some(crate::sink::SinkDirective {
            bucket: "b".into(),
            key: "k".into(),
        });
        let err = validate(&req, &cfg(), &registry).unwrap_err();
        assert!(err.iter().any(|e| e.kind_str() == "ConfigMissing"));
    }

    #[test]
    fn incomplete_sink_directive_is_invalid_input() {
        let registry = VoiceRegistry::new("/tmp/nonexistent-registry".into());
        let mut req = request("Hello.");
        req.sink = Some(crate::sink::SinkDirective {
            bucket: "b".into(),
            key: "".into(),
        });
        let err = validate(&req, &cfg(), &registry).unwrap_err();
        assert!(err.iter().any(|e| e.kind_str() == "InvalidInput"));
    }
}
