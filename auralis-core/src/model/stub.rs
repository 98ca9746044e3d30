//! Deterministic stub backend.
//!
//! Exercises the whole control plane — warm-up, fast-path selection, the
//! two-alphabet generation loop, codec round-trip — without any GPU weights
//! on disk. Used by the crate's own tests and by default when the `onnx`
//! feature is disabled.
//!
//! Content is synthetic but reproducible: the same (history, mode) pair
//! always yields the same logits, so paired with a seeded sampler the whole
//! pipeline is bit-identical across runs (§8 invariant 4).

use super::{
    AudioCodec, AudioFrame, EmittedToken, GenerationModel, StepLogits, StepMode,
    TEXT_AUDIO_BEGIN, TEXT_END_OF_STREAM,
};
use crate::error::Result;

pub const TEXT_VOCAB_SIZE: usize = 34;

pub const AUDIO_VOCAB_SIZE: usize = 64;
pub const AUDIO_END_SENTINEL: u32 = AUDIO_VOCAB_SIZE as u32;

/// Stub generation model. The "Decoding-Text" phase is trivial — it signals
/// `AudioBegin` on its very first step, then "Decoding-Audio" runs for a
/// number of frames proportional to the size of the conditioning context,
/// so longer inputs produce longer (but still bounded) audio.
#[derive(Default)]
pub struct StubModel;

fn fold_hash(bytes: &[u8]) -> u32 {
    bytes.iter().fold(2166136261u32, |acc, &b| {
        (acc ^ b as u32).wrapping_mul(16777619)
    })
}

impl GenerationModel for StubModel {
    fn encode_text(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text
            .split_whitespace()
            .map(|word| 2 + fold_hash(word.as_bytes()) % (TEXT_VOCAB_SIZE as u32 - 2))
            .collect())
    }

    fn step(
        &self,
        history: &[EmittedToken],
        mode: StepMode,
        _fast_path: &super::fast_path::FastPathKind,
    ) -> Result<StepLogits> {
        match mode {
            StepMode::Text => {
                let mut logits = vec![0.0f32; TEXT_VOCAB_SIZE];
                logits[TEXT_AUDIO_BEGIN as usize] = 10.0;
                Ok(StepLogits {
                    text: Some(logits),
                    audio: None,
                })
            }
            StepMode::Audio => {
                let text_len = history
                    .iter()
                    .filter(|t| matches!(t, EmittedToken::Text(_)))
                    .count()
                    .max(1);
                let target_frames = (text_len * 2).clamp(4, 200);
                let frames_emitted = history
                    .iter()
                    .rev()
                    .take_while(|t| matches!(t, EmittedToken::AudioFrame(_)))
                    .count();

                let mut codebooks: [Vec<f32>; super::NUM_CODEBOOKS] =
                    std::array::from_fn(|_| vec![0.0f32; AUDIO_VOCAB_SIZE + 1]);

                if frames_emitted >= target_frames {
                    codebooks[0][AUDIO_END_SENTINEL as usize] = 10.0;
                    for book in codebooks.iter_mut().skip(1) {
                        book[0] = 10.0;
                    }
                } else {
                    for (k, book) in codebooks.iter_mut().enumerate() {
                        let favored = (frames_emitted * 7 + k * 3) % AUDIO_VOCAB_SIZE;
                        book[favored] = 10.0;
                    }
                }

                Ok(StepLogits {
                    text: None,
                    audio: Some(codebooks),
                })
            }
        }
    }

    fn warm_up_step(&self, _bucket: usize) -> Result<()> {
        Ok(())
    }
}

/// Stub audio codec. Maps waveform energy into codebook indices on
/// `tokenize`, and synthesizes a deterministic tone from those indices on
/// `detokenize` — a soft but reproducible round trip, not a perceptual one.
pub struct StubCodec;

const HOP_SIZE: usize = 320;
const NATIVE_SAMPLE_RATE: u32 = 24_000;

impl AudioCodec for StubCodec {
    fn tokenize(&self, waveform: &[f32], _sample_rate: u32) -> Result<Vec<AudioFrame>> {
        if waveform.is_empty() {
            return Ok(Vec::new());
        }
        let frames = waveform
            .chunks(HOP_SIZE)
            .map(|chunk| {
                let energy: f32 = chunk.iter().map(|s| s.abs()).sum::<f32>() / chunk.len() as f32;
                let bucket = ((energy * AUDIO_VOCAB_SIZE as f32) as u32).min(AUDIO_VOCAB_SIZE as u32 - 1);
                let mut frame = [0u32; super::NUM_CODEBOOKS];
                for (k, slot) in frame.iter_mut().enumerate() {
                    *slot = (bucket + k as u32) % AUDIO_VOCAB_SIZE as u32;
                }
                frame
            })
            .collect();
        Ok(frames)
    }

    fn detokenize(&self, frames: &[AudioFrame]) -> Result<(Vec<f32>, u32)> {
        if frames.is_empty() {
            return Ok((Vec::new(), NATIVE_SAMPLE_RATE));
        }
        let mut samples = Vec::with_capacity(frames.len() * HOP_SIZE);
        for frame in frames {
            let amplitude = frame[0] as f32 / AUDIO_VOCAB_SIZE as f32;
            let freq_bin = (frame.get(1).copied().unwrap_or(0) + 1) as f32;
            for n in 0..HOP_SIZE {
                let phase = std::f32::consts::TAU * freq_bin * n as f32 / HOP_SIZE as f32 / 8.0;
                samples.push(amplitude * phase.sin());
            }
        }
        Ok((samples, NATIVE_SAMPLE_RATE))
    }

    fn native_sample_rate(&self) -> u32 {
        NATIVE_SAMPLE_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fast_path::FastPathKind;

    #[test]
    fn encode_text_is_deterministic() {
        let model = StubModel;
        let a = model.encode_text("hello world").unwrap();
        let b = model.encode_text("hello world").unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn text_step_always_signals_audio_begin() {
        let model = StubModel;
        let logits = model
            .step(&[], StepMode::Text, &FastPathKind::Dynamic)
            .unwrap();
        let text = logits.text.unwrap();
        let argmax = text
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(argmax, TEXT_AUDIO_BEGIN as usize);
    }

    #[test]
    fn audio_step_eventually_signals_end() {
        let model = StubModel;
        let history = vec![EmittedToken::Text(5); 2];
        let mut history = history;
        for _ in 0..400 {
            history.push(EmittedToken::AudioFrame([0; super::super::NUM_CODEBOOKS]));
        }
        let logits = model
            .step(&history, StepMode::Audio, &FastPathKind::Dynamic)
            .unwrap();
        let audio = logits.audio.unwrap();
        let argmax0 = audio[0]
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(argmax0, AUDIO_END_SENTINEL as usize);
    }

    #[test]
    fn codec_round_trip_produces_nonempty_audio() {
        let codec = StubCodec;
        let waveform: Vec<f32> = (0..4800).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let frames = codec.tokenize(&waveform, 24_000).unwrap();
        assert!(!frames.is_empty());
        let (out, rate) = codec.detokenize(&frames).unwrap();
        assert!(!out.is_empty());
        assert_eq!(rate, 24_000);
    }

    #[test]
    fn empty_waveform_tokenizes_to_no_frames() {
        let codec = StubCodec;
        let frames = codec.tokenize(&[], 24_000).unwrap();
        assert!(frames.is_empty());
    }
}
