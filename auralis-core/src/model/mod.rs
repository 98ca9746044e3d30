//! Model Lifecycle Manager (C5) and Fast-Path Cache (C6), plus the two
//! opaque collaborators they own: the generation model and the audio codec.
//!
//! Neither the generation model's transformer/attention math nor the audio
//! codec's encode/decode are implemented here — per §1 they are external
//! collaborators. This module defines the seam (`GenerationModel`,
//! `AudioCodec`) and ships a deterministic stub implementation plus, behind
//! the `onnx` feature, a real `ort`-backed one.

pub mod fast_path;
pub mod lifecycle;
pub mod stub;

#[cfg(feature = "onnx")]
pub mod onnx;

use crate::error::Result;

/// Number of parallel audio codebooks per frame — matches the teacher's
/// tensor-shape convention for multi-codebook audio tokens.
pub const NUM_CODEBOOKS: usize = 8;

/// Reserved text-alphabet control ids every `GenerationModel` implementation
/// must honor (§9 "Two-alphabet sampling loop"): id 0 switches the driver
/// into audio-decoding mode, id 1 ends the stream. Codebook 0's logits
/// reserve their last index as the audio-end sentinel — callers read it as
/// `audio_logits[0].len() - 1`, so its value scales with whatever
/// vocabulary size a backend uses.
pub const TEXT_AUDIO_BEGIN: u32 = 0;
pub const TEXT_END_OF_STREAM: u32 = 1;

/// One audio frame: K parallel codebook indices.
pub type AudioFrame = [u32; NUM_CODEBOOKS];

/// One step of the two-alphabet generation stream (§9 "Two-alphabet
/// sampling loop"). A tagged variant per emitted token keeps the driver's
/// branches exhaustive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmittedToken {
    Text(u32),
    AudioBegin,
    AudioFrame(AudioFrame),
    AudioEnd,
    EndOfStream,
}

/// Which alphabet the Generation Driver is currently decoding from —
/// mirrors the `Decoding-Text`/`Decoding-Audio` states of §4.7's state
/// machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepMode {
    Text,
    Audio,
}

/// Logits for one decode step. Only the field matching the current
/// `StepMode` is populated.
pub struct StepLogits {
    pub text: Option<Vec<f32>>,
    pub audio: Option<[Vec<f32>; NUM_CODEBOOKS]>,
}

/// The opaque generation model collaborator.
///
/// Implementations own whatever device state they need; `step` is called
/// once per emitted token from under the Model Lifecycle Manager's
/// exclusive acquire, so implementations do not need their own locking.
pub trait GenerationModel: Send + Sync {
    /// Tokenize plain text into the model's text vocabulary.
    fn encode_text(&self, text: &str) -> Result<Vec<u32>>;

    /// Run one decode step given the full encoded history so far and the
    /// active alphabet, returning logits over that alphabet.
    fn step(
        &self,
        history: &[EmittedToken],
        mode: StepMode,
        fast_path: &fast_path::FastPathKind,
    ) -> Result<StepLogits>;

    /// Run a single synthetic forward pass against `bucket`, used only
    /// during warm-up (§4.5) to populate caches / capture graphs.
    fn warm_up_step(&self, bucket: usize) -> Result<()>;
}

/// The opaque audio codec collaborator: `tokenize(waveform) → tokens` and
/// `detokenize(tokens) → waveform` (§1).
pub trait AudioCodec: Send + Sync {
    fn tokenize(&self, waveform: &[f32], sample_rate: u32) -> Result<Vec<AudioFrame>>;
    fn detokenize(&self, frames: &[AudioFrame]) -> Result<(Vec<f32>, u32)>;
    fn native_sample_rate(&self) -> u32;
}
