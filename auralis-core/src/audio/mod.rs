//! Audio Assembler (C8).
//!
//! Concatenates per-chunk waveforms produced by the Generation Driver in
//! emission order, resampling any chunk whose rate disagrees with the job's
//! configured output rate, and encodes the result as a canonical WAV/PCM16
//! container.

pub mod resample;

use crate::error::{AuralisError, Result};
use resample::RateConverter;

/// One chunk's generated waveform, as handed off by the Generation Driver.
pub struct ChunkWaveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// The assembled result of an entire job: concatenated samples at the
/// job's output rate, ready for container encoding.
pub struct AssembledAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AssembledAudio {
    /// Total duration in seconds. Used to populate response metadata and to
    /// check invariant 3 (§8): a successful job must have duration > 0.
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Encode as a canonical mono 16-bit PCM WAV container.
    pub fn encode_wav_pcm16(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| AuralisError::ModelError(format!("wav writer init: {e}")))?;
            for &sample in &self.samples {
                let clamped = sample.clamp(-1.0, 1.0);
                let quantized = (clamped * i16::MAX as f32).round() as i16;
                writer
                    .write_sample(quantized)
                    .map_err(|e| AuralisError::ModelError(format!("wav write: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| AuralisError::ModelError(format!("wav finalize: {e}")))?;
        }
        Ok(cursor.into_inner())
    }
}

/// Concatenates chunk waveforms in order, resampling any chunk whose rate
/// doesn't match `output_rate`. Empty chunks contribute zero samples but are
/// still counted — callers are expected to have already resolved §4.4's
/// empty-chunk escalation/splice policy before reaching this point.
pub fn assemble(chunks: Vec<ChunkWaveform>, output_rate: u32) -> AssembledAudio {
    let mut samples = Vec::new();

    for chunk in chunks {
        if chunk.sample_rate == output_rate {
            samples.extend_from_slice(&chunk.samples);
            continue;
        }

        // chunk_size of 960 matches the teacher's capture-pipeline block size;
        // there's no real-time constraint here, just reusing the same rubato
        // session shape.
        match RateConverter::new(chunk.sample_rate, output_rate, 960) {
            Ok(mut rc) => {
                samples.extend(rc.process(&chunk.samples));
                samples.extend(rc.flush());
            }
            Err(e) => {
                tracing::error!("resample failed for chunk at {}Hz: {e}", chunk.sample_rate);
            }
        }
    }

    AssembledAudio {
        samples,
        sample_rate: output_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_matching_rate_passes_through() {
        let chunks = vec![ChunkWaveform {
            samples: vec![0.1, 0.2, -0.1],
            sample_rate: 24_000,
        }];
        let assembled = assemble(chunks, 24_000);
        assert_eq!(assembled.samples.len(), 3);
        assert_eq!(assembled.sample_rate, 24_000);
    }

    #[test]
    fn multiple_chunks_concatenate_in_order() {
        let chunks = vec![
            ChunkWaveform { samples: vec![1.0; 100], sample_rate: 24_000 },
            ChunkWaveform { samples: vec![2.0; 50], sample_rate: 24_000 },
        ];
        let assembled = assemble(chunks, 24_000);
        assert_eq!(assembled.samples.len(), 150);
        assert_eq!(assembled.samples[0], 1.0);
        assert_eq!(assembled.samples[149], 2.0);
    }

    #[test]
    fn duration_seconds_matches_sample_count() {
        let assembled = AssembledAudio {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
        };
        assert!((assembled.duration_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn encode_wav_produces_nonempty_riff_container() {
        let assembled = AssembledAudio {
            samples: vec![0.0, 0.5, -0.5, 1.0, -1.0],
            sample_rate: 24_000,
        };
        let bytes = assembled.encode_wav_pcm16().unwrap();
        assert!(bytes.len() > 44, "expect header plus sample data");
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }

    #[test]
    fn mismatched_rate_is_resampled_to_output_rate() {
        let chunks = vec![ChunkWaveform {
            samples: vec![0.0f32; 4800],
            sample_rate: 48_000,
        }];
        let assembled = assemble(chunks, 24_000);
        // ~2400 samples expected at half the input rate, plus a flushed tail.
        assert!(assembled.samples.len() > 2000);
    }
}
