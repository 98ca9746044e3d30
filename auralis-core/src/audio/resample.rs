//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! The generation model and audio codec operate at a fixed native rate.
//! When a chunk's waveform was produced at a different rate than the job's
//! configured output rate, the Audio Assembler (C8) uses `RateConverter` to
//! bring it in line before concatenation and container encoding.
//!
//! When the input rate already matches the target rate, `RateConverter` is a
//! zero-copy passthrough — no rubato session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{AuralisError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `input_rate`: sample rate of the chunk waveform as produced (Hz).
    /// - `target_rate`: the job's configured output sample rate (Hz).
    /// - `chunk_size`: input frame count per rubato call (e.g. `960`).
    ///
    /// # Errors
    /// Returns `AuralisError::ModelError` if rubato fails to initialise.
    pub fn new(input_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if input_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / input_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| AuralisError::ModelError(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(
            input_rate,
            target_rate,
            chunk_size,
            max_out,
            "resampling enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for the next call —
    /// callers must call `flush` once all input has been pushed.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Pad and run any remaining partial chunk through the resampler.
    ///
    /// A chunk's tail is almost never an exact multiple of `chunk_size`; this
    /// flushes whatever is left so the last few milliseconds aren't dropped.
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return std::mem::take(&mut self.input_buf);
        };
        if self.input_buf.is_empty() {
            return Vec::new();
        }
        let mut padded = std::mem::take(&mut self.input_buf);
        padded.resize(self.chunk_size, 0.0);
        match resampler.process_into_buffer(&[&padded[..]], &mut self.output_buf, None) {
            Ok((_consumed, produced)) => self.output_buf[0][..produced].to_vec(),
            Err(e) => {
                error!("resampler flush error: {e}");
                Vec::new()
            }
        }
    }

    /// Returns `true` when input rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(24_000, 24_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples);
        assert_eq!(out, samples);
    }

    #[test]
    fn ratio_48k_to_24k_correct_length() {
        let mut rc = RateConverter::new(48_000, 24_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        let samples = vec![0.0f32; 960];
        let out = rc.process(&samples);
        assert!(!out.is_empty(), "expected non-empty output");
        let expected = 480usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 10,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn partial_accumulation_returns_empty_until_flush() {
        let mut rc = RateConverter::new(48_000, 24_000, 960).unwrap();
        let samples = vec![0.0f32; 500];
        let out = rc.process(&samples);
        assert!(out.is_empty(), "expected empty output for partial chunk");
        let flushed = rc.flush();
        assert!(!flushed.is_empty(), "flush should emit the padded remainder");
    }

    #[test]
    fn multiple_partial_chunks_accumulate() {
        let mut rc = RateConverter::new(48_000, 24_000, 960).unwrap();
        let out1 = rc.process(&vec![0.0f32; 500]);
        assert!(out1.is_empty());
        let out2 = rc.process(&vec![0.0f32; 500]);
        assert!(!out2.is_empty(), "second push should trigger processing");
    }
}
