//! Sampling policy: temperature scaling, top-k/top-p truncation, seeded
//! multinomial draw, and anti-repetition resampling (§4.7).

use rand::rngs::StdRng;
use rand::Rng;

use crate::error::{AuralisError, Result};

/// Bounded number of resample attempts before giving up and emitting the
/// next-highest-probability non-repeating candidate (§4.7).
const MAX_RESAMPLE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone)]
pub struct SamplingPolicy {
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub ras_win_len: usize,
    pub ras_win_max_num_repeat: usize,
}

impl SamplingPolicy {
    /// temperature=0 degenerates to deterministic arg-max: top-k=1, top-p=1
    /// forced (§4.7 "Numeric semantics").
    pub fn effective(&self) -> (f32, u32, f32) {
        if self.temperature == 0.0 {
            (0.0, 1, 1.0)
        } else {
            (self.temperature, self.top_k, self.top_p)
        }
    }
}

/// Tracks the trailing window of emitted token ids for anti-repetition.
pub struct RepetitionWindow {
    window: std::collections::VecDeque<u32>,
    capacity: usize,
}

impl RepetitionWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: std::collections::VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, token: u32) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(token);
    }

    pub fn count(&self, token: u32) -> usize {
        self.window.iter().filter(|&&t| t == token).count()
    }
}

/// Apply temperature scaling then convert to a normalized probability
/// distribution.
fn softmax_with_temperature(logits: &[f32], temperature: f32) -> Vec<f32> {
    if temperature == 0.0 {
        // arg-max: all mass on the top logit.
        let (argmax, _) = logits
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap();
        let mut probs = vec![0.0f32; logits.len()];
        probs[argmax] = 1.0;
        return probs;
    }

    let scaled: Vec<f32> = logits.iter().map(|&l| l / temperature).collect();
    let max = scaled.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scaled.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Zero out everything but the top-k probabilities, renormalizing. `top_k=1`
/// takes precedence over `top_p` (§4.7).
fn apply_top_k(mut probs: Vec<f32>, top_k: u32) -> Vec<f32> {
    let k = (top_k as usize).min(probs.len()).max(1);
    if k >= probs.len() {
        return probs;
    }
    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let threshold = indexed[k - 1].1;
    for p in probs.iter_mut() {
        if *p < threshold {
            *p = 0.0;
        }
    }
    renormalize(&mut probs);
    probs
}

/// Nucleus (top-p) truncation: keep the smallest prefix of sorted
/// probabilities whose cumulative mass reaches `top_p`.
fn apply_top_p(mut probs: Vec<f32>, top_p: f32) -> Vec<f32> {
    if top_p >= 1.0 {
        return probs;
    }
    let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumulative = 0.0f32;
    let mut cutoff = indexed.len();
    for (i, (_, p)) in indexed.iter().enumerate() {
        cumulative += p;
        if cumulative >= top_p {
            cutoff = i + 1;
            break;
        }
    }
    let kept: std::collections::HashSet<usize> =
        indexed[..cutoff].iter().map(|(i, _)| *i).collect();
    for (i, p) in probs.iter_mut().enumerate() {
        if !kept.contains(&i) {
            *p = 0.0;
        }
    }
    renormalize(&mut probs);
    probs
}

fn renormalize(probs: &mut [f32]) {
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for p in probs.iter_mut() {
            *p /= sum;
        }
    }
}

fn draw(probs: &[f32], rng: &mut StdRng) -> u32 {
    let target: f32 = rng.gen_range(0.0..1.0);
    let mut cumulative = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if target <= cumulative {
            return i as u32;
        }
    }
    (probs.len() - 1) as u32
}

/// Run the full sampling policy against one step's logits, honoring the
/// anti-repetition window with bounded resample retries.
pub fn sample(
    logits: &[f32],
    policy: &SamplingPolicy,
    window: &RepetitionWindow,
    rng: &mut StdRng,
) -> Result<u32> {
    if logits.iter().any(|v| !v.is_finite()) {
        return Err(AuralisError::ModelError(
            "model emitted a non-finite logit".to_string(),
        ));
    }

    let (temperature, top_k, top_p) = policy.effective();
    let probs = apply_top_p(
        apply_top_k(softmax_with_temperature(logits, temperature), top_k),
        top_p,
    );

    let mut candidate = draw(&probs, rng);
    let mut attempts = 0;
    while window.count(candidate) > policy.ras_win_max_num_repeat && attempts < MAX_RESAMPLE_ATTEMPTS {
        candidate = draw(&probs, rng);
        attempts += 1;
    }

    if window.count(candidate) > policy.ras_win_max_num_repeat {
        // Exhausted retries — fall back to the next-highest-probability
        // non-repeating candidate.
        let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (i, _) in indexed {
            if window.count(i as u32) <= policy.ras_win_max_num_repeat {
                return Ok(i as u32);
            }
        }
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn policy(temperature: f32, top_k: u32, top_p: f32) -> SamplingPolicy {
        SamplingPolicy {
            temperature,
            top_k,
            top_p,
            ras_win_len: 7,
            ras_win_max_num_repeat: 2,
        }
    }

    #[test]
    fn zero_temperature_is_deterministic_argmax() {
        let logits = vec![0.1, 5.0, 0.2, 0.3];
        let window = RepetitionWindow::new(7);
        let mut rng = StdRng::seed_from_u64(0);
        let a = sample(&logits, &policy(0.0, 50, 0.95), &window, &mut rng).unwrap();
        let mut rng2 = StdRng::seed_from_u64(999);
        let b = sample(&logits, &policy(0.0, 50, 0.95), &window, &mut rng2).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 1);
    }

    #[test]
    fn same_seed_same_sequence() {
        let logits = vec![1.0, 1.0, 1.0, 1.0];
        let window = RepetitionWindow::new(7);
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let seq_a: Vec<u32> = (0..10)
            .map(|_| sample(&logits, &policy(1.0, 50, 0.95), &window, &mut rng_a).unwrap())
            .collect();
        let seq_b: Vec<u32> = (0..10)
            .map(|_| sample(&logits, &policy(1.0, 50, 0.95), &window, &mut rng_b).unwrap())
            .collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn top_k_one_ignores_top_p() {
        let logits = vec![0.1, 9.0, 0.1, 8.9];
        let probs = apply_top_p(apply_top_k(softmax_with_temperature(&logits, 1.0), 1), 0.01);
        let nonzero = probs.iter().filter(|&&p| p > 0.0).count();
        assert_eq!(nonzero, 1);
    }

    #[test]
    fn non_finite_logit_is_model_error_not_panic() {
        let logits = vec![0.1, f32::NAN, 0.2];
        let window = RepetitionWindow::new(7);
        let mut rng = StdRng::seed_from_u64(0);
        let err = sample(&logits, &policy(1.0, 50, 0.95), &window, &mut rng).unwrap_err();
        assert_eq!(err.kind_str(), "ModelError");
    }

    #[test]
    fn repetition_window_caps_repeats() {
        let mut window = RepetitionWindow::new(3);
        window.push(5);
        window.push(5);
        window.push(5);
        assert_eq!(window.count(5), 3);
        window.push(6);
        assert_eq!(window.count(5), 2, "oldest entry should be evicted");
    }
}
