//! Model Lifecycle Manager (C5).
//!
//! Owns the one GPU-resident copy of the generation model and codec, plus
//! the Fast-Path Cache. Enforces single-writer access to the device via a
//! `tokio::sync::Semaphore` of capacity one — waiters are served FIFO,
//! satisfying §5's fairness recommendation without a hand-rolled queue.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{error, info, warn};

use super::fast_path::FastPathCache;
use super::{AudioCodec, GenerationModel};
use crate::config::ResolvedConfig;
use crate::error::{AuralisError, Result};

/// Model Lifecycle State (§3). `Failed` and the terminal state reached from
/// `Draining` are both dead ends — the worker must be restarted, matching
/// §4.5's "non-recoverable" warm-up failure contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Loading,
    Ready,
    Draining,
    Terminal,
    Failed,
}

pub struct ModelLifecycle {
    state: Mutex<LifecycleState>,
    semaphore: Semaphore,
    model: Mutex<Option<Arc<dyn GenerationModel>>>,
    codec: Mutex<Option<Arc<dyn AudioCodec>>>,
    fast_path: Mutex<Option<FastPathCache>>,
}

impl ModelLifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Uninitialized),
            semaphore: Semaphore::new(1),
            model: Mutex::new(None),
            codec: Mutex::new(None),
            fast_path: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Loads weights/codec and runs the warm-up protocol (§4.5). The device
    /// is held exclusively for the duration — `start` is expected to run
    /// once, before any job is accepted.
    pub async fn start(
        &self,
        cfg: &ResolvedConfig,
        model: Arc<dyn GenerationModel>,
        codec: Arc<dyn AudioCodec>,
    ) -> Result<()> {
        *self.state.lock() = LifecycleState::Loading;
        info!(device = %cfg.device, "loading model and codec");

        *self.model.lock() = Some(model.clone());
        *self.codec.lock() = Some(codec);

        let mut cache = FastPathCache::new(&cfg.length_buckets);
        for &bucket in &cfg.length_buckets {
            match model.warm_up_step(bucket) {
                Ok(()) => {
                    cache.mark_available(bucket);
                    if cfg.enable_captured_graphs {
                        // Real graph capture is delegated to the concrete
                        // `GenerationModel` implementation; the stub and the
                        // `onnx` backend both treat this as a no-op capture
                        // that reuses the plain decode step.
                        info!(bucket, "captured graph requested (no-op in this backend)");
                    }
                }
                Err(e) => {
                    warn!(bucket, error = %e, "warm-up failed for bucket; marking unavailable");
                }
            }
        }

        if !cache.smallest_bucket_available() {
            error!("smallest length bucket failed warm-up; entering Failed");
            *self.state.lock() = LifecycleState::Failed;
            return Err(AuralisError::ModelError(
                "smallest length bucket failed warm-up".to_string(),
            ));
        }

        *self.fast_path.lock() = Some(cache);
        *self.state.lock() = LifecycleState::Ready;
        info!("model lifecycle ready");
        Ok(())
    }

    /// Blocks until the device is exclusively available, returning a guard
    /// that releases on drop. Fails immediately with `ShuttingDown` if the
    /// manager is draining or terminal.
    pub async fn acquire(&self) -> Result<AcquireGuard<'_>> {
        match self.state() {
            LifecycleState::Draining | LifecycleState::Terminal => {
                return Err(AuralisError::ShuttingDown)
            }
            LifecycleState::Failed => {
                return Err(AuralisError::ModelError(
                    "model lifecycle is in the Failed state".to_string(),
                ))
            }
            LifecycleState::Uninitialized | LifecycleState::Loading => {
                return Err(AuralisError::ModelError(
                    "model lifecycle is not Ready".to_string(),
                ))
            }
            LifecycleState::Ready => {}
        }

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| AuralisError::ShuttingDown)?;

        // Re-check after acquiring — shutdown may have started while waiting.
        if matches!(
            self.state(),
            LifecycleState::Draining | LifecycleState::Terminal
        ) {
            return Err(AuralisError::ShuttingDown);
        }

        Ok(AcquireGuard {
            lifecycle: self,
            _permit: permit,
        })
    }

    pub fn model(&self) -> Option<Arc<dyn GenerationModel>> {
        self.model.lock().clone()
    }

    pub fn codec(&self) -> Option<Arc<dyn AudioCodec>> {
        self.codec.lock().clone()
    }

    pub fn with_fast_path<R>(&self, f: impl FnOnce(&FastPathCache) -> R) -> Option<R> {
        self.fast_path.lock().as_ref().map(f)
    }

    /// Sets `Draining`, waits for the current holder (if any) to release,
    /// then transitions to `Terminal`.
    pub async fn shutdown(&self) {
        info!("model lifecycle draining");
        *self.state.lock() = LifecycleState::Draining;
        // Acquiring the permit ourselves blocks until any in-flight job has
        // released it, matching "waits for the current holder to release".
        let _ = self.semaphore.acquire().await;
        *self.state.lock() = LifecycleState::Terminal;
        info!("model lifecycle terminal");
    }
}

impl Default for ModelLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by `acquire()`. The device is released on drop
/// regardless of the caller's exit path (success, error, or panic unwind),
/// matching §9's "Back-reference between Generation Driver and Lifecycle
/// Manager" note.
pub struct AcquireGuard<'a> {
    lifecycle: &'a ModelLifecycle,
    _permit: SemaphorePermit<'a>,
}

impl<'a> AcquireGuard<'a> {
    pub fn lifecycle(&self) -> &ModelLifecycle {
        self.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::stub::{StubCodec, StubModel};

    fn test_config() -> ResolvedConfig {
        ResolvedConfig {
            model_weights_path: "/tmp".into(),
            codec_weights_path: "/tmp".into(),
            voice_registry_path: "/tmp".into(),
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

    #[tokio::test]
    async fn starts_and_becomes_ready() {
        let lifecycle = ModelLifecycle::new();
        let cfg = test_config();
        lifecycle
            .start(&cfg, Arc::new(StubModel::default()), Arc::new(StubCodec))
            .await
            .unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn acquire_fails_before_start() {
        let lifecycle = ModelLifecycle::new();
        let err = lifecycle.acquire().await.unwrap_err();
        assert_eq!(err.kind_str(), "ModelError");
    }

    #[tokio::test]
    async fn only_one_holder_at_a_time() {
        let lifecycle = Arc::new(ModelLifecycle::new());
        let cfg = test_config();
        lifecycle
            .start(&cfg, Arc::new(StubModel::default()), Arc::new(StubCodec))
            .await
            .unwrap();

        let guard = lifecycle.acquire().await.unwrap();
        assert_eq!(lifecycle.semaphore.available_permits(), 0);
        drop(guard);
        assert_eq!(lifecycle.semaphore.available_permits(), 1);
    }

    #[tokio::test]
    async fn shutdown_then_acquire_is_shutting_down() {
        let lifecycle = Arc::new(ModelLifecycle::new());
        let cfg = test_config();
        lifecycle
            .start(&cfg, Arc::new(StubModel::default()), Arc::new(StubCodec))
            .await
            .unwrap();
        lifecycle.shutdown().await;
        let err = lifecycle.acquire().await.unwrap_err();
        assert_eq!(err.kind_str(), "ShuttingDown");
    }
}
