//! Fast-Path Cache (C6).
//!
//! Owns, per length bucket, a pre-sized key/value workspace and optionally a
//! captured accelerator graph handle. Selection picks the smallest
//! available bucket ≥ the encoded context length, preferring a captured
//! graph over a bare workspace over the dynamic fallback (§4.6).

use parking_lot::Mutex;

/// Which kind of fast path a context of a given length resolved to. Surfaced
/// in job metadata as `fast_path`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPathKind {
    Captured(usize),
    Workspace(usize),
    Dynamic,
}

impl FastPathKind {
    pub fn as_metadata_str(&self) -> &'static str {
        match self {
            FastPathKind::Captured(_) => "captured",
            FastPathKind::Workspace(_) => "workspace",
            FastPathKind::Dynamic => "dynamic",
        }
    }
}

/// A capability handle for one length bucket's captured graph — opaque per
/// §9, so tests can substitute a reference handle that just runs the
/// uncaptured path.
pub trait CapturedGraph: Send + Sync {
    fn run(&self) -> crate::error::Result<()>;
}

struct Bucket {
    length: usize,
    /// Write-position pointer into the KV workspace. Zeroed at the start of
    /// each job by the current acquirer (§4.6) — there is no concurrent use
    /// because only one Generation Driver ever holds the Model Lifecycle
    /// Manager at a time.
    write_pos: Mutex<usize>,
    available: bool,
    graph: Option<Box<dyn CapturedGraph>>,
}

/// Owns one `Bucket` per configured length, in ascending order.
pub struct FastPathCache {
    buckets: Vec<Bucket>,
}

impl FastPathCache {
    /// Build an entry per configured length bucket, all initially
    /// unavailable. `mark_available`/`attach_graph` are called during
    /// warm-up as each bucket's allocation succeeds.
    pub fn new(length_buckets: &[usize]) -> Self {
        let mut sorted = length_buckets.to_vec();
        sorted.sort_unstable();
        let buckets = sorted
            .into_iter()
            .map(|length| Bucket {
                length,
                write_pos: Mutex::new(0),
                available: false,
                graph: None,
            })
            .collect();
        Self { buckets }
    }

    pub fn mark_available(&mut self, length: usize) {
        if let Some(bucket) = self.buckets.iter_mut().find(|b| b.length == length) {
            bucket.available = true;
        }
    }

    pub fn attach_graph(&mut self, length: usize, graph: Box<dyn CapturedGraph>) {
        if let Some(bucket) = self.buckets.iter_mut().find(|b| b.length == length) {
            bucket.graph = Some(graph);
        }
    }

    /// True if the smallest configured bucket is available — used by warm-up
    /// to decide whether a single-bucket failure should fail the whole
    /// worker (§4.5: "If the smallest bucket fails, the worker enters
    /// Failed").
    pub fn smallest_bucket_available(&self) -> bool {
        self.buckets.first().map(|b| b.available).unwrap_or(false)
    }

    pub fn configured_lengths(&self) -> Vec<usize> {
        self.buckets.iter().map(|b| b.length).collect()
    }

    /// Select the fast path for a context of length `encoded_len`, zeroing
    /// the chosen bucket's write-position pointer as required by §4.6.
    pub fn select(&self, encoded_len: usize) -> FastPathKind {
        let chosen = self
            .buckets
            .iter()
            .find(|b| b.available && b.length >= encoded_len);

        match chosen {
            Some(bucket) => {
                *bucket.write_pos.lock() = 0;
                if bucket.graph.is_some() {
                    FastPathKind::Captured(bucket.length)
                } else {
                    FastPathKind::Workspace(bucket.length)
                }
            }
            None => FastPathKind::Dynamic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_smallest_available_bucket_at_or_above_length() {
        let mut cache = FastPathCache::new(&[128, 256, 512]);
        cache.mark_available(128);
        cache.mark_available(256);
        cache.mark_available(512);

        assert_eq!(cache.select(1), FastPathKind::Workspace(128));
        assert_eq!(cache.select(128), FastPathKind::Workspace(128));
        assert_eq!(cache.select(129), FastPathKind::Workspace(256));
    }

    #[test]
    fn falls_back_to_dynamic_above_largest_bucket() {
        let mut cache = FastPathCache::new(&[128, 256]);
        cache.mark_available(128);
        cache.mark_available(256);
        assert_eq!(cache.select(1000), FastPathKind::Dynamic);
    }

    #[test]
    fn unavailable_bucket_is_skipped() {
        let mut cache = FastPathCache::new(&[128, 256]);
        cache.mark_available(256);
        // bucket 128 failed warm-up and was never marked available
        assert_eq!(cache.select(10), FastPathKind::Workspace(256));
    }

    #[test]
    fn smallest_bucket_unavailable_is_detected() {
        let mut cache = FastPathCache::new(&[128, 256]);
        cache.mark_available(256);
        assert!(!cache.smallest_bucket_available());
    }
}
