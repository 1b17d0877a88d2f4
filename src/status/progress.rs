use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Maps a byte counter onto a slice `[start, start + span]` of the overall percentage.
///
/// Clones share the same counter: the frame that moves the bytes advances it,
/// the poller that publishes status reads it.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    processed: AtomicU64,
    finished: AtomicBool,
    total: u64,
    start: f64,
    span: f64,
}

impl ProgressTracker {
    pub fn new(total: u64, start: f64, span: f64) -> Self {
        Self { inner: Arc::new(Inner { processed: AtomicU64::new(0), finished: AtomicBool::new(false), total, start, span }) }
    }

    #[inline]
    pub fn advance(&self, bytes: u64) {
        self.inner.processed.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.inner.total
    }

    /// Pins the percentage to its upper bound.
    pub fn finish(&self) {
        self.inner.finished.store(true, Ordering::Release);
    }

    /// Current percentage; never decreases and never exceeds `start + span`.
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        let end = self.inner.start + self.inner.span;
        if self.inner.total == 0 || self.inner.finished.load(Ordering::Acquire) {
            return end;
        }
        let ratio = self.processed() as f64 / self.inner.total as f64;
        (self.inner.start + ratio * self.inner.span).min(end)
    }
}
