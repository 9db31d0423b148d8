//! Bitmap Reuse Pool
//!
//! Reuses pixel buffers to reduce allocation churn. Cached images that no
//! longer qualify for caching or display are tracked as weak candidates;
//! decode canvases and eligible images whose last owner goes away are
//! retained strongly, up to a bound. A miss always falls back to a fresh
//! allocation, so nothing here affects correctness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use fos_gif::{Bitmap, PixelAllocator};
use serde::{Deserialize, Serialize};

/// How a pooled buffer is matched against a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseMode {
    /// Only a buffer that held an image of the same dimensions
    ExactDimensions,
    /// Any buffer with enough capacity
    #[default]
    ByteBudget,
}

impl ReuseMode {
    fn fits(self, width: u32, height: u32, capacity: usize, want_width: u32, want_height: u32) -> bool {
        match self {
            Self::ExactDimensions => width == want_width && height == want_height,
            Self::ByteBudget => capacity >= want_width as usize * want_height as usize,
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Weak candidates currently tracked
    pub candidates: usize,
    /// Strongly held free buffers
    pub retained: usize,
    pub hits: u64,
    pub misses: u64,
    pub offered: u64,
    /// Candidates dropped because they were gone or no longer reusable
    pub discarded: u64,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// A decoded bitmap whose storage can be handed back to the pool.
///
/// The bitmap becomes invalid (empty) once the pool gives its storage to a
/// new decode.
pub struct PooledBitmap {
    width: u32,
    height: u32,
    bytes: usize,
    bitmap: Mutex<Bitmap>,
    reusable: AtomicBool,
    pool: Weak<PoolInner>,
}

impl PooledBitmap {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Allocated footprint at creation time
    pub fn byte_count(&self) -> usize {
        self.bytes
    }

    /// Whether the pixels are still present
    pub fn is_valid(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable.load(Ordering::Acquire)
    }

    /// Run `f` against the pixels, or return `None` once they were reused
    pub fn with_bitmap<R>(&self, f: impl FnOnce(&Bitmap) -> R) -> Option<R> {
        let bitmap = self.lock();
        if bitmap.is_empty() { None } else { Some(f(&bitmap)) }
    }

    /// Flips under the pixel lock so it cannot interleave with a take
    pub(crate) fn set_reusable(&self, reusable: bool) {
        let _bitmap = self.lock();
        self.reusable.store(reusable, Ordering::Release);
    }

    fn pixel_len(&self) -> usize {
        self.lock().pixels().len()
    }

    /// Take the storage if the bitmap is still reusable at this moment
    fn take_pixels(&self) -> Option<Vec<u32>> {
        let mut bitmap = self.lock();
        if bitmap.is_empty() {
            return None;
        }
        self.reusable
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(std::mem::take(&mut *bitmap).into_pixels())
    }

    fn lock(&self) -> MutexGuard<'_, Bitmap> {
        self.bitmap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for PooledBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBitmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("valid", &self.is_valid())
            .field("reusable", &self.is_reusable())
            .finish()
    }
}

impl Drop for PooledBitmap {
    fn drop(&mut self) {
        if !*self.reusable.get_mut() {
            return;
        }
        let bitmap = std::mem::take(self.bitmap.get_mut().unwrap_or_else(PoisonError::into_inner));
        if bitmap.is_empty() {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.retain(self.width, self.height, bitmap.into_pixels());
        }
    }
}

struct Retained {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

#[derive(Default)]
struct PoolState {
    candidates: Vec<Weak<PooledBitmap>>,
    retained: VecDeque<Retained>,
    stats: PoolStats,
}

struct PoolInner {
    mode: ReuseMode,
    max_retained: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retain(&self, width: u32, height: u32, pixels: Vec<u32>) {
        if self.max_retained == 0 || pixels.capacity() == 0 {
            return;
        }
        let mut state = self.lock();
        state.retained.push_back(Retained { width, height, pixels });
        while state.retained.len() > self.max_retained {
            state.retained.pop_front();
        }
    }
}

/// Shared reuse pool; clones refer to the same pool
#[derive(Clone)]
pub struct ReusePool {
    inner: Arc<PoolInner>,
}

impl ReusePool {
    pub fn new(mode: ReuseMode, max_retained: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                mode,
                max_retained,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn mode(&self) -> ReuseMode {
        self.inner.mode
    }

    /// Wrap a decoded bitmap so its storage can later return here
    pub fn adopt(&self, bitmap: Bitmap) -> Arc<PooledBitmap> {
        Arc::new(PooledBitmap {
            width: bitmap.width(),
            height: bitmap.height(),
            bytes: bitmap.byte_count(),
            bitmap: Mutex::new(bitmap),
            reusable: AtomicBool::new(false),
            pool: Arc::downgrade(&self.inner),
        })
    }

    /// Track a reusable bitmap as a weak candidate
    pub fn offer(&self, bitmap: &Arc<PooledBitmap>) {
        if !bitmap.is_reusable() {
            return;
        }
        let mut state = self.inner.lock();
        let weak = Arc::downgrade(bitmap);
        if state.candidates.iter().any(|c| c.ptr_eq(&weak)) {
            return;
        }
        state.candidates.push(weak);
        state.stats.offered += 1;
        tracing::trace!("Pool offered {}x{} bitmap", bitmap.width(), bitmap.height());
    }

    /// Take a buffer able to hold a `width * height` image
    pub fn acquire(&self, width: u32, height: u32) -> Option<Vec<u32>> {
        let mode = self.inner.mode;
        // Upgraded candidates are dropped only after the lock is released
        let mut hold = Vec::new();
        let mut state = self.inner.lock();

        let position = state
            .retained
            .iter()
            .position(|r| mode.fits(r.width, r.height, r.pixels.capacity(), width, height));
        let mut found = position.and_then(|index| state.retained.remove(index)).map(|r| r.pixels);

        let mut index = 0;
        while found.is_none() && index < state.candidates.len() {
            let Some(candidate) = state.candidates[index].upgrade() else {
                state.candidates.remove(index);
                state.stats.discarded += 1;
                continue;
            };
            if !candidate.is_reusable() || !candidate.is_valid() {
                state.candidates.remove(index);
                state.stats.discarded += 1;
            } else if mode.fits(candidate.width, candidate.height, candidate.pixel_len(), width, height) {
                state.candidates.remove(index);
                found = candidate.take_pixels();
            } else {
                index += 1;
            }
            hold.push(candidate);
        }

        if found.is_some() {
            state.stats.hits += 1;
            tracing::trace!("Pool hit for {}x{}", width, height);
        } else {
            state.stats.misses += 1;
            tracing::trace!("Pool miss for {}x{}", width, height);
        }
        drop(state);
        drop(hold);
        found
    }

    /// Keep a free buffer that last held a `width * height` image
    pub fn release(&self, width: u32, height: u32, pixels: Vec<u32>) {
        self.inner.retain(width, height, pixels);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            candidates: state.candidates.len(),
            retained: state.retained.len(),
            ..state.stats
        }
    }

    /// Forget every candidate and drop retained buffers
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.candidates.clear();
        state.retained.clear();
    }
}

impl PixelAllocator for ReusePool {
    fn acquire(&self, width: u32, height: u32) -> Option<Vec<u32>> {
        ReusePool::acquire(self, width, height)
    }

    fn release(&self, width: u32, height: u32, pixels: Vec<u32>) {
        ReusePool::release(self, width, height, pixels);
    }
}

impl std::fmt::Debug for ReusePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReusePool")
            .field("mode", &self.inner.mode)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(width: u32, height: u32) -> Bitmap {
        Bitmap::from_pixels(width, height, vec![7; (width * height) as usize])
    }

    fn reusable(pool: &ReusePool, width: u32, height: u32) -> Arc<PooledBitmap> {
        let pooled = pool.adopt(bitmap(width, height));
        pooled.set_reusable(true);
        pool.offer(&pooled);
        pooled
    }

    #[test]
    fn test_exact_dimensions() {
        let pool = ReusePool::new(ReuseMode::ExactDimensions, 0);
        let pooled = reusable(&pool, 4, 4);

        assert!(pool.acquire(2, 2).is_none());
        let pixels = pool.acquire(4, 4).unwrap();
        assert_eq!(pixels.len(), 16);
        assert!(!pooled.is_valid());
        assert!(!pooled.is_reusable());
        assert_eq!(pool.stats().candidates, 0);
        assert_eq!(pool.stats().hits, 1);
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn test_byte_budget_accepts_larger() {
        let pool = ReusePool::new(ReuseMode::ByteBudget, 0);
        let _pooled = reusable(&pool, 8, 8);
        assert!(pool.acquire(9, 8).is_none());
        assert!(pool.acquire(4, 10).is_some());
    }

    #[test]
    fn test_first_compatible_wins() {
        let pool = ReusePool::new(ReuseMode::ExactDimensions, 0);
        let small = reusable(&pool, 2, 2);
        let first = reusable(&pool, 4, 4);
        let second = reusable(&pool, 4, 4);

        pool.acquire(4, 4).unwrap();
        assert!(small.is_valid());
        assert!(!first.is_valid());
        assert!(second.is_valid());
    }

    #[test]
    fn test_gone_and_withdrawn_candidates_discarded() {
        let pool = ReusePool::new(ReuseMode::ByteBudget, 0);
        let gone = reusable(&pool, 2, 2);
        gone.set_reusable(false);
        drop(gone);
        let withdrawn = reusable(&pool, 2, 2);
        withdrawn.set_reusable(false);

        assert!(pool.acquire(1, 1).is_none());
        let stats = pool.stats();
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.candidates, 0);
        assert!(withdrawn.is_valid());
    }

    #[test]
    fn test_take_rechecks_reusable() {
        let pool = ReusePool::new(ReuseMode::ExactDimensions, 0);
        let pooled = reusable(&pool, 2, 2);

        // Passed the candidate scan, then shown again before the take
        assert!(pooled.is_reusable());
        pooled.set_reusable(false);
        assert!(pooled.take_pixels().is_none());
        assert!(pooled.is_valid());

        pooled.set_reusable(true);
        assert_eq!(pooled.take_pixels().map(|p| p.len()), Some(4));
        assert!(!pooled.is_reusable());
        assert!(!pooled.is_valid());
    }

    #[test]
    fn test_non_reusable_not_offered() {
        let pool = ReusePool::new(ReuseMode::ByteBudget, 4);
        let pooled = pool.adopt(bitmap(2, 2));
        pool.offer(&pooled);
        assert_eq!(pool.stats().offered, 0);
    }

    #[test]
    fn test_offer_is_deduplicated() {
        let pool = ReusePool::new(ReuseMode::ByteBudget, 0);
        let pooled = reusable(&pool, 2, 2);
        pool.offer(&pooled);
        assert_eq!(pool.stats().candidates, 1);
    }

    #[test]
    fn test_final_release_retains_storage() {
        let pool = ReusePool::new(ReuseMode::ExactDimensions, 2);
        let pooled = reusable(&pool, 3, 3);
        drop(pooled);
        assert_eq!(pool.stats().retained, 1);
        assert_eq!(pool.acquire(3, 3).map(|p| p.len()), Some(9));
        assert_eq!(pool.stats().retained, 0);
    }

    #[test]
    fn test_retained_is_bounded() {
        let pool = ReusePool::new(ReuseMode::ByteBudget, 2);
        for _ in 0..5 {
            pool.release(2, 2, vec![0; 4]);
        }
        assert_eq!(pool.stats().retained, 2);
        pool.clear();
        assert_eq!(pool.stats().retained, 0);
    }

    #[test]
    fn test_allocator_seam() {
        let pool = ReusePool::new(ReuseMode::ByteBudget, 2);
        PixelAllocator::release(&pool, 5, 5, vec![1; 25]);
        let pixels = fos_gif::allocate_pixels(&pool, 5, 5).unwrap();
        assert_eq!(pixels, vec![0; 25]);
        assert_eq!(pool.stats().hits, 1);
    }
}
