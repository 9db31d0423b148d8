//! Decoded images and their reference discipline
//!
//! An [`ImageEntry`] counts how many displays show it and whether the memory
//! cache holds it. Once it is neither cached nor displayed, and has been
//! displayed at least once, its pixels are offered to the reuse pool.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fos_gif::Bitmap;

use crate::{CacheKey, ImageFormat, ImageSource, PooledBitmap, ReusePool};

/// Output of a successful load, before it is wrapped into an entry
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// First frame, subsampled to the requested bounds
    pub bitmap: Bitmap,
    pub format: ImageFormat,
    pub source_width: u32,
    pub source_height: u32,
    /// Power-of-two subsampling factor applied to `bitmap`
    pub sample_size: u32,
    /// `Some(1)` for static images; animated images may not know yet
    pub frame_count: Option<usize>,
    pub loop_count: Option<u16>,
    pub animated: bool,
}

#[derive(Debug, Default)]
struct EntryState {
    display_refs: u32,
    cached: bool,
    displayed_once: bool,
}

/// A decoded image shared between the cache, the coordinator and displays
pub struct ImageEntry {
    key: CacheKey,
    source: ImageSource,
    format: ImageFormat,
    source_width: u32,
    source_height: u32,
    sample_size: u32,
    frame_count: Option<usize>,
    loop_count: Option<u16>,
    animated: bool,
    pixels: Arc<PooledBitmap>,
    pool: ReusePool,
    state: Mutex<EntryState>,
}

impl ImageEntry {
    pub fn new(key: CacheKey, source: ImageSource, image: DecodedImage, pool: &ReusePool) -> Self {
        Self {
            key,
            source,
            format: image.format,
            source_width: image.source_width,
            source_height: image.source_height,
            sample_size: image.sample_size,
            frame_count: image.frame_count,
            loop_count: image.loop_count,
            animated: image.animated,
            pixels: pool.adopt(image.bitmap),
            pool: pool.clone(),
            state: Mutex::new(EntryState::default()),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Decoded width
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Decoded height
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn source_size(&self) -> (u32, u32) {
        (self.source_width, self.source_height)
    }

    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn frame_count(&self) -> Option<usize> {
        self.frame_count
    }

    pub fn loop_count(&self) -> Option<u16> {
        self.loop_count
    }

    pub fn is_animated(&self) -> bool {
        self.animated
    }

    /// Allocated footprint of the pixels
    pub fn byte_count(&self) -> usize {
        self.pixels.byte_count()
    }

    /// Whether the pixels are still present
    pub fn is_valid(&self) -> bool {
        self.pixels.is_valid()
    }

    /// Run `f` against the pixels, or return `None` once they were reused
    pub fn with_bitmap<R>(&self, f: impl FnOnce(&Bitmap) -> R) -> Option<R> {
        self.pixels.with_bitmap(f)
    }

    /// Copy of the pixels
    pub fn bitmap(&self) -> Option<Bitmap> {
        self.with_bitmap(Bitmap::clone)
    }

    /// A display started (`true`) or stopped (`false`) showing this image
    pub fn set_display_state(&self, displayed: bool) {
        let mut state = self.lock();
        if displayed {
            state.display_refs += 1;
            state.displayed_once = true;
        } else if state.display_refs > 0 {
            state.display_refs -= 1;
        } else {
            tracing::warn!("Unbalanced display release for {}", self.key);
        }
        self.check_reuse(&state);
    }

    /// The memory cache started (`true`) or stopped (`false`) holding this image
    pub fn set_cache_state(&self, cached: bool) {
        let mut state = self.lock();
        state.cached = cached;
        self.check_reuse(&state);
    }

    pub fn display_ref_count(&self) -> u32 {
        self.lock().display_refs
    }

    pub fn is_cached(&self) -> bool {
        self.lock().cached
    }

    pub fn has_been_displayed(&self) -> bool {
        self.lock().displayed_once
    }

    /// Whether the pixels may be handed to the reuse pool right now
    pub fn is_reuse_eligible(&self) -> bool {
        self.eligible(&self.lock())
    }

    fn eligible(&self, state: &EntryState) -> bool {
        !state.cached && state.display_refs == 0 && state.displayed_once && self.pixels.is_valid()
    }

    fn check_reuse(&self, state: &EntryState) {
        let eligible = self.eligible(state);
        self.pixels.set_reusable(eligible);
        if eligible {
            tracing::trace!("Offering {} to the reuse pool", self.key);
            self.pool.offer(&self.pixels);
        }
    }

    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ImageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ImageEntry")
            .field("key", &self.key)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("animated", &self.animated)
            .field("display_refs", &state.display_refs)
            .field("cached", &state.cached)
            .field("displayed_once", &state.displayed_once)
            .finish()
    }
}
