//! Pixel buffers and the allocation seam used by decode sessions.

use crate::GifError;

/// Fully opaque black, the color of unused palette slots
pub const OPAQUE_BLACK: u32 = 0xFF00_0000;

/// ARGB bitmap (`0xAARRGGBB` per pixel, row-major)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl Bitmap {
    /// Create a transparent bitmap
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Wrap an existing pixel vector. `pixels` must hold exactly `width * height` entries.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u32>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize);
        Self { width, height, pixels }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<u32> {
        self.pixels
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }

    /// Allocated footprint in bytes
    pub fn byte_count(&self) -> usize {
        self.pixels.capacity() * 4
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Source of pixel storage for decode sessions.
///
/// Sessions acquire their canvases here and hand them back when they end.
/// A `None` from `acquire` falls back to a fresh allocation.
pub trait PixelAllocator: Send + Sync {
    /// Offer a previously released buffer able to hold `width * height` pixels
    fn acquire(&self, width: u32, height: u32) -> Option<Vec<u32>>;

    /// Hand back a buffer that last held a `width * height` image
    fn release(&self, width: u32, height: u32, pixels: Vec<u32>);
}

/// Allocator that never reuses anything
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl PixelAllocator for HeapAllocator {
    fn acquire(&self, _width: u32, _height: u32) -> Option<Vec<u32>> {
        None
    }

    fn release(&self, _width: u32, _height: u32, _pixels: Vec<u32>) {}
}

/// Allocate a zeroed `width * height` buffer, preferring one the allocator offers
pub fn allocate_pixels(
    allocator: &dyn PixelAllocator,
    width: u32,
    height: u32,
) -> Result<Vec<u32>, GifError> {
    let len = width as usize * height as usize;
    let mut pixels = allocator.acquire(width, height).unwrap_or_default();
    pixels.clear();
    pixels
        .try_reserve_exact(len)
        .map_err(|_| GifError::OutOfMemory { bytes: len.saturating_mul(4) })?;
    pixels.resize(len, 0);
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct OneShot(Mutex<Option<Vec<u32>>>);

    impl PixelAllocator for OneShot {
        fn acquire(&self, _width: u32, _height: u32) -> Option<Vec<u32>> {
            self.0.lock().unwrap().take()
        }

        fn release(&self, _width: u32, _height: u32, pixels: Vec<u32>) {
            *self.0.lock().unwrap() = Some(pixels);
        }
    }

    #[test]
    fn test_get_pixel() {
        let mut bitmap = Bitmap::new(4, 2);
        bitmap.pixels_mut()[5] = 0xFFFF_0000;
        assert_eq!(bitmap.get_pixel(1, 1), Some(0xFFFF_0000));
        assert_eq!(bitmap.get_pixel(4, 0), None);
    }

    #[test]
    fn test_allocate_reuses_and_zeroes() {
        let stale = vec![7u32; 64];
        let ptr = stale.as_ptr();
        let allocator = OneShot(Mutex::new(Some(stale)));

        let pixels = allocate_pixels(&allocator, 4, 4).unwrap();
        assert_eq!(pixels.len(), 16);
        assert!(pixels.iter().all(|&p| p == 0));
        assert_eq!(pixels.as_ptr(), ptr);
    }

    #[test]
    fn test_heap_allocator_fresh() {
        let pixels = allocate_pixels(&HeapAllocator, 3, 3).unwrap();
        assert_eq!(pixels, vec![0; 9]);
    }
}
