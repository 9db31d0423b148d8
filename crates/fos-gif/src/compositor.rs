//! Frame compositing
//!
//! Keeps two full-screen buffers: `current` (the composited output) and
//! `saved` (the snapshot restored by restore-to-previous disposal).

use crate::{Bitmap, Disposal, GifFrame};

/// (first line, stride) for each of the four interlace passes
const INTERLACE_PASSES: [(usize, usize); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];

/// Map the `row`-th decoded row of a frame to its line within the frame
pub fn frame_line(row: usize, height: usize, interlaced: bool) -> usize {
    if !interlaced {
        return row;
    }
    let mut remaining = row;
    for (start, stride) in INTERLACE_PASSES {
        let count = if height > start { (height - start).div_ceil(stride) } else { 0 };
        if remaining < count {
            return start + remaining * stride;
        }
        remaining -= count;
    }
    height
}

/// Current and saved screen buffers for one decode session
pub struct Canvas {
    current: Bitmap,
    saved: Vec<u32>,
}

impl Canvas {
    pub fn new(current: Bitmap, saved: Vec<u32>) -> Self {
        debug_assert_eq!(current.pixels().len(), saved.len());
        Self { current, saved }
    }

    pub fn current(&self) -> &Bitmap {
        &self.current
    }

    pub fn width(&self) -> u32 {
        self.current.width()
    }

    pub fn height(&self) -> u32 {
        self.current.height()
    }

    /// Write one row of palette indices at `line` within `frame`.
    /// Transparent indices leave prior content in place.
    pub fn blit_row(&mut self, frame: &GifFrame, line: usize, indices: &[u8], colors: &[u32; 256]) {
        let width = self.current.width() as usize;
        let y = frame.y as usize + line;
        if y >= self.current.height() as usize || line >= frame.height as usize {
            return;
        }
        let transparent = frame.transparent();
        let start = y * width;
        let pixels = self.current.pixels_mut();
        for (i, &index) in indices.iter().enumerate() {
            let x = frame.x as usize + i;
            if x >= width {
                break;
            }
            if Some(index) == transparent {
                continue;
            }
            pixels[start + x] = colors[index as usize];
        }
    }

    /// Apply `frame`'s disposal to its region
    pub fn dispose(&mut self, frame: &GifFrame, background: u32) {
        match frame.disposal() {
            Disposal::Unspecified | Disposal::DoNotDispose => self.save_region(frame),
            Disposal::RestoreBackground if background >> 24 == 0 => self.save_region(frame),
            Disposal::RestoreBackground => self.fill_region(frame, background),
            Disposal::RestorePrevious => self.restore_region(frame),
        }
    }

    /// Clipped (x0, y0, x1, y1) of the frame on the screen
    fn region(&self, frame: &GifFrame) -> (usize, usize, usize, usize) {
        let width = self.current.width() as usize;
        let height = self.current.height() as usize;
        let x0 = (frame.x as usize).min(width);
        let y0 = (frame.y as usize).min(height);
        let x1 = (frame.x as usize + frame.width as usize).min(width);
        let y1 = (frame.y as usize + frame.height as usize).min(height);
        (x0, y0, x1, y1)
    }

    fn save_region(&mut self, frame: &GifFrame) {
        let (x0, y0, x1, y1) = self.region(frame);
        let width = self.current.width() as usize;
        let current = self.current.pixels();
        for y in y0..y1 {
            let row = y * width;
            self.saved[row + x0..row + x1].copy_from_slice(&current[row + x0..row + x1]);
        }
    }

    fn restore_region(&mut self, frame: &GifFrame) {
        let (x0, y0, x1, y1) = self.region(frame);
        let width = self.current.width() as usize;
        let current = self.current.pixels_mut();
        for y in y0..y1 {
            let row = y * width;
            current[row + x0..row + x1].copy_from_slice(&self.saved[row + x0..row + x1]);
        }
    }

    fn fill_region(&mut self, frame: &GifFrame, color: u32) {
        let (x0, y0, x1, y1) = self.region(frame);
        let width = self.current.width() as usize;
        let current = self.current.pixels_mut();
        for y in y0..y1 {
            let row = y * width;
            current[row + x0..row + x1].fill(color);
        }
    }

    /// Hand both buffers back, leaving the canvas empty
    pub fn take_buffers(&mut self) -> (Vec<u32>, Vec<u32>) {
        let current = std::mem::take(&mut self.current).into_pixels();
        (current, std::mem::take(&mut self.saved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: u32 = 0xFFFF_0000;
    const BLUE: u32 = 0xFF00_00FF;

    fn palette() -> [u32; 256] {
        let mut colors = [0xFF00_0000; 256];
        colors[1] = RED;
        colors[2] = BLUE;
        colors
    }

    fn canvas(width: u32, height: u32) -> Canvas {
        let n = (width * height) as usize;
        Canvas::new(Bitmap::from_pixels(width, height, vec![0; n]), vec![0; n])
    }

    #[test]
    fn test_interlace_order() {
        let lines: Vec<usize> = (0..8).map(|r| frame_line(r, 8, true)).collect();
        assert_eq!(lines, vec![0, 4, 2, 6, 1, 3, 5, 7]);

        let lines: Vec<usize> = (0..5).map(|r| frame_line(r, 5, true)).collect();
        assert_eq!(lines, vec![0, 4, 2, 1, 3]);

        assert_eq!(frame_line(3, 8, false), 3);
    }

    #[test]
    fn test_blit_clips_and_skips_transparent() {
        let mut c = canvas(4, 2);
        let frame = GifFrame {
            x: 2,
            width: 3,
            height: 1,
            graphic_packed: 0x01,
            transparent_index: 0,
            ..Default::default()
        };
        c.blit_row(&frame, 0, &[1, 0, 2], &palette());
        assert_eq!(c.current().pixels()[..4], [0, 0, RED, 0]);
    }

    #[test]
    fn test_restore_previous() {
        let mut c = canvas(2, 1);
        let full = GifFrame { width: 2, height: 1, ..Default::default() };
        c.blit_row(&full, 0, &[1, 1], &palette());
        c.dispose(&full, 0);

        let overlay = GifFrame { width: 1, height: 1, graphic_packed: 3 << 2, ..Default::default() };
        c.blit_row(&overlay, 0, &[2], &palette());
        assert_eq!(c.current().pixels(), &[BLUE, RED]);
        c.dispose(&overlay, 0);
        assert_eq!(c.current().pixels(), &[RED, RED]);
    }

    #[test]
    fn test_restore_background() {
        let mut c = canvas(2, 2);
        let frame = GifFrame { x: 1, width: 1, height: 2, graphic_packed: 2 << 2, ..Default::default() };
        c.blit_row(&frame, 0, &[1], &palette());
        c.blit_row(&frame, 1, &[1], &palette());
        c.dispose(&frame, BLUE);
        assert_eq!(c.current().pixels(), &[0, BLUE, 0, BLUE]);
    }

    #[test]
    fn test_transparent_background_keeps_frame() {
        let mut c = canvas(1, 1);
        let frame = GifFrame { width: 1, height: 1, graphic_packed: 2 << 2, ..Default::default() };
        c.blit_row(&frame, 0, &[1], &palette());
        c.dispose(&frame, 0);
        assert_eq!(c.current().pixels(), &[RED]);
        assert_eq!(c.saved, vec![RED]);
    }
}
