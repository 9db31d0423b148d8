//! Bounds-driven subsampling

use fos_gif::{allocate_pixels, Bitmap, GifError, PixelAllocator};

/// Largest power-of-two factor that keeps the image at least `max_width` by
/// `max_height`. A zero bound leaves that axis unconstrained.
pub fn sample_size(width: u32, height: u32, max_width: u32, max_height: u32) -> u32 {
    if max_width == 0 && max_height == 0 {
        return 1;
    }
    let (half_width, half_height) = (width / 2, height / 2);
    let mut sample = 1u32;
    while sample < 1 << 16 && half_width / sample >= max_width && half_height / sample >= max_height {
        sample *= 2;
    }
    sample
}

/// Output dimensions for a given sample size
pub fn sampled_dimensions(width: u32, height: u32, sample: u32) -> (u32, u32) {
    let sample = sample.max(1);
    ((width / sample).max(1), (height / sample).max(1))
}

/// Nearest-neighbour subsample of `source` into a buffer from `allocator`
pub fn subsample(source: &Bitmap, sample: u32, allocator: &dyn PixelAllocator) -> Result<Bitmap, GifError> {
    let (width, height) = sampled_dimensions(source.width(), source.height(), sample);
    let mut pixels = allocate_pixels(allocator, width, height)?;
    subsample_into(source, sample, width, &mut pixels);
    Ok(Bitmap::from_pixels(width, height, pixels))
}

/// Subsample into an existing bitmap, reusing its storage
pub fn subsample_reuse(source: &Bitmap, sample: u32, target: &mut Bitmap) {
    let (width, height) = sampled_dimensions(source.width(), source.height(), sample);
    let mut pixels = std::mem::take(target).into_pixels();
    pixels.clear();
    pixels.resize(width as usize * height as usize, 0);
    subsample_into(source, sample, width, &mut pixels);
    *target = Bitmap::from_pixels(width, height, pixels);
}

fn subsample_into(source: &Bitmap, sample: u32, width: u32, out: &mut [u32]) {
    let sample = sample.max(1) as usize;
    let src = source.pixels();
    let src_width = source.width() as usize;
    for (y, row) in out.chunks_exact_mut(width as usize).enumerate() {
        let src_row = y * sample * src_width;
        for (x, pixel) in row.iter_mut().enumerate() {
            *pixel = src[src_row + x * sample];
        }
    }
}
