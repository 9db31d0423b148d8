//! fOS GIF
//!
//! Streaming animated GIF decoder for the fOS image pipeline.
//!
//! Features:
//! - Variable-width LZW decompression with a fixed 4096-entry table
//! - Frame compositing with all four disposal methods and interlacing
//! - Looping-control extension support with lazy frame counting
//! - Pluggable pixel allocation for canvas reuse
//! - Cooperative cancellation and optional frame pacing

pub mod bitmap;
pub mod cancel;
pub mod compositor;
pub mod decoder;
pub mod frame;
pub mod lzw;
pub mod reader;
pub mod scratch;

mod error;

#[cfg(any(test, feature = "test-support"))]
pub mod encoder;

pub use bitmap::{allocate_pixels, Bitmap, HeapAllocator, PixelAllocator, OPAQUE_BLACK};
pub use cancel::CancelToken;
pub use decoder::{decode, DecodeOptions, Frame, GifStream, ScreenDescriptor, Step};
pub use error::GifError;
pub use frame::{Disposal, GifFrame, MIN_FRAME_DELAY_MS};
pub use scratch::ScratchPool;

/// Whether `bytes` begin with a GIF signature
pub fn is_gif(bytes: &[u8]) -> bool {
    bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a")
}
