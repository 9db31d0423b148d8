//! fOS Image
//!
//! Image loading for fOS Engine: single-flight requests with batched
//! delivery, a memory cache backed by persistent stores, and pixel buffer
//! reuse.
//!
//! Features:
//! - One in-flight load per (source, bounds) key, shared by every requester
//! - Results delivered in coalesced batches on the owner thread
//! - Byte-bounded LRU memory cache with display reference counting
//! - Reuse pool recycling pixels of images nobody shows any more
//! - Animated GIF playback on a dedicated worker

pub mod cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod entry;
pub mod fetch;
pub mod format;
pub mod key;
pub mod loader;
pub mod playback;
pub mod pool;
pub mod queue;
pub mod sample;
pub mod store;

mod error;
mod worker;

pub use cache::{CacheStats, MemoryCache};
pub use codec::{CodecRegistry, FrameCodec, FrameStream, GifCodec, ReadSeek};
pub use config::ImageConfig;
pub use context::{ImageContext, ImageContextBuilder};
pub use entry::{DecodedImage, ImageEntry};
pub use error::{ErrorCategory, FetchError, LoadError};
pub use fetch::{Fetched, Fetcher, LocalFetcher};
pub use format::{decode_format, decode_format_file, ImageFormat};
pub use key::{CacheKey, ImageSource, SourceKey};
pub use loader::{Delivery, ImageLoader, LoadEvent, LoaderStats, RequestHandle};
pub use playback::{AnimationFrame, AnimationHandle, FrameSink};
pub use pool::{PoolStats, PooledBitmap, ReuseMode, ReusePool};
pub use queue::DecodeQueue;
pub use sample::{sample_size, sampled_dimensions};
pub use store::{BitmapRecord, ByteStore, MemoryStore};

pub use fos_gif::{Bitmap, CancelToken};
