//! Shared pipeline services
//!
//! One [`ImageContext`] is shared by the coordinator and every worker. It
//! owns the reuse pool, the scratch pool, both persistent stores, the
//! fetcher and the codec registry.

use std::sync::Arc;

use fos_gif::{CancelToken, DecodeOptions, ScratchPool};

use crate::codec::{CodecRegistry, FrameCodec};
use crate::fetch::{Fetcher, LocalFetcher};
use crate::store::{ByteStore, MemoryStore};
use crate::{ImageConfig, ReusePool};

/// Default bound for the in-process persistent tier
const DEFAULT_PERSISTENT_BYTES: usize = 64 * 1024 * 1024;
/// Default bound for retained animated sources
const DEFAULT_BLOB_BYTES: usize = 16 * 1024 * 1024;

pub struct ImageContext {
    config: ImageConfig,
    pool: ReusePool,
    scratch: Arc<ScratchPool>,
    fetcher: Arc<dyn Fetcher>,
    persistent: Arc<dyn ByteStore>,
    blobs: Arc<dyn ByteStore>,
    codecs: CodecRegistry,
}

impl ImageContext {
    /// Context with the local fetcher and in-memory stores
    pub fn new(config: ImageConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ImageConfig) -> ImageContextBuilder {
        ImageContextBuilder {
            config,
            fetcher: None,
            persistent: None,
            blobs: None,
            codecs: CodecRegistry::default(),
        }
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn pool(&self) -> &ReusePool {
        &self.pool
    }

    pub fn scratch(&self) -> &Arc<ScratchPool> {
        &self.scratch
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    /// Decoded first frames keyed by cache key
    pub fn persistent(&self) -> &Arc<dyn ByteStore> {
        &self.persistent
    }

    /// Raw sources of animated images, for replay
    pub fn blobs(&self) -> &Arc<dyn ByteStore> {
        &self.blobs
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    /// Decode options drawing buffers from this context's pools
    pub fn decode_options(&self, cancel: CancelToken, pacing: bool) -> DecodeOptions {
        DecodeOptions {
            allocator: Arc::new(self.pool.clone()),
            scratch: self.scratch.clone(),
            cancel,
            pacing,
        }
    }
}

impl std::fmt::Debug for ImageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageContext")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("codecs", &self.codecs)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ImageContext`]
pub struct ImageContextBuilder {
    config: ImageConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    persistent: Option<Arc<dyn ByteStore>>,
    blobs: Option<Arc<dyn ByteStore>>,
    codecs: CodecRegistry,
}

impl ImageContextBuilder {
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn persistent_store(mut self, store: Arc<dyn ByteStore>) -> Self {
        self.persistent = Some(store);
        self
    }

    pub fn blob_store(mut self, store: Arc<dyn ByteStore>) -> Self {
        self.blobs = Some(store);
        self
    }

    /// Register an extra codec, replacing any for the same format
    pub fn codec(mut self, codec: Arc<dyn FrameCodec>) -> Self {
        self.codecs.register(codec);
        self
    }

    pub fn build(self) -> Arc<ImageContext> {
        let config = self.config;
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(LocalFetcher::new(config.resource_dir.clone())));
        let persistent = self
            .persistent
            .unwrap_or_else(|| Arc::new(MemoryStore::new(DEFAULT_PERSISTENT_BYTES)));
        let blobs = self
            .blobs
            .unwrap_or_else(|| Arc::new(MemoryStore::new(DEFAULT_BLOB_BYTES)));

        Arc::new(ImageContext {
            pool: ReusePool::new(config.reuse_mode, config.pool_max_retained),
            scratch: Arc::new(ScratchPool::new()),
            fetcher,
            persistent,
            blobs,
            codecs: self.codecs,
            config,
        })
    }
}
