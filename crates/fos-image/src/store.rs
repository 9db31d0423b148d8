//! Persistent tier contracts
//!
//! The pipeline consults a byte-addressed store on memory-cache misses and
//! keeps animated sources in a second blob store for replay. Both are owned
//! by the host; [`MemoryStore`] is a bounded in-process implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fos_gif::Bitmap;

use crate::{CacheKey, ImageFormat};

/// Byte-oriented key/value store with its own capacity policy
pub trait ByteStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Arc<[u8]>>;

    fn put(&self, key: &CacheKey, bytes: Arc<[u8]>);

    fn remove(&self, key: &CacheKey);

    fn clear(&self);
}

struct Stored {
    bytes: Arc<[u8]>,
    last_access: u64,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<CacheKey, Stored>,
    recency: BTreeMap<u64, CacheKey>,
    size: usize,
    access_counter: u64,
}

impl StoreState {
    fn touch(&mut self, key: &CacheKey) -> Option<Arc<[u8]>> {
        self.access_counter += 1;
        let tick = self.access_counter;
        let stored = self.entries.get_mut(key)?;
        self.recency.remove(&stored.last_access);
        stored.last_access = tick;
        self.recency.insert(tick, key.clone());
        Some(stored.bytes.clone())
    }

    fn take(&mut self, key: &CacheKey) -> Option<Stored> {
        let stored = self.entries.remove(key)?;
        self.recency.remove(&stored.last_access);
        self.size -= stored.bytes.len();
        Some(stored)
    }
}

/// In-memory LRU byte store bounded by total payload size
pub struct MemoryStore {
    max_bytes: usize,
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total stored payload bytes
    pub fn size(&self) -> usize {
        self.lock().size
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ByteStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Option<Arc<[u8]>> {
        self.lock().touch(key)
    }

    fn put(&self, key: &CacheKey, bytes: Arc<[u8]>) {
        if bytes.len() > self.max_bytes {
            tracing::debug!("Not storing {}: {} bytes exceeds store size", key, bytes.len());
            return;
        }
        let mut state = self.lock();
        state.take(key);

        state.access_counter += 1;
        let tick = state.access_counter;
        state.size += bytes.len();
        state.recency.insert(tick, key.clone());
        state.entries.insert(key.clone(), Stored { bytes, last_access: tick });

        while state.size > self.max_bytes {
            let Some((_, oldest)) = state.recency.pop_first() else {
                break;
            };
            if let Some(stored) = state.entries.remove(&oldest) {
                state.size -= stored.bytes.len();
                tracing::trace!("Store evicted {}", oldest);
            }
        }
    }

    fn remove(&self, key: &CacheKey) {
        self.lock().take(key);
    }

    fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.recency.clear();
        state.size = 0;
    }
}

const RECORD_MAGIC: &[u8; 4] = b"FOSB";
const RECORD_HEADER: usize = 4 + 1 + 1 + 4 * 6 + 2;
const FLAG_ANIMATED: u8 = 0x01;
const FLAG_LOOPS: u8 = 0x02;

/// A decoded first frame as kept in the persistent tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapRecord {
    pub bitmap: Bitmap,
    pub format: ImageFormat,
    pub source_width: u32,
    pub source_height: u32,
    pub sample_size: u32,
    /// 0 when unknown
    pub frame_count: u32,
    pub animated: bool,
    pub loop_count: Option<u16>,
}

impl BitmapRecord {
    /// Serialize as a little-endian record
    pub fn encode(&self) -> Vec<u8> {
        let pixels = self.bitmap.pixels();
        let mut out = Vec::with_capacity(RECORD_HEADER + pixels.len() * 4);
        out.extend_from_slice(RECORD_MAGIC);
        let mut flags = 0;
        if self.animated {
            flags |= FLAG_ANIMATED;
        }
        if self.loop_count.is_some() {
            flags |= FLAG_LOOPS;
        }
        out.push(flags);
        out.push(self.format.code());
        for v in [
            self.bitmap.width(),
            self.bitmap.height(),
            self.source_width,
            self.source_height,
            self.sample_size,
            self.frame_count,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.loop_count.unwrap_or(0).to_le_bytes());
        for pixel in pixels {
            out.extend_from_slice(&pixel.to_le_bytes());
        }
        out
    }

    /// Parse a record, rejecting anything malformed
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_HEADER || &bytes[..4] != RECORD_MAGIC {
            return None;
        }
        let flags = bytes[4];
        let format = ImageFormat::from_code(bytes[5]);
        let word = |i: usize| {
            let at = 6 + i * 4;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let (width, height) = (word(0), word(1));
        let loop_count = u16::from_le_bytes([bytes[RECORD_HEADER - 2], bytes[RECORD_HEADER - 1]]);

        let body = &bytes[RECORD_HEADER..];
        let len = (width as usize).checked_mul(height as usize)?;
        if body.len() != len.checked_mul(4)? {
            return None;
        }
        let pixels = body
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Some(Self {
            bitmap: Bitmap::from_pixels(width, height, pixels),
            format,
            source_width: word(2),
            source_height: word(3),
            sample_size: word(4).max(1),
            frame_count: word(5),
            animated: flags & FLAG_ANIMATED != 0,
            loop_count: (flags & FLAG_LOOPS != 0).then_some(loop_count),
        })
    }
}
