//! Source descriptors and cache keys

use std::fmt;
use std::path::PathBuf;

/// Where an image comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageSource {
    /// URL handed to the host's fetcher
    Network(String),
    /// Local file path
    File(PathBuf),
    /// Name of a bundled resource
    Resource(String),
}

impl ImageSource {
    pub fn network(url: impl Into<String>) -> Self {
        Self::Network(url.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn resource(name: impl Into<String>) -> Self {
        Self::Resource(name.into())
    }

    /// Stable identity string, unique across source kinds
    pub fn identity(&self) -> String {
        match self {
            Self::Network(url) => format!("net:{}", url),
            Self::File(path) => format!("file:{}", path.display()),
            Self::Resource(name) => format!("res:{}", name),
        }
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

/// A source plus the bounds it is decoded for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub source: ImageSource,
    /// Target width (0 = unbounded)
    pub max_width: u32,
    /// Target height (0 = unbounded)
    pub max_height: u32,
}

impl SourceKey {
    pub fn new(source: ImageSource, max_width: u32, max_height: u32) -> Self {
        Self { source, max_width, max_height }
    }

    /// Key for the image at its original size
    pub fn original(source: ImageSource) -> Self {
        Self::new(source, 0, 0)
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey(format!("{}@{}x{}", self.source.identity(), self.max_width, self.max_height))
    }
}

/// Deterministic identity string for a (source, bounds) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&SourceKey> for CacheKey {
    fn from(key: &SourceKey) -> Self {
        key.cache_key()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
