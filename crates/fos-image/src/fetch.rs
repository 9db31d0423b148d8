//! Source fetching
//!
//! Transport, retries and timeouts belong to the host's [`Fetcher`]. The
//! bundled [`LocalFetcher`] resolves files and bundled resources only.

use std::path::PathBuf;
use std::sync::Arc;

use fos_gif::CancelToken;

use crate::{FetchError, ImageSource};

/// Fetched image data
#[derive(Debug, Clone)]
pub enum Fetched {
    /// Whole payload in memory
    Bytes(Arc<[u8]>),
    /// A local file to read from
    File(PathBuf),
}

/// Resolves a source to bytes or a file, on a worker thread
pub trait Fetcher: Send + Sync {
    /// `cancel` fires when nobody wants the result any more
    fn fetch(&self, source: &ImageSource, cancel: &CancelToken) -> Result<Fetched, FetchError>;
}

/// Filesystem fetcher for `File` and `Resource` sources
#[derive(Debug, Clone, Default)]
pub struct LocalFetcher {
    resource_dir: Option<PathBuf>,
}

impl LocalFetcher {
    pub fn new(resource_dir: Option<PathBuf>) -> Self {
        Self { resource_dir }
    }

    fn resolve(&self, source: &ImageSource) -> Result<PathBuf, FetchError> {
        match source {
            ImageSource::File(path) => Ok(path.clone()),
            ImageSource::Resource(name) => {
                let dir = self
                    .resource_dir
                    .as_ref()
                    .ok_or_else(|| FetchError::Unsupported(format!("no resource directory for {}", name)))?;
                let relative = PathBuf::from(name);
                if relative.is_absolute() || relative.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
                    return Err(FetchError::NotFound(name.clone()));
                }
                Ok(dir.join(relative))
            }
            ImageSource::Network(url) => Err(FetchError::Unsupported(url.clone())),
        }
    }
}

impl Fetcher for LocalFetcher {
    fn fetch(&self, source: &ImageSource, _cancel: &CancelToken) -> Result<Fetched, FetchError> {
        let path = self.resolve(source)?;
        if !path.is_file() {
            return Err(FetchError::NotFound(path.display().to_string()));
        }
        tracing::trace!("Resolved {} to {}", source, path.display());
        Ok(Fetched::File(path))
    }
}
