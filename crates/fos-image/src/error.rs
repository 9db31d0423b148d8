//! Load errors and their categories

use std::io;

use fos_gif::GifError;

use crate::ImageFormat;

/// Fetcher failure
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The fetcher cannot resolve this kind of source
    #[error("Unsupported source: {0}")]
    Unsupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fetch failed: {0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse classification of a [`LoadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad signature, missing color table or an unsupported format
    Recognition,
    /// The stream ended before enough frames were decoded
    Truncation,
    /// Table overflow, allocation failure or a full queue
    ResourceExhaustion,
    /// Transport or filesystem failure; callers may retry
    Io,
    /// Shutdown or a worker fault
    Internal,
}

/// Image load error
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Decode failed: {0}")]
    Decode(GifError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(ImageFormat),

    #[error("Decode queue is full")]
    QueueFull,

    #[error("Image loader is shut down")]
    Shutdown,

    #[error("Decode worker panicked: {0}")]
    WorkerPanic(String),
}

impl From<GifError> for LoadError {
    fn from(e: GifError) -> Self {
        match e {
            GifError::Io(io) => Self::Io(io),
            other => Self::Decode(other),
        }
    }
}

impl LoadError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode(e) => match e {
                GifError::Truncated { .. } => ErrorCategory::Truncation,
                GifError::TableOverflow | GifError::OutOfMemory { .. } => ErrorCategory::ResourceExhaustion,
                GifError::Io(_) => ErrorCategory::Io,
                GifError::NotRecognized | GifError::MissingColorTable | GifError::Malformed(_) => {
                    ErrorCategory::Recognition
                }
            },
            Self::Io(_) | Self::Fetch(_) => ErrorCategory::Io,
            Self::UnsupportedFormat(_) => ErrorCategory::Recognition,
            Self::QueueFull => ErrorCategory::ResourceExhaustion,
            Self::Shutdown | Self::WorkerPanic(_) => ErrorCategory::Internal,
        }
    }

    /// I/O and fetch failures are worth another attempt; decode failures are not
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Io
    }
}
