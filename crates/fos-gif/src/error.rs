//! GIF decoding errors

use std::io;

/// GIF decoding error
#[derive(Debug, thiserror::Error)]
pub enum GifError {
    /// The stream does not start with the `GIF` signature
    #[error("Not a GIF stream")]
    NotRecognized,

    /// The logical screen declares no global color table
    #[error("GIF has no global color table")]
    MissingColorTable,

    /// The stream ended before enough frames were decoded
    #[error("Truncated GIF: {frames} frame(s) decoded")]
    Truncated { frames: usize },

    #[error("Malformed GIF: {0}")]
    Malformed(&'static str),

    /// A code arrived for a full 4096-entry table without a clear code
    #[error("LZW table overflow")]
    TableOverflow,

    #[error("Out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl GifError {
    /// I/O faults are reported separately from decode faults so callers can retry them
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Table overflow or allocation failure
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, Self::TableOverflow | Self::OutOfMemory { .. })
    }

    pub(crate) fn is_unexpected_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}
