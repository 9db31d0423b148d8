//! Frame codecs
//!
//! Workers decode through [`FrameCodec`] without knowing the format; GIF is
//! the one registered implementation.

use std::io::{Read, Seek};
use std::sync::Arc;

use fos_gif::{DecodeOptions, GifStream, Step};

use crate::{ImageFormat, LoadError};

/// Seekable byte source a codec can own
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Lazy sequence of composited frames
pub trait FrameStream: Send {
    fn next_frame(&mut self) -> Result<Step<'_>, LoadError>;

    /// Logical screen size
    fn dimensions(&self) -> (u32, u32);

    /// Frames per pass, once known
    fn frame_count(&self) -> Option<usize>;

    fn loop_count(&self) -> Option<u16>;
}

/// Decoder for one image format
pub trait FrameCodec: Send + Sync {
    fn format(&self) -> ImageFormat;

    fn open(&self, source: Box<dyn ReadSeek>, options: DecodeOptions) -> Result<Box<dyn FrameStream>, LoadError>;
}

impl<R: Read + Seek + Send> FrameStream for GifStream<R> {
    fn next_frame(&mut self) -> Result<Step<'_>, LoadError> {
        GifStream::next_frame(self).map_err(LoadError::from)
    }

    fn dimensions(&self) -> (u32, u32) {
        let screen = self.screen();
        (screen.width as u32, screen.height as u32)
    }

    fn frame_count(&self) -> Option<usize> {
        GifStream::frame_count(self)
    }

    fn loop_count(&self) -> Option<u16> {
        GifStream::loop_count(self)
    }
}

/// GIF87a/GIF89a codec
#[derive(Debug, Clone, Copy, Default)]
pub struct GifCodec;

impl FrameCodec for GifCodec {
    fn format(&self) -> ImageFormat {
        ImageFormat::Gif
    }

    fn open(&self, source: Box<dyn ReadSeek>, options: DecodeOptions) -> Result<Box<dyn FrameStream>, LoadError> {
        let stream = fos_gif::decode(source, options)?;
        Ok(Box::new(stream))
    }
}

/// Codecs by format
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn FrameCodec>>,
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Register a codec; a later registration for the same format wins
    pub fn register(&mut self, codec: Arc<dyn FrameCodec>) {
        self.codecs.retain(|c| c.format() != codec.format());
        self.codecs.push(codec);
    }

    pub fn find(&self, format: ImageFormat) -> Option<&Arc<dyn FrameCodec>> {
        self.codecs.iter().find(|c| c.format() == format)
    }

    /// Look up the codec for `format` and open `source` with it
    pub fn open(
        &self,
        format: ImageFormat,
        source: Box<dyn ReadSeek>,
        options: DecodeOptions,
    ) -> Result<Box<dyn FrameStream>, LoadError> {
        let codec = self.find(format).ok_or(LoadError::UnsupportedFormat(format))?;
        codec.open(source, options)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(GifCodec));
        registry
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.codecs.iter().map(|c| c.format())).finish()
    }
}
