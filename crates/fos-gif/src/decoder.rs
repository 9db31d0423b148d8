//! GIF Frame Stream (GIF89a/GIF87a)
//!
//! A decode session turns a byte source into a lazy sequence of fully
//! composited frames. Streams with a looping extension rewind to the first
//! frame when they reach the trailer, so a `loop = 0` stream never finishes
//! on its own; cancel it through the session's [`CancelToken`].

use std::io::{Read, Seek};
use std::sync::Arc;
use std::time::Duration;

use crate::bitmap::{allocate_pixels, OPAQUE_BLACK};
use crate::compositor::{frame_line, Canvas};
use crate::lzw::{LzwDecoder, LzwEnd};
use crate::reader::ByteReader;
use crate::{Bitmap, CancelToken, Disposal, GifError, GifFrame, HeapAllocator, PixelAllocator, ScratchPool};

const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_SEPARATOR: u8 = 0x2C;
const TRAILER: u8 = 0x3B;

const GRAPHIC_CONTROL_LABEL: u8 = 0xF9;
const APPLICATION_LABEL: u8 = 0xFF;

const LOOPING_SIGNATURES: [&[u8; 11]; 2] = [b"NETSCAPE2.0", b"ANIMEXTS1.0"];

/// Per-session collaborators and switches
#[derive(Clone)]
pub struct DecodeOptions {
    pub allocator: Arc<dyn PixelAllocator>,
    pub scratch: Arc<ScratchPool>,
    pub cancel: CancelToken,
    /// Sleep each frame's delay before producing the next one
    pub pacing: bool,
}

impl DecodeOptions {
    pub fn with_allocator(mut self, allocator: Arc<dyn PixelAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_scratch(mut self, scratch: Arc<ScratchPool>) -> Self {
        self.scratch = scratch;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_pacing(mut self, pacing: bool) -> Self {
        self.pacing = pacing;
        self
    }
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            allocator: Arc::new(HeapAllocator),
            scratch: Arc::new(ScratchPool::new()),
            cancel: CancelToken::new(),
            pacing: false,
        }
    }
}

impl std::fmt::Debug for DecodeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeOptions")
            .field("canceled", &self.cancel.is_canceled())
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}

/// Logical screen descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenDescriptor {
    pub width: u16,
    pub height: u16,
    pub packed: u8,
    pub background_index: u8,
    pub aspect_ratio: u8,
}

impl ScreenDescriptor {
    pub fn has_global_table(&self) -> bool {
        self.packed & 0x80 != 0
    }

    pub fn global_table_len(&self) -> usize {
        2 << (self.packed & 0x07)
    }
}

/// A composited frame, borrowed from the session
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Position within the current pass
    pub index: usize,
    /// `None` until the first pass has reached the trailer
    pub frame_count: Option<usize>,
    pub delay: Duration,
    pub disposal: Disposal,
    pub bitmap: &'a Bitmap,
}

/// Outcome of advancing a session
#[derive(Debug)]
pub enum Step<'a> {
    Frame(Frame<'a>),
    /// The stream played out every pass
    Finished,
    /// The session's token fired
    Canceled,
}

enum Event {
    FrameReady,
    Trailer,
    Unrecognized(u8),
    EndOfInput,
    Canceled,
}

/// Open a decode session over `source`
pub fn decode<R: Read + Seek>(source: R, options: DecodeOptions) -> Result<GifStream<R>, GifError> {
    GifStream::open(source, options)
}

/// One decode session. Not restartable: open a new session to replay.
pub struct GifStream<R> {
    reader: ByteReader<R>,
    options: DecodeOptions,
    screen: ScreenDescriptor,
    global: Box<[u32; 256]>,
    local: Box<[u32; 256]>,
    canvas: Canvas,
    row: Vec<u8>,
    lzw: LzwDecoder,
    first_frame_offset: u64,
    frame_pointer: usize,
    frame_count: Option<usize>,
    loop_count: Option<u16>,
    passes: u32,
    /// Graphic control for the next image
    control: GifFrame,
    /// Frame whose disposal runs before the next one is composited
    last_frame: Option<GifFrame>,
    pending_delay: Option<Duration>,
    finished: bool,
    /// Canvases of a failed session are dropped instead of handed back
    failed: bool,
}

impl<R: Read + Seek> GifStream<R> {
    pub fn open(source: R, options: DecodeOptions) -> Result<Self, GifError> {
        let mut reader = ByteReader::new(source, options.scratch.clone());

        let mut signature = [0u8; 6];
        match reader.read_exact(&mut signature) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(GifError::NotRecognized),
            Err(e) => return Err(e.into()),
        }
        if &signature[..3] != b"GIF" {
            return Err(GifError::NotRecognized);
        }

        let screen = read_screen(&mut reader).map_err(|e| {
            if e.is_unexpected_eof() { GifError::Truncated { frames: 0 } } else { e }
        })?;
        if screen.width == 0 || screen.height == 0 {
            return Err(GifError::Malformed("empty logical screen"));
        }
        if !screen.has_global_table() {
            return Err(GifError::MissingColorTable);
        }

        let mut global = Box::new([OPAQUE_BLACK; 256]);
        read_color_table(&mut reader, screen.global_table_len(), &mut global).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof { GifError::Truncated { frames: 0 } } else { e.into() }
        })?;

        let (width, height) = (screen.width as u32, screen.height as u32);
        let current = allocate_pixels(&*options.allocator, width, height)?;
        let saved = match allocate_pixels(&*options.allocator, width, height) {
            Ok(saved) => saved,
            Err(e) => {
                options.allocator.release(width, height, current);
                return Err(e);
            }
        };
        let canvas = Canvas::new(Bitmap::from_pixels(width, height, current), saved);
        let row = options.scratch.take(width as usize);
        let first_frame_offset = reader.position();

        tracing::debug!(
            "Opened GIF {}x{} with {} global colors",
            width,
            height,
            screen.global_table_len()
        );

        Ok(Self {
            reader,
            options,
            screen,
            global,
            local: Box::new([OPAQUE_BLACK; 256]),
            canvas,
            row,
            lzw: LzwDecoder::new(),
            first_frame_offset,
            frame_pointer: 0,
            frame_count: None,
            loop_count: None,
            passes: 0,
            control: GifFrame::default(),
            last_frame: None,
            pending_delay: None,
            finished: false,
            failed: false,
        })
    }

    pub fn screen(&self) -> &ScreenDescriptor {
        &self.screen
    }

    /// Number of frames per pass, known once the first pass completes
    pub fn frame_count(&self) -> Option<usize> {
        self.frame_count
    }

    /// Looping-control value: `Some(0)` loops forever, `None` plays once
    pub fn loop_count(&self) -> Option<u16> {
        self.loop_count
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.options.cancel
    }

    /// Advance to the next composited frame
    pub fn next_frame(&mut self) -> Result<Step<'_>, GifError> {
        if self.finished {
            return Ok(Step::Finished);
        }
        if let Some(delay) = self.pending_delay.take() {
            if self.options.pacing && !self.options.cancel.sleep(delay) {
                self.finished = true;
                return Ok(Step::Canceled);
            }
        }
        if let Some(frame) = self.last_frame.take() {
            let background = self.background_for(&frame);
            self.canvas.dispose(&frame, background);
        }

        loop {
            let event = match self.advance() {
                Ok(event) => event,
                Err(e) if e.is_unexpected_eof() => Event::EndOfInput,
                Err(e) => return Err(self.fail(e)),
            };

            let graceful = match event {
                Event::FrameReady => return Ok(Step::Frame(self.emit())),
                Event::Canceled => {
                    tracing::debug!("GIF decode canceled at frame {}", self.frame_pointer);
                    self.finished = true;
                    return Ok(Step::Canceled);
                }
                Event::Trailer => true,
                Event::Unrecognized(byte) => {
                    tracing::trace!("Unrecognized block introducer {:#04x}", byte);
                    false
                }
                Event::EndOfInput => false,
            };

            match self.end_of_pass(graceful) {
                Ok(true) => continue,
                Ok(false) => {
                    self.finished = true;
                    return Ok(Step::Finished);
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn fail(&mut self, error: GifError) -> GifError {
        tracing::debug!("GIF decode failed: {}", error);
        self.finished = true;
        self.failed = true;
        error
    }

    fn advance(&mut self) -> Result<Event, GifError> {
        loop {
            if self.options.cancel.is_canceled() {
                return Ok(Event::Canceled);
            }
            match self.reader.read_u8()? {
                EXTENSION_INTRODUCER => self.read_extension()?,
                IMAGE_SEPARATOR => {
                    self.read_image()?;
                    return Ok(Event::FrameReady);
                }
                TRAILER => return Ok(Event::Trailer),
                other => return Ok(Event::Unrecognized(other)),
            }
        }
    }

    fn read_extension(&mut self) -> Result<(), GifError> {
        match self.reader.read_u8()? {
            GRAPHIC_CONTROL_LABEL => {
                let size = self.reader.read_u8()? as usize;
                if size < 4 {
                    self.reader.skip(size)?;
                } else {
                    self.control.graphic_packed = self.reader.read_u8()?;
                    self.control.delay_ms = self.reader.read_u16_le()? as u32 * 10;
                    self.control.transparent_index = self.reader.read_u8()?;
                    self.reader.skip(size - 4)?;
                }
                self.reader.skip_sub_blocks()?;
            }
            APPLICATION_LABEL => {
                let size = self.reader.read_u8()? as usize;
                let mut identifier = [0u8; 11];
                if size == identifier.len() {
                    self.reader.read_exact(&mut identifier)?;
                } else {
                    self.reader.skip(size)?;
                }
                if LOOPING_SIGNATURES.contains(&&identifier) {
                    self.read_looping_blocks()?;
                } else {
                    self.reader.skip_sub_blocks()?;
                }
            }
            // Comment, plain text and unknown extensions
            _ => self.reader.skip_sub_blocks()?,
        }
        Ok(())
    }

    fn read_looping_blocks(&mut self) -> Result<(), GifError> {
        let mut block = [0u8; 255];
        loop {
            let len = self.reader.read_u8()? as usize;
            if len == 0 {
                return Ok(());
            }
            self.reader.read_exact(&mut block[..len])?;
            if len >= 3 && block[0] == 1 && self.passes == 0 {
                let count = u16::from_le_bytes([block[1], block[2]]);
                tracing::trace!("GIF loop count {}", count);
                self.loop_count = Some(count);
            }
        }
    }

    fn read_image(&mut self) -> Result<(), GifError> {
        let mut frame = self.control;
        frame.x = self.reader.read_u16_le()?;
        frame.y = self.reader.read_u16_le()?;
        frame.width = self.reader.read_u16_le()?;
        frame.height = self.reader.read_u16_le()?;
        frame.image_packed = self.reader.read_u8()?;

        let use_local = frame.has_local_table();
        if use_local {
            read_color_table(&mut self.reader, frame.local_table_len(), &mut self.local)?;
        }
        let min_code_size = self.reader.read_u8()?;

        let width = frame.width as usize;
        let rows = frame.height as usize;
        if self.row.len() < width {
            self.row.resize(width, 0);
        }

        let colors: &[u32; 256] = if use_local { &self.local } else { &self.global };
        let canvas = &mut self.canvas;
        let interlaced = frame.interlaced();
        let end = self.lzw.decode(
            &mut self.reader,
            min_code_size,
            width,
            rows,
            &mut self.row,
            |sequence, indices| {
                let line = frame_line(sequence, rows, interlaced);
                canvas.blit_row(&frame, line, indices, colors);
            },
        )?;
        if end == LzwEnd::InvalidCode {
            tracing::debug!("Frame {} stopped early at an invalid LZW code", self.frame_pointer);
        }

        self.last_frame = Some(frame);
        self.control = GifFrame::default();
        Ok(())
    }

    fn emit(&mut self) -> Frame<'_> {
        let index = self.frame_pointer;
        self.frame_pointer += 1;

        let frame = self.last_frame.unwrap_or_default();
        let delay = Duration::from_millis(frame.effective_delay_ms() as u64);
        self.pending_delay = Some(delay);

        Frame {
            index,
            frame_count: self.frame_count,
            delay,
            disposal: frame.disposal(),
            bitmap: self.canvas.current(),
        }
    }

    /// Settle the frame count and decide whether to rewind for another pass
    fn end_of_pass(&mut self, graceful: bool) -> Result<bool, GifError> {
        let decoded = self.frame_pointer;
        if self.frame_count.is_none() {
            if decoded == 0 || (!graceful && decoded < 2) {
                return Err(GifError::Truncated { frames: decoded });
            }
            if !graceful {
                tracing::debug!("Treating trailing data after {} frames as the trailer", decoded);
            }
            self.frame_count = Some(decoded);
        }
        self.passes += 1;

        let frames = self.frame_count.unwrap_or(decoded);
        let again = frames > 1
            && match self.loop_count {
                Some(0) => true,
                Some(total) => self.passes < total as u32,
                None => false,
            };
        if !again {
            return Ok(false);
        }

        self.reader.seek_to(self.first_frame_offset)?;
        self.frame_pointer = 0;
        self.control = GifFrame::default();
        Ok(true)
    }

    fn background_for(&self, frame: &GifFrame) -> u32 {
        let index = self.screen.background_index;
        if frame.transparent() == Some(index) {
            0
        } else {
            self.global[index as usize]
        }
    }
}

impl<R> Drop for GifStream<R> {
    fn drop(&mut self) {
        self.options.scratch.put(std::mem::take(&mut self.row));
        if self.failed {
            return;
        }
        let (current, saved) = self.canvas.take_buffers();
        let (width, height) = (self.screen.width as u32, self.screen.height as u32);
        if !current.is_empty() {
            self.options.allocator.release(width, height, current);
        }
        if !saved.is_empty() {
            self.options.allocator.release(width, height, saved);
        }
    }
}

fn read_screen<R: Read + Seek>(reader: &mut ByteReader<R>) -> Result<ScreenDescriptor, GifError> {
    Ok(ScreenDescriptor {
        width: reader.read_u16_le()?,
        height: reader.read_u16_le()?,
        packed: reader.read_u8()?,
        background_index: reader.read_u8()?,
        aspect_ratio: reader.read_u8()?,
    })
}

fn read_color_table<R: Read + Seek>(
    reader: &mut ByteReader<R>,
    len: usize,
    table: &mut [u32; 256],
) -> std::io::Result<()> {
    let mut rgb = [0u8; 256 * 3];
    reader.read_exact(&mut rgb[..len * 3])?;
    for (slot, chunk) in table.iter_mut().zip(rgb[..len * 3].chunks_exact(3)) {
        *slot = OPAQUE_BLACK | (chunk[0] as u32) << 16 | (chunk[1] as u32) << 8 | chunk[2] as u32;
    }
    table[len..].fill(OPAQUE_BLACK);
    Ok(())
}
