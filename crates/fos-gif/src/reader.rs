//! Sequential byte reader over a seekable source.
//!
//! Reads through a pooled window buffer; the window goes back to the
//! scratch pool when the reader is dropped.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::ScratchPool;

const WINDOW_SIZE: usize = 4096;

/// Buffered little-endian reader
pub struct ByteReader<R> {
    inner: R,
    window: Vec<u8>,
    pos: usize,
    filled: usize,
    /// Stream offset of `window[0]`
    offset: u64,
    scratch: Arc<ScratchPool>,
}

impl<R: Read + Seek> ByteReader<R> {
    pub fn new(inner: R, scratch: Arc<ScratchPool>) -> Self {
        let window = scratch.take(WINDOW_SIZE);
        Self {
            inner,
            window,
            pos: 0,
            filled: 0,
            offset: 0,
            scratch,
        }
    }

    /// Offset of the next byte to be read
    pub fn position(&self) -> u64 {
        self.offset + self.pos as u64
    }

    fn refill(&mut self) -> io::Result<bool> {
        self.offset += self.filled as u64;
        self.pos = 0;
        self.filled = 0;
        loop {
            match self.inner.read(&mut self.window) {
                Ok(n) => {
                    self.filled = n;
                    return Ok(n > 0);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        if self.pos == self.filled && !self.refill()? {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let byte = self.window[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u16_le(&mut self) -> io::Result<u16> {
        let lo = self.read_u8()?;
        let hi = self.read_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    pub fn read_exact(&mut self, out: &mut [u8]) -> io::Result<()> {
        let mut written = 0;
        while written < out.len() {
            if self.pos == self.filled && !self.refill()? {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let n = (self.filled - self.pos).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.window[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
        }
        Ok(())
    }

    pub fn skip(&mut self, mut count: usize) -> io::Result<()> {
        while count > 0 {
            if self.pos == self.filled && !self.refill()? {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let n = (self.filled - self.pos).min(count);
            self.pos += n;
            count -= n;
        }
        Ok(())
    }

    /// Skip a chain of data sub-blocks up to and including the zero-length terminator
    pub fn skip_sub_blocks(&mut self) -> io::Result<()> {
        loop {
            let len = self.read_u8()? as usize;
            if len == 0 {
                return Ok(());
            }
            self.skip(len)?;
        }
    }

    /// Reposition to an absolute stream offset
    pub fn seek_to(&mut self, position: u64) -> io::Result<()> {
        let window_end = self.offset + self.filled as u64;
        if position >= self.offset && position <= window_end {
            self.pos = (position - self.offset) as usize;
            return Ok(());
        }
        self.inner.seek(SeekFrom::Start(position))?;
        self.offset = position;
        self.pos = 0;
        self.filled = 0;
        Ok(())
    }
}

impl<R> Drop for ByteReader<R> {
    fn drop(&mut self) {
        self.scratch.put(std::mem::take(&mut self.window));
    }
}
