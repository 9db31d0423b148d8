//! LZW Image Data Decompression
//!
//! Variable code-width LZW as used by GIF image blocks. Codes are expanded
//! through a prefix/suffix table onto a LIFO pixel stack, and the stack drains
//! into a row buffer that is handed out one full row at a time.

use std::io::{Read, Seek};

use crate::reader::ByteReader;
use crate::GifError;

/// Capacity of the code table
pub const MAX_TABLE_SIZE: usize = 4096;

const NO_CODE: usize = usize::MAX;

/// How a frame's image data ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LzwEnd {
    /// Every row of the frame was produced
    Complete,
    /// An end-of-information code arrived before the last row
    EndOfInformation,
    /// The sub-block chain ran out before the last row
    DataExhausted,
    /// A code beyond the next free table slot stopped the frame
    InvalidCode,
}

/// Reusable LZW state for one decode session
pub struct LzwDecoder {
    prefix: Box<[u16]>,
    suffix: Box<[u8]>,
    stack: Vec<u8>,
    block: [u8; 255],
}

impl LzwDecoder {
    pub fn new() -> Self {
        Self {
            prefix: vec![0; MAX_TABLE_SIZE].into_boxed_slice(),
            suffix: vec![0; MAX_TABLE_SIZE].into_boxed_slice(),
            stack: Vec::with_capacity(MAX_TABLE_SIZE + 1),
            block: [0; 255],
        }
    }

    /// Decode one frame's image data.
    ///
    /// `emit` receives each finished row together with its sequence number
    /// (0-based, in stream order). A trailing partial row is still emitted
    /// when the data ends early. On return the reader sits after the frame's
    /// block terminator.
    pub fn decode<R: Read + Seek>(
        &mut self,
        reader: &mut ByteReader<R>,
        min_code_size: u8,
        width: usize,
        rows: usize,
        row: &mut [u8],
        mut emit: impl FnMut(usize, &[u8]),
    ) -> Result<LzwEnd, GifError> {
        if !(1..=11).contains(&min_code_size) {
            return Err(GifError::Malformed("invalid LZW minimum code size"));
        }
        if width == 0 || rows == 0 {
            reader.skip_sub_blocks()?;
            return Ok(LzwEnd::Complete);
        }

        let clear = 1usize << min_code_size;
        let end_of_information = clear + 1;
        let mut code_size = min_code_size as u32 + 1;
        let mut code_mask = (1usize << code_size) - 1;
        let mut available = clear + 2;
        let mut old_code = NO_CODE;
        let mut first = 0u8;

        for code in 0..clear {
            self.prefix[code] = 0;
            self.suffix[code] = code as u8;
        }
        self.stack.clear();

        let mut datum = 0u32;
        let mut bits = 0u32;
        let mut block_len = 0usize;
        let mut block_pos = 0usize;
        let mut row_fill = 0usize;
        let mut rows_done = 0usize;
        let mut end = LzwEnd::Complete;

        'codes: while rows_done < rows {
            while bits < code_size {
                if block_pos == block_len {
                    block_len = reader.read_u8()? as usize;
                    if block_len == 0 {
                        end = LzwEnd::DataExhausted;
                        break 'codes;
                    }
                    reader.read_exact(&mut self.block[..block_len])?;
                    block_pos = 0;
                }
                datum |= (self.block[block_pos] as u32) << bits;
                block_pos += 1;
                bits += 8;
            }

            let mut code = datum as usize & code_mask;
            datum >>= code_size;
            bits -= code_size;

            if code == clear {
                code_size = min_code_size as u32 + 1;
                code_mask = (1 << code_size) - 1;
                available = clear + 2;
                old_code = NO_CODE;
                continue;
            }
            if code == end_of_information {
                end = LzwEnd::EndOfInformation;
                break;
            }

            if old_code == NO_CODE {
                if code >= available {
                    end = LzwEnd::InvalidCode;
                    break;
                }
                first = self.suffix[code];
                self.stack.push(first);
                old_code = code;
            } else {
                // Every code after the first adds an entry; a full table must be cleared first
                if available >= MAX_TABLE_SIZE {
                    return Err(GifError::TableOverflow);
                }
                if code > available {
                    end = LzwEnd::InvalidCode;
                    break;
                }
                let in_code = code;
                if code == available {
                    self.stack.push(first);
                    code = old_code;
                }
                while code >= clear {
                    self.stack.push(self.suffix[code]);
                    code = self.prefix[code] as usize;
                }
                first = self.suffix[code];
                self.stack.push(first);

                self.prefix[available] = old_code as u16;
                self.suffix[available] = first;
                available += 1;
                if available & code_mask == 0 && available < MAX_TABLE_SIZE {
                    code_size += 1;
                    code_mask += available;
                }
                old_code = in_code;
            }

            while let Some(index) = self.stack.pop() {
                row[row_fill] = index;
                row_fill += 1;
                if row_fill == width {
                    emit(rows_done, &row[..width]);
                    rows_done += 1;
                    row_fill = 0;
                    if rows_done == rows {
                        self.stack.clear();
                        break;
                    }
                }
            }
        }

        if row_fill > 0 && rows_done < rows {
            emit(rows_done, &row[..row_fill]);
        }

        if end != LzwEnd::DataExhausted {
            reader.skip_sub_blocks()?;
        }
        Ok(end)
    }
}

impl Default for LzwDecoder {
    fn default() -> Self {
        Self::new()
    }
}
