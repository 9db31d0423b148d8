//! Minimal GIF writer for building test fixtures.
//!
//! Produces well-formed GIF89a streams: global palette, optional looping
//! extension, per-frame graphic control, local palettes and interlacing.

use std::collections::HashMap;

const INTERLACE_PASSES: [(usize, usize); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];

/// One frame to encode. `indices` are row-major in natural line order.
#[derive(Debug, Clone)]
pub struct FrameSpec {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub indices: Vec<u8>,
    /// Delay in hundredths of a second
    pub delay_cs: u16,
    /// Raw disposal value (0-3)
    pub disposal: u8,
    pub transparent: Option<u8>,
    pub interlaced: bool,
    pub local_palette: Option<Vec<[u8; 3]>>,
}

impl FrameSpec {
    /// Frame covering the region at (x, y)
    pub fn at(x: u16, y: u16, width: u16, height: u16, indices: Vec<u8>) -> Self {
        assert_eq!(indices.len(), width as usize * height as usize);
        Self {
            x,
            y,
            width,
            height,
            indices,
            delay_cs: 0,
            disposal: 0,
            transparent: None,
            interlaced: false,
            local_palette: None,
        }
    }

    /// Frame filling a `width * height` screen with one index
    pub fn solid(width: u16, height: u16, index: u8) -> Self {
        Self::at(0, 0, width, height, vec![index; width as usize * height as usize])
    }

    pub fn delay(mut self, centiseconds: u16) -> Self {
        self.delay_cs = centiseconds;
        self
    }

    pub fn disposal(mut self, disposal: u8) -> Self {
        self.disposal = disposal;
        self
    }

    pub fn transparent(mut self, index: u8) -> Self {
        self.transparent = Some(index);
        self
    }

    pub fn interlaced(mut self) -> Self {
        self.interlaced = true;
        self
    }

    pub fn local_palette(mut self, palette: Vec<[u8; 3]>) -> Self {
        self.local_palette = Some(palette);
        self
    }
}

/// GIF stream builder
#[derive(Debug, Clone)]
pub struct GifEncoder {
    width: u16,
    height: u16,
    palette: Vec<[u8; 3]>,
    background: u8,
    loop_count: Option<u16>,
    frames: Vec<FrameSpec>,
    trailer: Vec<u8>,
}

impl GifEncoder {
    pub fn new(width: u16, height: u16, palette: Vec<[u8; 3]>) -> Self {
        Self {
            width,
            height,
            palette,
            background: 0,
            loop_count: None,
            frames: Vec::new(),
            trailer: vec![0x3B],
        }
    }

    pub fn background(mut self, index: u8) -> Self {
        self.background = index;
        self
    }

    /// Add a looping-control extension; 0 loops forever
    pub fn looping(mut self, count: u16) -> Self {
        self.loop_count = Some(count);
        self
    }

    pub fn frame(mut self, frame: FrameSpec) -> Self {
        self.frames.push(frame);
        self
    }

    /// Replace the trailing `0x3B` with arbitrary bytes
    pub fn trailer(mut self, bytes: &[u8]) -> Self {
        self.trailer = bytes.to_vec();
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"GIF89a");
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        let (global, global_bits) = padded_palette(&self.palette);
        out.push(0x80 | 0x70 | (global_bits - 1));
        out.push(self.background);
        out.push(0);
        for rgb in &global {
            out.extend_from_slice(rgb);
        }

        if let Some(count) = self.loop_count {
            out.extend_from_slice(&[0x21, 0xFF, 0x0B]);
            out.extend_from_slice(b"NETSCAPE2.0");
            out.extend_from_slice(&[0x03, 0x01]);
            out.extend_from_slice(&count.to_le_bytes());
            out.push(0);
        }

        for frame in &self.frames {
            if frame.delay_cs > 0 || frame.disposal > 0 || frame.transparent.is_some() {
                let packed = ((frame.disposal & 0x07) << 2) | frame.transparent.is_some() as u8;
                out.extend_from_slice(&[0x21, 0xF9, 0x04, packed]);
                out.extend_from_slice(&frame.delay_cs.to_le_bytes());
                out.push(frame.transparent.unwrap_or(0));
                out.push(0);
            }

            out.push(0x2C);
            for v in [frame.x, frame.y, frame.width, frame.height] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            let mut packed = if frame.interlaced { 0x40 } else { 0 };
            let mut table_bits = global_bits;
            let local = frame.local_palette.as_ref().map(|p| padded_palette(p));
            if let Some((_, bits)) = &local {
                packed |= 0x80 | (bits - 1);
                table_bits = *bits;
            }
            out.push(packed);
            if let Some((colors, _)) = &local {
                for rgb in colors {
                    out.extend_from_slice(rgb);
                }
            }

            let ordered = if frame.interlaced {
                interlace_rows(&frame.indices, frame.width as usize, frame.height as usize)
            } else {
                frame.indices.clone()
            };
            let min_code_size = table_bits.max(2);
            out.push(min_code_size);
            out.extend_from_slice(&sub_blocks(&lzw_encode(&ordered, min_code_size)));
        }

        out.extend_from_slice(&self.trailer);
        out
    }
}

/// Pad a palette to a power of two (at least 2) and return its bit depth
fn padded_palette(palette: &[[u8; 3]]) -> (Vec<[u8; 3]>, u8) {
    let mut bits = 1u8;
    while (1usize << bits) < palette.len() {
        bits += 1;
    }
    let mut colors = palette.to_vec();
    colors.resize(1 << bits, [0, 0, 0]);
    (colors, bits)
}

fn interlace_rows(indices: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(indices.len());
    for (start, step) in INTERLACE_PASSES {
        for line in (start..height).step_by(step) {
            out.extend_from_slice(&indices[line * width..(line + 1) * width]);
        }
    }
    out
}

/// Split data into 255-byte sub-blocks followed by the zero terminator
pub fn sub_blocks(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 255 + 2);
    for chunk in data.chunks(255) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out.push(0);
    out
}

/// Packs variable-width codes least significant bit first
#[derive(Default)]
pub struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    bits: u32,
}

impl BitWriter {
    pub fn write(&mut self, code: usize, size: u32) {
        self.acc |= (code as u32) << self.bits;
        self.bits += size;
        while self.bits >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.bits -= 8;
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.out.push(self.acc as u8);
        }
        self.out
    }
}

/// GIF-flavoured LZW compression (packed codes, not yet split into sub-blocks)
pub fn lzw_encode(indices: &[u8], min_code_size: u8) -> Vec<u8> {
    let clear = 1usize << min_code_size;
    let end_of_information = clear + 1;
    let initial_size = min_code_size as u32 + 1;

    let mut dict: HashMap<(usize, u8), usize> = HashMap::new();
    let mut next = end_of_information + 1;
    let mut size = initial_size;
    let mut writer = BitWriter::default();
    writer.write(clear, size);

    let mut prefix: Option<usize> = None;
    for &index in indices {
        let Some(current) = prefix else {
            prefix = Some(index as usize);
            continue;
        };
        if let Some(&code) = dict.get(&(current, index)) {
            prefix = Some(code);
            continue;
        }

        writer.write(current, size);
        dict.insert((current, index), next);
        next += 1;
        if next > (1 << size) && size < 12 {
            size += 1;
        }
        if next == 4096 {
            writer.write(clear, size);
            dict.clear();
            next = end_of_information + 1;
            size = initial_size;
        }
        prefix = Some(index as usize);
    }

    if let Some(current) = prefix {
        writer.write(current, size);
        // The decoder adds a table entry for this code before reading the next one
        if next + 1 > (1 << size) && size < 12 && next != end_of_information + 1 {
            size += 1;
        }
    }
    writer.write(end_of_information, size);
    writer.finish()
}
