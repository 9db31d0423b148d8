//! Per-frame descriptors

/// Frames declaring a shorter delay are paced at this minimum
pub const MIN_FRAME_DELAY_MS: u32 = 10;

/// How the canvas is prepared after a frame, before the next one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposal {
    #[default]
    Unspecified,
    DoNotDispose,
    RestoreBackground,
    RestorePrevious,
}

impl Disposal {
    /// Decode from a graphic control extension's packed field
    pub fn from_packed(packed: u8) -> Self {
        match (packed >> 2) & 0x07 {
            1 => Self::DoNotDispose,
            2 => Self::RestoreBackground,
            3 => Self::RestorePrevious,
            _ => Self::Unspecified,
        }
    }
}

/// State gathered for one frame from its graphic control extension and image descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GifFrame {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    /// Image descriptor packed field
    pub image_packed: u8,
    /// Graphic control extension packed field
    pub graphic_packed: u8,
    pub delay_ms: u32,
    pub transparent_index: u8,
}

impl GifFrame {
    pub fn interlaced(&self) -> bool {
        self.image_packed & 0x40 != 0
    }

    pub fn has_local_table(&self) -> bool {
        self.image_packed & 0x80 != 0
    }

    pub fn local_table_len(&self) -> usize {
        2 << (self.image_packed & 0x07)
    }

    pub fn has_transparency(&self) -> bool {
        self.graphic_packed & 0x01 != 0
    }

    pub fn transparent(&self) -> Option<u8> {
        self.has_transparency().then_some(self.transparent_index)
    }

    pub fn disposal(&self) -> Disposal {
        Disposal::from_packed(self.graphic_packed)
    }

    /// Inter-frame delay with the minimum applied
    pub fn effective_delay_ms(&self) -> u32 {
        self.delay_ms.max(MIN_FRAME_DELAY_MS)
    }
}
