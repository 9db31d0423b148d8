//! Header-sniff format classification

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes needed to tell every known format apart
const SNIFF_LEN: usize = 12;

/// Image container formats recognized by header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
    Bmp,
    Unknown,
}

impl ImageFormat {
    /// Detect format from magic bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        // PNG: 89 50 4E 47 0D 0A 1A 0A
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Self::Png;
        }

        // JPEG: FF D8 FF
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Self::Jpeg;
        }

        if fos_gif::is_gif(data) {
            return Self::Gif;
        }

        // WebP: RIFF....WEBP
        if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Self::WebP;
        }

        if data.len() >= 14 && data.starts_with(b"BM") {
            return Self::Bmp;
        }

        Self::Unknown
    }

    /// Whether the format can carry more than one frame
    pub fn supports_animation(self) -> bool {
        matches!(self, Self::Gif | Self::WebP | Self::Png)
    }

    /// Stable one-byte tag used in persisted records
    pub fn code(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Png => 1,
            Self::Jpeg => 2,
            Self::Gif => 3,
            Self::WebP => 4,
            Self::Bmp => 5,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Png,
            2 => Self::Jpeg,
            3 => Self::Gif,
            4 => Self::WebP,
            5 => Self::Bmp,
            _ => Self::Unknown,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
            Self::Bmp => "image/bmp",
            Self::Unknown => "application/octet-stream",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Classify an in-memory image by its header
pub fn decode_format(bytes: &[u8]) -> ImageFormat {
    ImageFormat::from_bytes(bytes)
}

/// Classify an image file by its header
pub fn decode_format_file(path: impl AsRef<Path>) -> io::Result<ImageFormat> {
    let mut header = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?.take(SNIFF_LEN as u64).read_to_end(&mut header)?;
    Ok(ImageFormat::from_bytes(&header))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_known_formats() {
        assert_eq!(decode_format(b"\x89PNG\r\n\x1a\n\0\0\0\0"), ImageFormat::Png);
        assert_eq!(decode_format(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
        assert_eq!(decode_format(b"GIF89a\x01\x00\x01\x00"), ImageFormat::Gif);
        assert_eq!(decode_format(b"GIF87a"), ImageFormat::Gif);
        assert_eq!(decode_format(b"RIFF\0\0\0\0WEBPVP8 "), ImageFormat::WebP);
        assert_eq!(decode_format(b"BM\0\0\0\0\0\0\0\0\0\0\0\0"), ImageFormat::Bmp);
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(decode_format(b""), ImageFormat::Unknown);
        assert_eq!(decode_format(b"GIF8"), ImageFormat::Unknown);
        assert_eq!(decode_format(b"<svg xmlns="), ImageFormat::Unknown);
    }

    #[test]
    fn test_codes_are_stable() {
        for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Gif, ImageFormat::WebP, ImageFormat::Bmp] {
            assert_eq!(ImageFormat::from_code(format.code()), format);
        }
        assert_eq!(ImageFormat::from_code(200), ImageFormat::Unknown);
    }

    #[test]
    fn test_sniff_file() {
        let path = std::env::temp_dir().join(format!("fos-image-sniff-{}.gif", std::process::id()));
        std::fs::write(&path, b"GIF89a\x02\x00").unwrap();
        assert_eq!(decode_format_file(&path).unwrap(), ImageFormat::Gif);
        std::fs::remove_file(&path).unwrap();

        assert!(decode_format_file(std::env::temp_dir().join("fos-image-missing.gif")).is_err());
    }
}
