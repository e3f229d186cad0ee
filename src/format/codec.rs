//! Decompression of pixel blocks.
//!
//! Compressed array files repurpose the minor version byte of the array
//! header as an algorithm tag. Every tag the acquisition software writes is
//! recognised here, but only a subset can actually be decoded: uncompressed
//! data passes through unchanged, Zstandard and Zlib payloads are inflated,
//! and the remaining algorithms surface [`CodecError::Unsupported`] when a
//! block actually uses them.

use std::fmt;
use std::io::Read;

use crate::error::CodecError;

// =============================================================================
// Compression
// =============================================================================

/// Compression algorithm tag carried in an array file's minor version byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    /// No compression; planes are stored as raw pixel bytes
    None = 0,
    /// Zstandard
    Zstd = 1,
    /// Zlib / deflate
    Zlib = 2,
    /// LZ4
    Lz4 = 3,
    /// JetRaw (camera vendor codec)
    JetRaw = 4,
    /// Run-length encoding
    Rle = 5,
}

impl Compression {
    /// Map a raw tag byte to an algorithm.
    ///
    /// Returns `None` for tags the format does not define.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Compression::None),
            1 => Some(Compression::Zstd),
            2 => Some(Compression::Zlib),
            3 => Some(Compression::Lz4),
            4 => Some(Compression::JetRaw),
            5 => Some(Compression::Rle),
            _ => None,
        }
    }

    /// The raw tag byte for this algorithm.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Whether this reader can decode payloads using this algorithm.
    pub const fn is_supported(self) -> bool {
        matches!(
            self,
            Compression::None | Compression::Zstd | Compression::Zlib
        )
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Zstd => "zstd",
            Compression::Zlib => "zlib",
            Compression::Lz4 => "lz4",
            Compression::JetRaw => "jetraw",
            Compression::Rle => "rle",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Decompression
// =============================================================================

/// Decompress one block's payload.
///
/// # Arguments
/// * `algorithm` - The algorithm tag taken from the array header
/// * `data` - The compressed bytes of a single block
///
/// # Errors
/// Returns [`CodecError::Unsupported`] for recognised-but-unimplemented
/// algorithms and [`CodecError::Decompress`] when the payload is corrupt.
pub fn decompress(algorithm: Compression, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    match algorithm {
        Compression::None => Ok(data.to_vec()),
        Compression::Zstd => {
            zstd::decode_all(data).map_err(|e| CodecError::Decompress(e.to_string()))
        }
        Compression::Zlib => {
            let mut decoder = flate2::read::ZlibDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| CodecError::Decompress(e.to_string()))?;
            Ok(out)
        }
        Compression::Lz4 | Compression::JetRaw | Compression::Rle => {
            Err(CodecError::Unsupported(algorithm))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_tag_round_trip() {
        for tag in 0u8..=5 {
            let algorithm = Compression::from_tag(tag).unwrap();
            assert_eq!(algorithm.tag(), tag);
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(Compression::from_tag(6), None);
        assert_eq!(Compression::from_tag(255), None);
    }

    #[test]
    fn test_none_passthrough() {
        let data = b"raw pixel bytes";
        let out = decompress(Compression::None, data).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_zstd_round_trip() {
        let data: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
        let compressed = zstd::encode_all(&data[..], 3).unwrap();
        let out = decompress(Compression::Zstd, &compressed).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_zstd_corrupt_payload() {
        let result = decompress(Compression::Zstd, b"definitely not zstd");
        assert!(matches!(result, Err(CodecError::Decompress(_))));
    }

    #[test]
    fn test_zlib_round_trip() {
        let data = b"compressible compressible compressible".repeat(16);
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();

        let out = decompress(Compression::Zlib, &compressed).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_unsupported_algorithms() {
        for algorithm in [Compression::Lz4, Compression::JetRaw, Compression::Rle] {
            assert!(!algorithm.is_supported());
            let result = decompress(algorithm, b"payload");
            assert!(matches!(result, Err(CodecError::Unsupported(a)) if a == algorithm));
        }
    }

    #[test]
    fn test_supported_flags() {
        assert!(Compression::None.is_supported());
        assert!(Compression::Zstd.is_supported());
        assert!(Compression::Zlib.is_supported());
    }
}
