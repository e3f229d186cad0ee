//! Array file header and compressed block parsing.
//!
//! Pixel planes are stored in NumPy array files. The standard layout is:
//!
//! ```text
//! Bytes 0-5:  magic ("\x93NUMPY")
//! Byte  6:    major version
//! Byte  7:    minor version
//! Bytes 8-9:  header length (little-endian u16)
//! Bytes 10..: ASCII dict ("{'descr': '<u2', 'fortran_order': False,
//!             'shape': (3, 512, 512), }") terminated by '\n'
//! ```
//!
//! The acquisition software repurposes the minor version as a compression
//! algorithm tag. A minor version >= 1 turns the rest of the file into a
//! compressed container:
//!
//! ```text
//! [header ... '\n'][#blocks x 16-byte (offset, length) pairs][blocks...]
//! ```
//!
//! where each dictionary entry is a little-endian `(offset: u64, length: u64)`
//! pair, there is one block per focal plane, block 0 starts immediately after
//! the dictionary and block k (k >= 1) starts at `offset[k-1] + length[k-1]`.

use std::io::{Read, Seek, SeekFrom};

use tracing::{trace, warn};

use crate::error::NpyError;

use super::codec::{decompress, Compression};

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of bytes scanned for the header-terminating newline.
pub const MAX_HEADER_SCAN: usize = 1024;

/// Size of the fixed binary prefix before the ASCII dict.
const PREFIX_SIZE: usize = 10;

/// Size of one block dictionary entry: (offset: u64, length: u64).
const DICT_ENTRY_SIZE: usize = 16;

// =============================================================================
// NpyHeader
// =============================================================================

/// Parsed array file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    /// Major format version (byte 6)
    pub major_version: u8,

    /// Minor format version (byte 7); doubles as the compression tag
    pub minor_version: u8,

    /// Offset of the first data byte (one past the terminating newline)
    pub header_size: u64,

    /// Whether multi-byte pixels are little-endian
    pub little_endian: bool,

    /// Whether the array is stored in Fortran (column-major) order
    pub fortran_order: bool,

    /// Two-character dtype code following the endianness marker (`u2`, `i2`, ...)
    pub dtype: String,

    /// Bytes per pixel derived from the dtype
    pub bytes_per_pixel: usize,

    /// Array shape as written in the header dict
    pub shape: Vec<usize>,
}

impl NpyHeader {
    /// Parse the header from the start of a stream.
    ///
    /// The stream is rewound to offset 0 first. On return the stream position
    /// is unspecified; callers seek before reading data.
    ///
    /// # Errors
    /// - [`NpyError::MissingNewline`] if no newline occurs within the scan window
    /// - [`NpyError::Truncated`] if the file ends inside the binary prefix
    /// - [`NpyError::Malformed`] if `descr`, `fortran_order` or `shape` cannot
    ///   be located
    /// - [`NpyError::UnsupportedDtype`] for dtypes the format does not define
    pub fn parse<R: Read + Seek>(stream: &mut R) -> Result<Self, NpyError> {
        stream.seek(SeekFrom::Start(0))?;

        let mut buffer = vec![0u8; MAX_HEADER_SCAN];
        let mut filled = 0;
        while filled < buffer.len() {
            let n = stream.read(&mut buffer[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let buffer = &buffer[..filled];

        let newline = buffer
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(NpyError::MissingNewline(MAX_HEADER_SCAN))?;
        let header_size = (newline + 1) as u64;

        if buffer.len() < PREFIX_SIZE {
            return Err(NpyError::Truncated(buffer.len()));
        }

        let major_version = buffer[6];
        let minor_version = buffer[7];
        let declared_len = u16::from_le_bytes([buffer[8], buffer[9]]) as usize;
        trace!(
            major_version,
            minor_version,
            declared_len,
            "parsed array header prefix"
        );

        // The dict text runs from the prefix to the newline; the declared
        // length can overshoot the scan window for padded headers.
        let text_end = (PREFIX_SIZE + declared_len).min(newline + 1).max(PREFIX_SIZE);
        let text = String::from_utf8_lossy(&buffer[PREFIX_SIZE..text_end]);

        let (little_endian, dtype) = parse_descr(&text)?;
        let fortran_order = parse_fortran_order(&text)?;
        let shape = parse_shape(&text)?;

        let bytes_per_pixel = match dtype.as_str() {
            "u2" | "i2" => 2,
            "u4" | "i4" => 4,
            _ => return Err(NpyError::UnsupportedDtype(dtype)),
        };

        Ok(NpyHeader {
            major_version,
            minor_version,
            header_size,
            little_endian,
            fortran_order,
            dtype,
            bytes_per_pixel,
            shape,
        })
    }

    /// The compression algorithm encoded in the minor version.
    ///
    /// Minor version 0 is a canonical uncompressed NumPy file; any other
    /// defined value selects a block codec. Returns `None` for tags the
    /// format does not define; those fail only if the file is actually read
    /// through the block path.
    pub fn compression(&self) -> Option<Compression> {
        Compression::from_tag(self.minor_version)
    }

    /// Whether the file carries a block dictionary and compressed blocks.
    pub fn is_compressed(&self) -> bool {
        self.minor_version >= 1
    }

    /// Whether the dtype is a signed integer type.
    pub fn is_signed(&self) -> bool {
        self.dtype.starts_with('i')
    }
}

fn parse_descr(text: &str) -> Result<(bool, String), NpyError> {
    let pos = text
        .find("descr")
        .ok_or_else(|| NpyError::Malformed("missing descr".into()))?;
    // "descr': '<u2'" -- the endianness marker sits 9 bytes past the key.
    let value = text
        .get(pos + 9..pos + 12)
        .ok_or_else(|| NpyError::Malformed("descr value truncated".into()))?;
    let mut chars = value.chars();
    let endian = chars
        .next()
        .ok_or_else(|| NpyError::Malformed("descr value empty".into()))?;
    let little_endian = endian == '<';
    let dtype: String = chars.collect();
    Ok((little_endian, dtype))
}

fn parse_fortran_order(text: &str) -> Result<bool, NpyError> {
    let pos = text
        .find("fortran_order")
        .ok_or_else(|| NpyError::Malformed("missing fortran_order".into()))?;
    let value = text
        .get(pos + 16..pos + 20)
        .ok_or_else(|| NpyError::Malformed("fortran_order value truncated".into()))?;
    Ok(value == "True")
}

fn parse_shape(text: &str) -> Result<Vec<usize>, NpyError> {
    let open = text
        .find('(')
        .ok_or_else(|| NpyError::Malformed("missing shape tuple".into()))?;
    let close = text[open..]
        .find(')')
        .map(|i| open + i)
        .ok_or_else(|| NpyError::Malformed("unterminated shape tuple".into()))?;

    let mut shape = Vec::new();
    for dim in text[open + 1..close].split(',') {
        let dim = dim.trim();
        if dim.is_empty() {
            continue;
        }
        let value: usize = dim
            .parse()
            .map_err(|_| NpyError::Malformed(format!("bad shape dimension {dim:?}")))?;
        shape.push(value);
    }
    Ok(shape)
}

// =============================================================================
// BlockReader
// =============================================================================

/// Reader for the block dictionary and compressed blocks of one array file.
///
/// A `BlockReader` is built from a parsed [`NpyHeader`] and lazily primes its
/// block dictionary from the stream on first use. It lives alongside the
/// header in a per-group cache slot so the two are always replaced together.
#[derive(Debug)]
pub struct BlockReader {
    algorithm_tag: u8,
    plane_bytes: u64,
    num_blocks: u64,
    dictionary_pos: u64,
    data_pos: u64,
    dictionary: Vec<u8>,
    dictionary_read: bool,
}

impl BlockReader {
    /// Create a block reader for a compressed array file.
    ///
    /// # Arguments
    /// * `header` - The parsed array header
    /// * `width` / `height` - Plane geometry used to validate block sizes
    pub fn new(header: &NpyHeader, width: u64, height: u64) -> Self {
        let num_blocks = if header.shape.len() == 3 {
            header.shape[0] as u64
        } else {
            1
        };
        let dictionary_pos = header.header_size;
        BlockReader {
            algorithm_tag: header.minor_version,
            plane_bytes: width * height * header.bytes_per_pixel as u64,
            num_blocks,
            dictionary_pos,
            data_pos: dictionary_pos + num_blocks * DICT_ENTRY_SIZE as u64,
            dictionary: Vec::new(),
            dictionary_read: false,
        }
    }

    /// Number of blocks the dictionary describes.
    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    /// Read the block dictionary from the stream.
    pub fn read_dictionary<R: Read + Seek>(&mut self, stream: &mut R) -> Result<(), NpyError> {
        trace!(position = self.dictionary_pos, "reading block dictionary");
        stream.seek(SeekFrom::Start(self.dictionary_pos))?;
        let mut dictionary = vec![0u8; (self.num_blocks as usize) * DICT_ENTRY_SIZE];
        stream.read_exact(&mut dictionary)?;
        self.dictionary = dictionary;
        self.dictionary_read = true;
        Ok(())
    }

    fn entry_u64(&self, block: usize, field_offset: usize) -> u64 {
        let start = block * DICT_ENTRY_SIZE + field_offset;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.dictionary[start..start + 8]);
        u64::from_le_bytes(bytes)
    }

    /// Absolute file position of a block's compressed data.
    ///
    /// Block 0 starts at the end of the dictionary; block k starts where
    /// block k-1 ends.
    fn block_position(&self, block: usize) -> u64 {
        if block == 0 {
            return self.data_pos;
        }
        let offset = self.entry_u64(block - 1, 0);
        let length = self.entry_u64(block - 1, 8);
        offset + length
    }

    /// Compressed byte length of a block.
    fn block_length(&self, block: usize) -> u64 {
        self.entry_u64(block, 8)
    }

    /// Read and decompress one block.
    ///
    /// The decompressed length is validated against one plane's worth of
    /// pixels; a mismatch is logged but the buffer is still returned so the
    /// caller decides whether partial data is usable.
    pub fn read_block<R: Read + Seek>(
        &mut self,
        stream: &mut R,
        block: usize,
    ) -> Result<Vec<u8>, NpyError> {
        if !self.dictionary_read {
            self.read_dictionary(stream)?;
        }
        if block as u64 >= self.num_blocks {
            return Err(NpyError::Malformed(format!(
                "block {block} out of range ({} blocks)",
                self.num_blocks
            )));
        }

        let algorithm = Compression::from_tag(self.algorithm_tag).ok_or_else(|| {
            NpyError::Malformed(format!("unknown compression tag {}", self.algorithm_tag))
        })?;

        let position = self.block_position(block);
        let length = self.block_length(block) as usize;
        trace!(block, position, length, "reading compressed block");

        stream.seek(SeekFrom::Start(position))?;
        let mut compressed = vec![0u8; length];
        stream.read_exact(&mut compressed)?;

        let decompressed = decompress(algorithm, &compressed)?;
        if decompressed.len() as u64 != self.plane_bytes {
            warn!(
                got = decompressed.len(),
                expected = self.plane_bytes,
                block,
                "decompressed block size mismatch"
            );
        }
        Ok(decompressed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Build a canonical array file header for the given parameters.
    fn make_header(minor: u8, descr: &str, fortran: bool, shape: &str) -> Vec<u8> {
        let dict = format!(
            "{{'descr': '{descr}', 'fortran_order': {}, 'shape': {shape}, }}",
            if fortran { "True" } else { "False" }
        );
        let mut text = dict.into_bytes();
        // Pad with spaces so total header size is a multiple of 16, as numpy does.
        while (PREFIX_SIZE + text.len() + 1) % 16 != 0 {
            text.push(b' ');
        }
        text.push(b'\n');

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"\x93NUMPY");
        bytes.push(1);
        bytes.push(minor);
        bytes.extend_from_slice(&(text.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&text);
        bytes
    }

    // -------------------------------------------------------------------------
    // Header parsing
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_uncompressed_u16() {
        let bytes = make_header(0, "<u2", false, "(2, 2)");
        let header_len = bytes.len() as u64;
        let mut stream = Cursor::new(bytes);

        let header = NpyHeader::parse(&mut stream).unwrap();
        assert_eq!(header.major_version, 1);
        assert_eq!(header.minor_version, 0);
        assert_eq!(header.header_size, header_len);
        assert!(header.little_endian);
        assert!(!header.fortran_order);
        assert_eq!(header.dtype, "u2");
        assert_eq!(header.bytes_per_pixel, 2);
        assert_eq!(header.shape, vec![2, 2]);
        assert!(!header.is_compressed());
        assert_eq!(header.compression(), Some(Compression::None));
    }

    #[test]
    fn test_parse_compressed_minor_version() {
        let bytes = make_header(1, "<u2", false, "(3, 4, 4)");
        let mut stream = Cursor::new(bytes);

        let header = NpyHeader::parse(&mut stream).unwrap();
        assert!(header.is_compressed());
        assert_eq!(header.compression(), Some(Compression::Zstd));
        assert_eq!(header.shape, vec![3, 4, 4]);
    }

    #[test]
    fn test_parse_big_endian_signed() {
        let bytes = make_header(0, ">i4", false, "(8,)");
        let mut stream = Cursor::new(bytes);

        let header = NpyHeader::parse(&mut stream).unwrap();
        assert!(!header.little_endian);
        assert!(header.is_signed());
        assert_eq!(header.bytes_per_pixel, 4);
        assert_eq!(header.shape, vec![8]);
    }

    #[test]
    fn test_parse_fortran_order() {
        let bytes = make_header(0, "<u2", true, "(2, 3)");
        let mut stream = Cursor::new(bytes);

        let header = NpyHeader::parse(&mut stream).unwrap();
        assert!(header.fortran_order);
    }

    #[test]
    fn test_parse_missing_newline() {
        let mut stream = Cursor::new(vec![b'x'; 64]);
        let result = NpyHeader::parse(&mut stream);
        assert!(matches!(result, Err(NpyError::MissingNewline(_))));
    }

    #[test]
    fn test_parse_truncated_prefix() {
        let mut stream = Cursor::new(b"abc\n".to_vec());
        let result = NpyHeader::parse(&mut stream);
        assert!(matches!(result, Err(NpyError::Truncated(4))));
    }

    #[test]
    fn test_parse_unsupported_dtype() {
        let bytes = make_header(0, "<f8", false, "(2, 2)");
        let mut stream = Cursor::new(bytes);
        let result = NpyHeader::parse(&mut stream);
        assert!(matches!(result, Err(NpyError::UnsupportedDtype(d)) if d == "f8"));
    }

    #[test]
    fn test_undefined_compression_tag() {
        let bytes = make_header(9, "<u2", false, "(1, 2, 2)");
        let mut stream = Cursor::new(bytes.clone());
        let header = NpyHeader::parse(&mut stream).unwrap();
        assert_eq!(header.compression(), None);

        // Using the block path with an undefined tag is a format error.
        let mut padded = bytes;
        padded.extend_from_slice(&[0u8; 64]);
        let mut stream = Cursor::new(padded);
        let mut blocks = BlockReader::new(&header, 2, 2);
        assert!(matches!(
            blocks.read_block(&mut stream, 0),
            Err(NpyError::Malformed(_))
        ));
    }

    // -------------------------------------------------------------------------
    // Block reader
    // -------------------------------------------------------------------------

    /// Build a compressed array file with one zstd block per plane.
    fn make_compressed_file(width: usize, height: usize, planes: &[Vec<u8>]) -> Vec<u8> {
        let shape = format!("({}, {height}, {width})", planes.len());
        let mut bytes = make_header(1, "<u2", false, &shape);

        let compressed: Vec<Vec<u8>> = planes
            .iter()
            .map(|p| zstd::encode_all(&p[..], 3).unwrap())
            .collect();

        // Dictionary entries hold each block's absolute offset and length.
        let data_start = bytes.len() + compressed.len() * DICT_ENTRY_SIZE;
        let mut offset = data_start as u64;
        for block in &compressed {
            bytes.extend_from_slice(&offset.to_le_bytes());
            bytes.extend_from_slice(&(block.len() as u64).to_le_bytes());
            offset += block.len() as u64;
        }
        for block in &compressed {
            bytes.extend_from_slice(block);
        }
        bytes
    }

    #[test]
    fn test_read_single_block() {
        let plane: Vec<u8> = (0u8..8).collect();
        let file = make_compressed_file(2, 2, std::slice::from_ref(&plane));
        let mut stream = Cursor::new(file);

        let header = NpyHeader::parse(&mut stream).unwrap();
        let mut blocks = BlockReader::new(&header, 2, 2);
        assert_eq!(blocks.num_blocks(), 1);

        let out = blocks.read_block(&mut stream, 0).unwrap();
        assert_eq!(out, plane);
    }

    #[test]
    fn test_read_later_blocks_chain_offsets() {
        let planes: Vec<Vec<u8>> = (0..3)
            .map(|p| (0..8).map(|i| (p * 10 + i) as u8).collect())
            .collect();
        let file = make_compressed_file(2, 2, &planes);
        let mut stream = Cursor::new(file);

        let header = NpyHeader::parse(&mut stream).unwrap();
        let mut blocks = BlockReader::new(&header, 2, 2);
        assert_eq!(blocks.num_blocks(), 3);

        // Read out of order to exercise the offset arithmetic.
        assert_eq!(blocks.read_block(&mut stream, 2).unwrap(), planes[2]);
        assert_eq!(blocks.read_block(&mut stream, 0).unwrap(), planes[0]);
        assert_eq!(blocks.read_block(&mut stream, 1).unwrap(), planes[1]);
    }

    #[test]
    fn test_read_block_out_of_range() {
        let plane: Vec<u8> = vec![0; 8];
        let file = make_compressed_file(2, 2, std::slice::from_ref(&plane));
        let mut stream = Cursor::new(file);

        let header = NpyHeader::parse(&mut stream).unwrap();
        let mut blocks = BlockReader::new(&header, 2, 2);
        let result = blocks.read_block(&mut stream, 5);
        assert!(matches!(result, Err(NpyError::Malformed(_))));
    }

    #[test]
    fn test_size_mismatch_still_returns_buffer() {
        // Plane payload is half the declared 2x2 u16 plane; the reader warns
        // but hands the bytes back.
        let short_plane: Vec<u8> = vec![1, 2, 3, 4];
        let file = make_compressed_file(2, 2, std::slice::from_ref(&short_plane));
        let mut stream = Cursor::new(file);

        let header = NpyHeader::parse(&mut stream).unwrap();
        let mut blocks = BlockReader::new(&header, 2, 2);
        let out = blocks.read_block(&mut stream, 0).unwrap();
        assert_eq!(out, short_plane);
    }
}
