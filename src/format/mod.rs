//! Binary format support: array file headers, block dictionaries and codecs.

pub mod codec;
pub mod npy;

pub use codec::{decompress, Compression};
pub use npy::{BlockReader, NpyHeader, MAX_HEADER_SCAN};
