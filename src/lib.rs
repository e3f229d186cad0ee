//! slidebook7 - A reader for SlideBook 7 microscopy slide containers
//!
//! This library reads the directory-packaged `.sldy` / `.sldyz` format:
//! multi-capture, multi-dimensional image sets with per-capture metadata
//! documents and NumPy-style pixel files, optionally with per-plane
//! Zstandard-compressed blocks.
//!
//! # Example
//!
//! ```ignore
//! use slidebook7::SlideReader;
//!
//! let mut reader = SlideReader::open("/data/demo.sldy")?;
//! let dims = reader.dimensions(0)?;
//! let mut plane = vec![0u8; reader.plane_size(0)?];
//! reader.read_plane(0, 0, 0, 0, 0, &mut plane)?;
//! # Ok::<(), slidebook7::SlideError>(())
//! ```

pub mod doc;
pub mod error;
pub mod format;
pub mod io;
pub mod slide;

// Re-export commonly used types
pub use doc::{Document, Record, Value};
pub use error::{CodecError, DocError, NpyError, SlideError};
pub use format::{BlockReader, Compression, NpyHeader};
pub use io::{HandleCache, MAX_OPEN_STREAMS};
pub use slide::{
    channel_of, is_slide_path, rename_to_tp0, timepoint_of, CaptureMetadata, Dimensions,
    ImageGroup, PixelType, PlaneMeta, RoiShape, SlideLayout, SlideReader,
};
