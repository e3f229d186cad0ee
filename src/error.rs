use std::path::PathBuf;

use thiserror::Error;

use crate::format::Compression;

/// Errors from parsing the binary array files that hold pixel planes.
#[derive(Debug, Error)]
pub enum NpyError {
    /// Underlying stream failure while reading the header or dictionary
    #[error("I/O error reading array file: {0}")]
    Io(#[from] std::io::Error),

    /// The textual header is not terminated by a newline within the scan window
    #[error("no newline in the first {0} bytes of array header")]
    MissingNewline(usize),

    /// The file ends before the fixed-width binary prefix
    #[error("array header truncated at {0} bytes")]
    Truncated(usize),

    /// A required header field could not be located or parsed
    #[error("malformed array header: {0}")]
    Malformed(String),

    /// The declared element type is not one the format defines
    #[error("unsupported array dtype {0:?}")]
    UnsupportedDtype(String),

    /// A block failed to decompress
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors from decompressing pixel blocks.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The algorithm tag is recognised but this reader does not implement it
    #[error("compression algorithm {0} is not supported")]
    Unsupported(Compression),

    /// The compressed payload could not be decoded
    #[error("decompression failed: {0}")]
    Decompress(String),
}

/// Errors from parsing and decoding the metadata documents.
#[derive(Debug, Error)]
pub enum DocError {
    /// Underlying stream failure while reading a document
    #[error("I/O error reading document: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not well-formed YAML
    #[error("document scan error: {0}")]
    Scan(#[from] yaml_rust2::ScanError),

    /// The document root is not a mapping of keyed entries
    #[error("document root is not a mapping")]
    NotAMapping,

    /// A required key was not found where the layout demands it
    #[error("expected key {expected:?} at entry {index}")]
    MissingKey { expected: &'static str, index: usize },

    /// The record cursor hit `EndClass` or the end of the document
    #[error("no further records in document")]
    EndOfRecords,

    /// Structurally present but semantically unusable contents
    #[error("invalid document contents: {0}")]
    Invalid(String),

    /// The next record's class name does not match the requested type
    #[error("record class {expected:?} not found")]
    ClassMismatch { expected: &'static str },
}

/// Top-level errors surfaced by the slide reader.
#[derive(Debug, Error)]
pub enum SlideError {
    /// The path does not carry a recognised slide suffix
    #[error("not a SlideBook 7 slide path: {}", .0.display())]
    PathSyntax(PathBuf),

    /// An expected file or directory is absent
    #[error("missing file or directory: {}", .0.display())]
    NotFound(PathBuf),

    /// The slide has no image group that loads successfully
    #[error("slide contains no readable image groups")]
    EmptyContainer,

    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Doc(#[from] DocError),

    #[error(transparent)]
    Npy(#[from] NpyError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The capture (series) index exceeds the number of loaded groups
    #[error("capture index {0} out of range")]
    CaptureOutOfRange(usize),

    /// The requested plane coordinate is outside the capture's dimensions
    #[error("plane (t={t}, z={z}, c={c}) out of range")]
    PlaneOutOfRange { t: usize, z: usize, c: usize },

    /// The caller's buffer cannot hold one plane
    #[error("output buffer holds {got} bytes, plane needs {needed}")]
    BufferTooSmall { needed: usize, got: usize },

    /// A decompressed block is shorter than the plane it should contain
    #[error("decompressed block holds {got} bytes, plane needs {needed}")]
    ShortBlock { needed: usize, got: usize },
}
