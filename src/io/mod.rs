//! I/O support: the bounded pool of open pixel-file streams.

pub mod handles;

pub use handles::{HandleCache, MAX_OPEN_STREAMS};
