//! Slide container model: layout, image groups, metadata emission and the
//! top-level reader.

pub mod group;
pub mod layout;
pub mod metadata;
pub mod reader;

pub use group::{AuxTable, AuxXml, ImageGroup, MaskPositions, TimepointAnnotations};
pub use layout::{channel_of, is_slide_path, rename_to_tp0, timepoint_of, SlideLayout};
pub use metadata::{CaptureMetadata, ObjectiveMeta, PixelType, PlaneMeta, RoiShape};
pub use reader::{Dimensions, SlideReader};
