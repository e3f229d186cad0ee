//! Top-level slide reader.
//!
//! [`SlideReader::open`] verifies the sentinel file, enumerates the image
//! group directories and loads each group's metadata; groups that fail to
//! load are skipped, and a slide where none survive is reported as an empty
//! container. Pixel planes are then served on demand through a shared pool of
//! open file handles.
//!
//! The reader is single-threaded cooperative: it spawns nothing and callers
//! serialise access to one instance.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::doc::{decode_record, DecodeStep, Document, SlideRecord70};
use crate::error::SlideError;
use crate::io::HandleCache;

use super::group::ImageGroup;
use super::layout::{self, SlideLayout};
use super::metadata::CaptureMetadata;

// =============================================================================
// Dimensions
// =============================================================================

/// Published dimensions of one capture, in XYCZT order with the positional
/// axis folded into T.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: usize,
    pub height: usize,
    pub z_planes: usize,
    pub channels: usize,
    /// Timepoints per position times positions
    pub timepoints: usize,
    pub positions: usize,
}

// =============================================================================
// SlideReader
// =============================================================================

/// Reader for one slide container.
#[derive(Debug)]
pub struct SlideReader {
    layout: SlideLayout,
    slide_record: SlideRecord70,
    groups: Vec<ImageGroup>,
    handles: HandleCache,
}

impl SlideReader {
    /// Open a slide and load every readable image group.
    ///
    /// # Errors
    /// - [`SlideError::PathSyntax`] for paths without a slide suffix
    /// - [`SlideError::NotFound`] when the sentinel file or root directory is
    ///   absent
    /// - [`SlideError::EmptyContainer`] when no group loads successfully
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SlideError> {
        let layout = SlideLayout::new(path)?;
        let slide_record = read_sld(&layout)?;

        let titles = layout.image_group_titles()?;
        debug!(groups = titles.len(), "enumerated image groups");

        let mut groups = Vec::new();
        for title in &titles {
            match ImageGroup::load(&layout, title) {
                Ok(group) => groups.push(group),
                Err(err) => warn!(%title, %err, "skipping unreadable image group"),
            }
        }
        if groups.is_empty() {
            return Err(SlideError::EmptyContainer);
        }

        Ok(SlideReader {
            layout,
            slide_record,
            groups,
            handles: HandleCache::new(),
        })
    }

    /// Whether `path` looks like a readable slide.
    ///
    /// Requires the recognised suffix and a sentinel file that opens; the
    /// suffix alone says nothing about whether the container is intact.
    pub fn detect(path: &Path) -> bool {
        if !layout::is_slide_path(path) {
            return false;
        }
        match SlideLayout::new(path) {
            Ok(layout) => read_sld(&layout).is_ok(),
            Err(_) => false,
        }
    }

    /// The decoded slide record from the sentinel file.
    pub fn slide_record(&self) -> &SlideRecord70 {
        &self.slide_record
    }

    /// Number of loaded captures.
    pub fn num_captures(&self) -> usize {
        self.groups.len()
    }

    /// Access one capture's loaded metadata.
    pub fn group(&self, series: usize) -> Result<&ImageGroup, SlideError> {
        self.groups
            .get(series)
            .ok_or(SlideError::CaptureOutOfRange(series))
    }

    /// Published dimensions of one capture.
    pub fn dimensions(&self, series: usize) -> Result<Dimensions, SlideError> {
        let group = self.group(series)?;
        let positions = group.num_positions();
        Ok(Dimensions {
            width: group.width(),
            height: group.height(),
            z_planes: group.num_planes(),
            channels: group.num_channels(),
            timepoints: group.num_timepoints() * positions,
            positions,
        })
    }

    /// Structured metadata for one capture.
    pub fn capture_metadata(&self, series: usize) -> Result<CaptureMetadata, SlideError> {
        Ok(CaptureMetadata::from_group(self.group(series)?))
    }

    /// Bytes in one plane of the given capture.
    pub fn plane_size(&self, series: usize) -> Result<usize, SlideError> {
        Ok(self.group(series)?.plane_size())
    }

    /// Read one 2-D plane into `buf`.
    ///
    /// The published axis order is XYCZT, so the position is already encoded
    /// in the timepoint index and `position_idx` is accepted only for
    /// interface compatibility; it takes no part in the file lookup.
    pub fn read_plane(
        &mut self,
        series: usize,
        position_idx: usize,
        timepoint: usize,
        zplane: usize,
        channel: usize,
        buf: &mut [u8],
    ) -> Result<(), SlideError> {
        let _ = position_idx;
        let group = self
            .groups
            .get_mut(series)
            .ok_or(SlideError::CaptureOutOfRange(series))?;

        let raw_timepoints = group.num_timepoints_raw();
        if timepoint >= raw_timepoints
            || zplane >= group.num_planes()
            || channel >= group.num_channels()
        {
            return Err(SlideError::PlaneOutOfRange {
                t: timepoint,
                z: zplane,
                c: channel,
            });
        }

        group.read_plane(&mut self.handles, timepoint, zplane, channel, buf)
    }

    /// Enumerate the files backing this slide.
    ///
    /// Includes the sentinel file and everything under the root directory,
    /// excluding lock files, editor copies and `.dat` payloads; with
    /// `no_pixels` the binary array files are excluded as well.
    pub fn used_files(&self, no_pixels: bool) -> Result<Vec<PathBuf>, SlideError> {
        let mut files = vec![self.layout.slide_path().to_path_buf()];
        collect_files(&self.layout.root_dir(), no_pixels, &mut files)?;
        Ok(files)
    }

    /// Number of currently open pixel-file streams.
    pub fn open_stream_count(&self) -> usize {
        self.handles.open_count()
    }

    /// Close every open stream. The reader remains usable; streams reopen on
    /// the next plane read.
    pub fn close(&mut self) {
        self.handles.close_all();
    }
}

impl Drop for SlideReader {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Open the sentinel file and decode its slide record.
///
/// The sentinel payload is opaque in current containers; a file that opens
/// but does not parse yields a default record rather than an error.
fn read_sld(layout: &SlideLayout) -> Result<SlideRecord70, SlideError> {
    let path = layout.slide_path();
    if !path.is_file() {
        return Err(SlideError::NotFound(path.to_path_buf()));
    }
    // Confirm the file is actually readable, not merely listed.
    File::open(path)?;

    match std::fs::read_to_string(path)
        .ok()
        .and_then(|text| Document::parse(&text).ok())
    {
        Some(doc) => match decode_record::<SlideRecord70>(&doc, 0) {
            DecodeStep::Matched { record, .. } => Ok(record),
            _ => Ok(SlideRecord70::default()),
        },
        None => {
            trace!(path = %path.display(), "sentinel payload not parseable; using defaults");
            Ok(SlideRecord70::default())
        }
    }
}

fn collect_files(
    dir: &Path,
    no_pixels: bool,
    files: &mut Vec<PathBuf>,
) -> Result<(), SlideError> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_files(&path, no_pixels, files)?;
            continue;
        }
        let name = path.to_string_lossy();
        if name.ends_with(".lck") || name.ends_with(".copy") || name.ends_with(".dat") {
            continue;
        }
        if no_pixels && (name.ends_with(".npy") || name.ends_with(".npyz")) {
            continue;
        }
        files.push(path);
    }
    Ok(())
}
