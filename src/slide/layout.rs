//! On-disk layout of a slide container.
//!
//! A slide is a sentinel file (`<name>.sldy` or, compressed, `<name>.sldyz`)
//! next to a root directory `<name>.dir`. Each capture lives in a
//! `<title>.imgdir` subdirectory holding the metadata documents plus one
//! binary array file per (channel, timepoint):
//!
//! ```text
//! demo.sldy
//! demo.dir/
//!   cap.imgdir/
//!     ImageRecord.yaml
//!     ChannelRecord.yaml
//!     ...
//!     ImageData_Ch0_TP0000000.npy
//!     MaskData_TP0000000.npy
//!     HistogramData_Ch0_TP0000000.npy
//!     HistogramSummary_Ch0.npy
//! ```
//!
//! This module maps a slide path to that tree, enumerates valid image group
//! directories, and builds the canonical file names keyed by channel and
//! timepoint.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::SlideError;

// =============================================================================
// Suffixes and document names
// =============================================================================

/// Sentinel file suffix of an uncompressed slide.
pub const SLIDE_SUFFIX: &str = ".sldy";

/// Sentinel file suffix of a compressed slide.
pub const COMPRESSED_SLIDE_SUFFIX: &str = ".sldyz";

/// Suffix of the root directory next to the sentinel file.
pub const ROOT_DIR_SUFFIX: &str = ".dir";

/// Suffix of an image group directory.
pub const IMAGE_DIR_SUFFIX: &str = ".imgdir";

/// Suffix of an uncompressed binary array file.
pub const BINARY_SUFFIX: &str = ".npy";

/// Suffix of a compressed binary array file.
pub const COMPRESSED_BINARY_SUFFIX: &str = ".npyz";

pub const IMAGE_RECORD_FILE: &str = "ImageRecord.yaml";
pub const CHANNEL_RECORD_FILE: &str = "ChannelRecord.yaml";
pub const ANNOTATION_RECORD_FILE: &str = "AnnotationRecord.yaml";
pub const MASK_RECORD_FILE: &str = "MaskRecord.yaml";
pub const AUX_DATA_FILE: &str = "AuxData.yaml";
pub const ELAPSED_TIMES_FILE: &str = "ElapsedTimes.yaml";
pub const SA_POSITION_DATA_FILE: &str = "SAPositionData.yaml";
pub const STAGE_POSITION_DATA_FILE: &str = "StagePositionData.yaml";

/// Timepoint tokens are zero-padded to exactly this many digits.
pub const TIMEPOINT_DIGITS: usize = 7;

/// Whether a path carries one of the recognised slide suffixes.
pub fn is_slide_path(path: &Path) -> bool {
    match path.to_str() {
        Some(s) => s.ends_with(SLIDE_SUFFIX) || s.ends_with(COMPRESSED_SLIDE_SUFFIX),
        None => false,
    }
}

// =============================================================================
// SlideLayout
// =============================================================================

/// Path arithmetic for one slide container.
#[derive(Debug, Clone)]
pub struct SlideLayout {
    slide_path: PathBuf,
    compressed: bool,
}

impl SlideLayout {
    /// Create a layout for the given sentinel file path.
    ///
    /// # Errors
    /// [`SlideError::PathSyntax`] if the path carries neither slide suffix.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SlideError> {
        let slide_path = path.into();
        if !is_slide_path(&slide_path) {
            return Err(SlideError::PathSyntax(slide_path));
        }
        let compressed = slide_path
            .to_str()
            .is_some_and(|s| s.ends_with(COMPRESSED_SLIDE_SUFFIX));
        Ok(SlideLayout {
            slide_path,
            compressed,
        })
    }

    /// The sentinel file path this layout was built from.
    pub fn slide_path(&self) -> &Path {
        &self.slide_path
    }

    /// Whether the slide was written with compressed pixel files.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Binary file suffix matching the slide's compression flag.
    pub fn binary_suffix(&self) -> &'static str {
        if self.compressed {
            COMPRESSED_BINARY_SUFFIX
        } else {
            BINARY_SUFFIX
        }
    }

    /// The root directory: the slide suffix replaced by `.dir`.
    pub fn root_dir(&self) -> PathBuf {
        let text = self.slide_path.to_string_lossy();
        let stem = if self.compressed {
            text.strip_suffix(COMPRESSED_SLIDE_SUFFIX)
        } else {
            text.strip_suffix(SLIDE_SUFFIX)
        }
        .unwrap_or(&text);
        PathBuf::from(format!("{stem}{ROOT_DIR_SUFFIX}"))
    }

    /// Enumerate titles of valid image groups.
    ///
    /// A subdirectory qualifies when its name ends `.imgdir`, it contains an
    /// `ImageRecord.yaml`, and it holds at least one binary array file. The
    /// title is the directory name with the suffix stripped and backslashes
    /// normalised; titles are returned sorted for a stable capture order.
    ///
    /// # Errors
    /// [`SlideError::NotFound`] if the root directory does not exist.
    pub fn image_group_titles(&self) -> Result<Vec<String>, SlideError> {
        let root = self.root_dir();
        if !root.is_dir() {
            return Err(SlideError::NotFound(root));
        }

        let mut titles = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(IMAGE_DIR_SUFFIX) else {
                continue;
            };
            if !path.join(IMAGE_RECORD_FILE).is_file() {
                trace!(group = %name, "skipping group without image record");
                continue;
            }
            if !has_binary_file(&path)? {
                trace!(group = %name, "skipping group without binary files");
                continue;
            }
            titles.push(stem.replace('\\', "/"));
        }
        titles.sort();
        Ok(titles)
    }

    /// Directory of the image group with the given title.
    pub fn group_dir(&self, title: &str) -> PathBuf {
        self.root_dir().join(format!("{title}{IMAGE_DIR_SUFFIX}"))
    }

    /// Path of a metadata document within a group.
    pub fn document_path(&self, title: &str, document: &str) -> PathBuf {
        self.group_dir(title).join(document)
    }

    /// Path of the pixel file for one (channel, timepoint) pair.
    pub fn image_data_path(&self, title: &str, channel: usize, timepoint: usize) -> PathBuf {
        self.group_dir(title).join(format!(
            "ImageData_Ch{channel}_TP{timepoint:0width$}{suffix}",
            width = TIMEPOINT_DIGITS,
            suffix = self.binary_suffix()
        ))
    }

    /// Path of the mask file for one timepoint.
    pub fn mask_data_path(&self, title: &str, timepoint: usize) -> PathBuf {
        self.group_dir(title).join(format!(
            "MaskData_TP{timepoint:0width$}{BINARY_SUFFIX}",
            width = TIMEPOINT_DIGITS
        ))
    }

    /// Path of the histogram file for one (channel, timepoint) pair.
    pub fn histogram_data_path(&self, title: &str, channel: usize, timepoint: usize) -> PathBuf {
        self.group_dir(title).join(format!(
            "HistogramData_Ch{channel}_TP{timepoint:0width$}{BINARY_SUFFIX}",
            width = TIMEPOINT_DIGITS
        ))
    }

    /// Path of the histogram summary file for one channel.
    pub fn histogram_summary_path(&self, title: &str, channel: usize) -> PathBuf {
        self.group_dir(title)
            .join(format!("HistogramSummary_Ch{channel}{BINARY_SUFFIX}"))
    }

    /// List a group's pixel files.
    pub fn list_image_data_files(&self, title: &str) -> Result<Vec<PathBuf>, SlideError> {
        self.list_binary_files(title, "ImageData")
    }

    /// List a group's mask files.
    pub fn list_mask_data_files(&self, title: &str) -> Result<Vec<PathBuf>, SlideError> {
        self.list_binary_files(title, "MaskData")
    }

    /// List a group's per-timepoint histogram files.
    pub fn list_histogram_data_files(&self, title: &str) -> Result<Vec<PathBuf>, SlideError> {
        self.list_binary_files(title, "HistogramData")
    }

    /// List a group's histogram summary files.
    pub fn list_histogram_summary_files(&self, title: &str) -> Result<Vec<PathBuf>, SlideError> {
        self.list_binary_files(title, "HistogramSummary")
    }

    fn list_binary_files(&self, title: &str, prefix: &str) -> Result<Vec<PathBuf>, SlideError> {
        let dir = self.group_dir(title);
        if !dir.is_dir() {
            return Err(SlideError::NotFound(dir));
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(prefix) {
                continue;
            }
            if name.ends_with(BINARY_SUFFIX) || name.ends_with(COMPRESSED_BINARY_SUFFIX) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

fn has_binary_file(dir: &Path) -> Result<bool, SlideError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(BINARY_SUFFIX) || name.ends_with(COMPRESSED_BINARY_SUFFIX) {
            return Ok(true);
        }
    }
    Ok(false)
}

// =============================================================================
// Filename token parsing
// =============================================================================

/// Parse the channel index from the digits after the last `_Ch` token.
pub fn channel_of(path: &Path) -> Option<usize> {
    let name = path.to_str()?;
    let pos = name.rfind("_Ch")?;
    let digits: String = name[pos + 3..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Parse the timepoint index from the seven digits after the last `_TP` token.
pub fn timepoint_of(path: &Path) -> Option<usize> {
    let name = path.to_str()?;
    let pos = name.rfind("_TP")?;
    let digits = name.get(pos + 3..pos + 3 + TIMEPOINT_DIGITS)?;
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Rewrite the seven-digit timepoint token to timepoint zero.
///
/// Paths without a `_TP` token are returned unchanged.
pub fn rename_to_tp0(path: &Path) -> PathBuf {
    let Some(name) = path.to_str() else {
        return path.to_path_buf();
    };
    let Some(pos) = name.rfind("_TP") else {
        return path.to_path_buf();
    };
    let tail_start = pos + 3 + TIMEPOINT_DIGITS;
    if tail_start > name.len() {
        return path.to_path_buf();
    }
    PathBuf::from(format!(
        "{}_TP{:0width$}{}",
        &name[..pos],
        0,
        &name[tail_start..],
        width = TIMEPOINT_DIGITS
    ))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_group(root: &Path, title: &str, with_record: bool, with_binary: bool) {
        let dir = root.join(format!("{title}{IMAGE_DIR_SUFFIX}"));
        fs::create_dir_all(&dir).unwrap();
        if with_record {
            File::create(dir.join(IMAGE_RECORD_FILE)).unwrap();
        }
        if with_binary {
            let mut f = File::create(dir.join("ImageData_Ch0_TP0000000.npy")).unwrap();
            f.write_all(b"stub").unwrap();
        }
    }

    #[test]
    fn test_layout_rejects_wrong_suffix() {
        assert!(matches!(
            SlideLayout::new("demo.tiff"),
            Err(SlideError::PathSyntax(_))
        ));
    }

    #[test]
    fn test_root_dir_for_both_suffixes() {
        let plain = SlideLayout::new("/data/demo.sldy").unwrap();
        assert!(!plain.is_compressed());
        assert_eq!(plain.root_dir(), PathBuf::from("/data/demo.dir"));

        let compressed = SlideLayout::new("/data/demo.sldyz").unwrap();
        assert!(compressed.is_compressed());
        assert_eq!(compressed.root_dir(), PathBuf::from("/data/demo.dir"));
    }

    #[test]
    fn test_image_data_path_formatting() {
        let layout = SlideLayout::new("/data/demo.sldy").unwrap();
        assert_eq!(
            layout.image_data_path("cap", 2, 13),
            PathBuf::from("/data/demo.dir/cap.imgdir/ImageData_Ch2_TP0000013.npy")
        );

        let compressed = SlideLayout::new("/data/demo.sldyz").unwrap();
        assert_eq!(
            compressed.image_data_path("cap", 0, 0),
            PathBuf::from("/data/demo.dir/cap.imgdir/ImageData_Ch0_TP0000000.npyz")
        );
    }

    #[test]
    fn test_mask_and_histogram_paths() {
        let layout = SlideLayout::new("/data/demo.sldy").unwrap();
        assert_eq!(
            layout.mask_data_path("cap", 5),
            PathBuf::from("/data/demo.dir/cap.imgdir/MaskData_TP0000005.npy")
        );
        assert_eq!(
            layout.histogram_data_path("cap", 1, 2),
            PathBuf::from("/data/demo.dir/cap.imgdir/HistogramData_Ch1_TP0000002.npy")
        );
        assert_eq!(
            layout.histogram_summary_path("cap", 1),
            PathBuf::from("/data/demo.dir/cap.imgdir/HistogramSummary_Ch1.npy")
        );
    }

    #[test]
    fn test_channel_and_timepoint_of() {
        let path = Path::new("/x/cap.imgdir/ImageData_Ch3_TP0000042.npy");
        assert_eq!(channel_of(path), Some(3));
        assert_eq!(timepoint_of(path), Some(42));

        let multi_digit = Path::new("ImageData_Ch12_TP0000001.npy");
        assert_eq!(channel_of(multi_digit), Some(12));

        assert_eq!(channel_of(Path::new("MaskData_TP0000001.npy")), None);
        assert_eq!(timepoint_of(Path::new("HistogramSummary_Ch0.npy")), None);
    }

    #[test]
    fn test_rename_to_tp0() {
        let path = Path::new("/x/ImageData_Ch1_TP0000042.npy");
        assert_eq!(
            rename_to_tp0(path),
            PathBuf::from("/x/ImageData_Ch1_TP0000000.npy")
        );
        // No token: unchanged.
        let plain = Path::new("/x/HistogramSummary_Ch0.npy");
        assert_eq!(rename_to_tp0(plain), plain.to_path_buf());
    }

    #[test]
    fn test_image_group_titles_filters_invalid_groups() {
        let dir = TempDir::new().unwrap();
        let slide = dir.path().join("demo.sldy");
        File::create(&slide).unwrap();
        let root = dir.path().join("demo.dir");
        fs::create_dir(&root).unwrap();

        make_group(&root, "good", true, true);
        make_group(&root, "no_record", false, true);
        make_group(&root, "no_binary", true, false);
        fs::create_dir(root.join("not_a_group")).unwrap();

        let layout = SlideLayout::new(&slide).unwrap();
        assert_eq!(layout.image_group_titles().unwrap(), vec!["good"]);
    }

    #[test]
    fn test_image_group_titles_missing_root() {
        let dir = TempDir::new().unwrap();
        let layout = SlideLayout::new(dir.path().join("demo.sldy")).unwrap();
        assert!(matches!(
            layout.image_group_titles(),
            Err(SlideError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_image_data_files_by_prefix() {
        let dir = TempDir::new().unwrap();
        let slide = dir.path().join("demo.sldy");
        File::create(&slide).unwrap();
        let root = dir.path().join("demo.dir");
        fs::create_dir(&root).unwrap();
        make_group(&root, "cap", true, true);
        let group = root.join("cap.imgdir");
        File::create(group.join("ImageData_Ch1_TP0000000.npy")).unwrap();
        File::create(group.join("MaskData_TP0000000.npy")).unwrap();
        File::create(group.join("notes.txt")).unwrap();

        let layout = SlideLayout::new(&slide).unwrap();
        let files = layout.list_image_data_files("cap").unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| {
            f.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("ImageData")
        }));

        assert_eq!(layout.list_mask_data_files("cap").unwrap().len(), 1);
    }
}
