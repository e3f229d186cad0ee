//! A single image group (capture) and its plane reads.
//!
//! Loading a group walks its metadata documents in a fixed order: image
//! record, channel records, masks, annotations, elapsed times, SA positions,
//! stage positions, auxiliary tables. Any structural failure makes the whole
//! group unreadable and the reader skips it.
//!
//! Plane reads keep one cache slot per group holding the parsed array header
//! and, for compressed files, the block reader. The slot is keyed by the last
//! (channel, timepoint) pair; crossing that latch replaces header and block
//! state together.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::doc::{
    decode_record, find_next_class, float_array, get_integer, get_string, int_array, long_array,
    AlignManipRecord70, Annotation70, ChannelRecord70, CubeAnnotation70, DataTableHeaderRecord70,
    DecodeStep, Document, FrapRegionAnnotation70, FretManipRecord70, HistogramRecord70,
    ImageRecord70, MaskRecord70, Point3, RatioManipRecord70, Record, RemapChannelLut70,
    RemapManipRecord70, UnknownAnnotation70,
};
use crate::error::{DocError, SlideError};
use crate::format::{BlockReader, NpyHeader};
use crate::io::HandleCache;

use super::layout::{
    self, SlideLayout, ANNOTATION_RECORD_FILE, AUX_DATA_FILE, CHANNEL_RECORD_FILE,
    ELAPSED_TIMES_FILE, IMAGE_RECORD_FILE, MASK_RECORD_FILE, SA_POSITION_DATA_FILE,
    STAGE_POSITION_DATA_FILE,
};

// =============================================================================
// Loaded per-timepoint tables
// =============================================================================

/// Locations of one timepoint's submasks inside the mask data file.
#[derive(Debug, Clone, Default)]
pub struct MaskPositions {
    pub compressed_sizes: Vec<i64>,
    pub file_offsets: Vec<i64>,
}

/// The four annotation lists attached to one timepoint.
#[derive(Debug, Clone, Default)]
pub struct TimepointAnnotations {
    pub cubes: Vec<CubeAnnotation70>,
    pub bases: Vec<Annotation70>,
    pub frap_regions: Vec<FrapRegionAnnotation70>,
    pub unknowns: Vec<UnknownAnnotation70>,
}

/// One auxiliary table: an XML descriptor paired with a typed payload.
#[derive(Debug, Clone, Default)]
pub struct AuxTable<T> {
    pub xml_descriptor: String,
    pub values: Vec<T>,
}

/// One serialized-XML auxiliary table.
#[derive(Debug, Clone, Default)]
pub struct AuxXml {
    pub xml_descriptor: String,
    pub xml: String,
}

// =============================================================================
// ImageGroup
// =============================================================================

/// Cache of the most recently touched pixel file's parse state.
///
/// Header and block reader are one value so a latch change can never leave
/// them referring to different files.
#[derive(Debug)]
struct PlaneCache {
    channel: usize,
    timepoint: usize,
    header: NpyHeader,
    blocks: Option<BlockReader>,
}

/// One loaded capture: metadata documents plus plane-read state.
#[derive(Debug)]
pub struct ImageGroup {
    layout: SlideLayout,
    title: String,

    image_record: ImageRecord70,
    channel_records: Vec<ChannelRecord70>,
    remap_luts: Vec<RemapChannelLut70>,
    align_manips: Vec<AlignManipRecord70>,
    ratio_manips: Vec<RatioManipRecord70>,
    fret_manips: Vec<FretManipRecord70>,
    remap_manips: Vec<RemapManipRecord70>,
    histogram_records: Vec<HistogramRecord70>,
    mask_records: Vec<MaskRecord70>,
    mask_positions: Vec<MaskPositions>,
    annotations: Vec<TimepointAnnotations>,
    elapsed_times: Vec<i32>,
    sa_positions: Vec<Vec<i32>>,
    stage_positions: Vec<Point3<f32>>,
    aux_float: Vec<AuxTable<f32>>,
    aux_double: Vec<AuxTable<f64>>,
    aux_sint32: Vec<AuxTable<i32>>,
    aux_sint64: Vec<AuxTable<i64>>,
    aux_xml: Vec<AuxXml>,

    /// One file per channel holds every timepoint (only when `#planes == 1`)
    single_timepoint_file: bool,
    bytes_per_pixel: usize,
    pixel_signed: bool,
    plane_cache: Option<PlaneCache>,
}

impl ImageGroup {
    /// Load one image group's metadata documents.
    pub fn load(layout: &SlideLayout, title: &str) -> Result<Self, SlideError> {
        debug!(title, "loading image group");
        let mut group = ImageGroup {
            layout: layout.clone(),
            title: title.to_string(),
            image_record: ImageRecord70::default(),
            channel_records: Vec::new(),
            remap_luts: Vec::new(),
            align_manips: Vec::new(),
            ratio_manips: Vec::new(),
            fret_manips: Vec::new(),
            remap_manips: Vec::new(),
            histogram_records: Vec::new(),
            mask_records: Vec::new(),
            mask_positions: Vec::new(),
            annotations: Vec::new(),
            elapsed_times: Vec::new(),
            sa_positions: Vec::new(),
            stage_positions: Vec::new(),
            aux_float: Vec::new(),
            aux_double: Vec::new(),
            aux_sint32: Vec::new(),
            aux_sint64: Vec::new(),
            aux_xml: Vec::new(),
            single_timepoint_file: false,
            bytes_per_pixel: 2,
            pixel_signed: false,
            plane_cache: None,
        };

        group.load_image_record()?;
        group.load_channel_records()?;
        group.load_masks()?;
        group.load_annotations()?;
        group.load_elapsed_times()?;
        group.load_sa_positions()?;
        group.load_stage_positions()?;
        group.load_aux_data()?;
        Ok(group)
    }

    fn open_document(&self, name: &str) -> Result<Document, SlideError> {
        let path = self.layout.document_path(&self.title, name);
        if !path.is_file() {
            return Err(SlideError::NotFound(path));
        }
        Ok(Document::open(&path)?)
    }

    // -------------------------------------------------------------------------
    // Document loaders
    // -------------------------------------------------------------------------

    fn load_image_record(&mut self) -> Result<(), SlideError> {
        let doc = self.open_document(IMAGE_RECORD_FILE)?;
        let record = match ImageRecord70::decode_chained(&doc, 0) {
            DecodeStep::Matched { record, .. } => record,
            DecodeStep::NotThisClass => {
                return Err(DocError::ClassMismatch {
                    expected: ImageRecord70::CLASS_NAME,
                }
                .into())
            }
            DecodeStep::EndOfRecords => return Err(DocError::EndOfRecords.into()),
        };
        if record.width <= 0 || record.height <= 0 {
            return Err(DocError::Invalid(format!(
                "image record dimensions {}x{}",
                record.width, record.height
            ))
            .into());
        }
        self.image_record = record;
        if self.image_record.num_planes < 1 {
            warn!(planes = self.image_record.num_planes, "clamping plane count");
            self.image_record.num_planes = 1;
        }
        self.count_image_data_files()
    }

    /// Reconcile the recorded channel/timepoint counts with the pixel files
    /// actually present.
    fn count_image_data_files(&mut self) -> Result<(), SlideError> {
        let files = self.layout.list_image_data_files(&self.title)?;
        let channels = self.image_record.num_channels.max(0) as usize;
        let timepoints = self.image_record.num_timepoints.max(0) as usize;
        trace!(
            files = files.len(),
            channels,
            timepoints,
            "counting image data files"
        );

        if let Some(first) = files.first() {
            match probe_header(first) {
                Ok(header) => {
                    self.bytes_per_pixel = header.bytes_per_pixel;
                    self.pixel_signed = header.is_signed();
                }
                Err(err) => warn!(path = %first.display(), %err, "pixel probe failed"),
            }
        }

        if channels > 0 && timepoints > 0 && files.len() == channels * timepoints {
            return Ok(());
        }

        // One file per channel with a 3-D shape means every timepoint lives
        // in that single file. The max across channels tolerates a channel
        // truncated by an interrupted acquisition.
        if files.len() == channels && self.image_record.num_planes == 1 {
            let mut effective = 0usize;
            for file in &files {
                match probe_header(file) {
                    Ok(header) if header.shape.len() == 3 && header.shape[0] > 1 => {
                        effective = effective.max(header.shape[0]);
                    }
                    Ok(_) => {}
                    Err(err) => warn!(path = %file.display(), %err, "header probe failed"),
                }
            }
            if effective == 0 {
                effective = 1;
            }
            if effective > 1 {
                self.single_timepoint_file = true;
            }
            self.image_record.num_timepoints = effective as i32;
            return Ok(());
        }

        // Fall back to the filename tokens.
        let mut max_channel = 0usize;
        let mut max_timepoint = 0usize;
        for file in &files {
            if let Some(channel) = layout::channel_of(file) {
                max_channel = max_channel.max(channel + 1);
            }
            if let Some(timepoint) = layout::timepoint_of(file) {
                max_timepoint = max_timepoint.max(timepoint + 1);
            }
        }
        if max_channel == 0 || max_timepoint == 0 {
            return Err(DocError::Invalid(
                "no channel or timepoint tokens among pixel files".into(),
            )
            .into());
        }
        self.image_record.num_channels = max_channel as i32;
        self.image_record.num_timepoints = max_timepoint as i32;
        Ok(())
    }

    fn load_channel_records(&mut self) -> Result<(), SlideError> {
        let doc = self.open_document(CHANNEL_RECORD_FILE)?;
        let mut cursor = 0usize;

        for _ in 0..self.image_record.num_channels.max(0) {
            let (record, next) = match ChannelRecord70::decode_chained(&doc, cursor) {
                DecodeStep::Matched { record, next } => (record, next),
                _ => break,
            };
            self.channel_records.push(record);
            cursor = next;

            // Manipulation records may sit between successive channels in any
            // order; dispatch on the next class name until the next channel.
            loop {
                let Some((class, index)) = find_next_class(&doc, cursor) else {
                    break;
                };
                match class {
                    ChannelRecord70::CLASS_NAME => {
                        cursor = index;
                        break;
                    }
                    RemapChannelLut70::CLASS_NAME => {
                        let Some((record, next)) =
                            decode_record::<RemapChannelLut70>(&doc, index).into_matched()
                        else {
                            break;
                        };
                        self.remap_luts.push(record);
                        cursor = next;
                    }
                    AlignManipRecord70::CLASS_NAME => {
                        let Some((record, next)) =
                            decode_record::<AlignManipRecord70>(&doc, index).into_matched()
                        else {
                            break;
                        };
                        self.align_manips.push(record);
                        cursor = next;
                    }
                    RatioManipRecord70::CLASS_NAME => {
                        let Some((record, next)) =
                            decode_record::<RatioManipRecord70>(&doc, index).into_matched()
                        else {
                            break;
                        };
                        self.ratio_manips.push(record);
                        cursor = next;
                    }
                    FretManipRecord70::CLASS_NAME => {
                        let Some((record, next)) =
                            decode_record::<FretManipRecord70>(&doc, index).into_matched()
                        else {
                            break;
                        };
                        self.fret_manips.push(record);
                        cursor = next;
                    }
                    RemapManipRecord70::CLASS_NAME => {
                        let Some((record, next)) =
                            decode_record::<RemapManipRecord70>(&doc, index).into_matched()
                        else {
                            break;
                        };
                        self.remap_manips.push(record);
                        cursor = next;
                    }
                    HistogramRecord70::CLASS_NAME => {
                        let Some((record, next)) =
                            decode_record::<HistogramRecord70>(&doc, index).into_matched()
                        else {
                            break;
                        };
                        self.histogram_records.push(record);
                        cursor = next;
                    }
                    other => {
                        warn!(class = other, "skipping unrecognised channel-table class");
                        cursor = index + 1;
                    }
                }
            }
        }

        if self.channel_records.is_empty() {
            return Err(DocError::ClassMismatch {
                expected: ChannelRecord70::CLASS_NAME,
            }
            .into());
        }
        Ok(())
    }

    fn load_masks(&mut self) -> Result<(), SlideError> {
        let doc = self.open_document(MASK_RECORD_FILE)?;
        let Some((num_masks, mut cursor)) = get_integer(&doc, 0, "theNumMasks") else {
            return Ok(());
        };
        if num_masks <= 0 {
            return Ok(());
        }

        for _ in 0..num_masks {
            let Some((record, next)) = decode_record::<MaskRecord70>(&doc, cursor).into_matched()
            else {
                break;
            };
            self.mask_records.push(record);
            cursor = next;
        }

        // Per timepoint: two parallel arrays locating the submasks.
        let entries = doc.entries();
        loop {
            let Some((_, next)) = get_integer(&doc, cursor, "theTimepointIndex") else {
                break;
            };
            cursor = next;

            let Some((key, value)) = entries.get(cursor) else {
                break;
            };
            if key != "theMaskCompressedSizes" {
                break;
            }
            let compressed_sizes = long_array(value, "theMaskCompressedSizes", true);
            cursor += 1;

            let Some((key, value)) = entries.get(cursor) else {
                break;
            };
            if key != "theMaskFileOffsets" {
                break;
            }
            let file_offsets = long_array(value, "theMaskFileOffsets", true);
            cursor += 1;

            self.mask_positions.push(MaskPositions {
                compressed_sizes,
                file_offsets,
            });
        }
        Ok(())
    }

    fn load_annotations(&mut self) -> Result<(), SlideError> {
        let doc = self.open_document(ANNOTATION_RECORD_FILE)?;
        let mut cursor = match decode_record::<DataTableHeaderRecord70>(&doc, 0) {
            DecodeStep::Matched { next, .. } => next,
            _ => 0,
        };

        loop {
            let Some((_, next)) = get_integer(&doc, cursor, "theTimepointIndex") else {
                break;
            };
            cursor = next;
            let mut annotations = TimepointAnnotations::default();

            let Some((count, next)) = get_integer(&doc, cursor, "theCubeAnnotation70ListSize")
            else {
                break;
            };
            cursor = next;
            for _ in 0..count.max(0) {
                let Some((record, next)) =
                    CubeAnnotation70::decode_chained(&doc, cursor).into_matched()
                else {
                    break;
                };
                annotations.cubes.push(record);
                cursor = next;
            }

            let Some((count, next)) = get_integer(&doc, cursor, "theAnnotation70ListSize") else {
                break;
            };
            cursor = next;
            for _ in 0..count.max(0) {
                let Some((record, next)) =
                    decode_record::<Annotation70>(&doc, cursor).into_matched()
                else {
                    break;
                };
                annotations.bases.push(record);
                cursor = next;
            }

            let Some((count, next)) =
                get_integer(&doc, cursor, "theFRAPRegionAnnotation70ListSize")
            else {
                break;
            };
            cursor = next;
            for _ in 0..count.max(0) {
                let Some((record, next)) =
                    FrapRegionAnnotation70::decode_chained(&doc, cursor).into_matched()
                else {
                    break;
                };
                annotations.frap_regions.push(record);
                cursor = next;
            }

            let Some((count, next)) = get_integer(&doc, cursor, "theUnknownAnnotation70ListSize")
            else {
                break;
            };
            cursor = next;
            for _ in 0..count.max(0) {
                let Some((record, next)) =
                    UnknownAnnotation70::decode_chained(&doc, cursor).into_matched()
                else {
                    break;
                };
                annotations.unknowns.push(record);
                cursor = next;
            }

            self.annotations.push(annotations);
        }
        Ok(())
    }

    fn load_elapsed_times(&mut self) -> Result<(), SlideError> {
        let doc = self.open_document(ELAPSED_TIMES_FILE)?;
        let Some((key, value)) = doc.entries().first() else {
            return Err(DocError::MissingKey {
                expected: "theElapsedTimes",
                index: 0,
            }
            .into());
        };
        if key != "theElapsedTimes" {
            return Err(DocError::MissingKey {
                expected: "theElapsedTimes",
                index: 0,
            }
            .into());
        }
        self.elapsed_times = int_array(value, "theElapsedTimesVector", true);
        Ok(())
    }

    fn load_sa_positions(&mut self) -> Result<(), SlideError> {
        let doc = self.open_document(SA_POSITION_DATA_FILE)?;
        let Some((image_count, mut cursor)) = get_integer(&doc, 0, "theImageCount") else {
            return Ok(());
        };
        let entries = doc.entries();
        for _ in 0..image_count.max(0) {
            let Some((key, value)) = entries.get(cursor) else {
                break;
            };
            if key != "theSAPositions" {
                break;
            }
            self.sa_positions.push(int_array(value, "theSAPositions", true));
            cursor += 1;
        }
        Ok(())
    }

    fn load_stage_positions(&mut self) -> Result<(), SlideError> {
        let doc = self.open_document(STAGE_POSITION_DATA_FILE)?;
        let Some((_, cursor)) = get_integer(&doc, 0, "StructArraySize") else {
            return Ok(());
        };
        let Some((key, value)) = doc.entries().get(cursor) else {
            return Err(DocError::MissingKey {
                expected: "StructArrayValues",
                index: cursor,
            }
            .into());
        };
        if key != "StructArrayValues" {
            return Err(DocError::MissingKey {
                expected: "StructArrayValues",
                index: cursor,
            }
            .into());
        }
        let flat = float_array(value, "theStagePositionData", false);
        self.stage_positions = flat
            .chunks_exact(3)
            .map(|triple| Point3::new(triple[0], triple[1], triple[2]))
            .collect();
        Ok(())
    }

    fn load_aux_data(&mut self) -> Result<(), SlideError> {
        let doc = self.open_document(AUX_DATA_FILE)?;
        let entries = doc.entries();

        let Some((count, mut cursor)) = get_integer(&doc, 0, "theAuxFloatDataTablesSize") else {
            return Ok(());
        };
        for _ in 0..count.max(0) {
            let (descriptor, value, next) = read_aux_table(&doc, entries, cursor)?;
            self.aux_float.push(AuxTable {
                xml_descriptor: descriptor,
                values: float_array(value, "theAuxFloatData", true),
            });
            cursor = next;
        }

        let Some((count, next)) = get_integer(&doc, cursor, "theAuxDoubleDataTablesSize") else {
            return Ok(());
        };
        cursor = next;
        for _ in 0..count.max(0) {
            let (descriptor, value, next) = read_aux_table(&doc, entries, cursor)?;
            self.aux_double.push(AuxTable {
                xml_descriptor: descriptor,
                values: crate::doc::double_array(value, "theAuxDoubleData", true),
            });
            cursor = next;
        }

        let Some((count, next)) = get_integer(&doc, cursor, "theAuxSInt32DataTablesSize") else {
            return Ok(());
        };
        cursor = next;
        for _ in 0..count.max(0) {
            let (descriptor, value, next) = read_aux_table(&doc, entries, cursor)?;
            self.aux_sint32.push(AuxTable {
                xml_descriptor: descriptor,
                values: int_array(value, "theAuxSInt32Data", true),
            });
            cursor = next;
        }

        let Some((count, next)) = get_integer(&doc, cursor, "theAuxSInt64DataTablesSize") else {
            return Ok(());
        };
        cursor = next;
        for _ in 0..count.max(0) {
            let (descriptor, value, next) = read_aux_table(&doc, entries, cursor)?;
            self.aux_sint64.push(AuxTable {
                xml_descriptor: descriptor,
                values: long_array(value, "theAuxSInt64Data", true),
            });
            cursor = next;
        }

        let Some((count, next)) = get_integer(&doc, cursor, "theAuxSerializedDataTablesSize")
        else {
            return Ok(());
        };
        cursor = next;
        for _ in 0..count.max(0) {
            if let DecodeStep::Matched { next, .. } =
                decode_record::<DataTableHeaderRecord70>(&doc, cursor)
            {
                cursor = next;
            }
            let Some((descriptor, next)) = get_string(&doc, cursor, "theXMLDescriptor", true)
            else {
                break;
            };
            cursor = next;
            if let Some((_, next)) = get_integer(&doc, cursor, "theXmlAuxDataSize") {
                cursor = next;
            }
            let Some((xml, next)) = get_string(&doc, cursor, "theXmlAuxData", true) else {
                break;
            };
            cursor = next;
            self.aux_xml.push(AuxXml {
                xml_descriptor: descriptor,
                xml,
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Dimensions and metadata accessors
    // -------------------------------------------------------------------------

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn name(&self) -> &str {
        &self.image_record.name
    }

    pub fn info(&self) -> &str {
        &self.image_record.info
    }

    pub fn width(&self) -> usize {
        self.image_record.width.max(0) as usize
    }

    pub fn height(&self) -> usize {
        self.image_record.height.max(0) as usize
    }

    pub fn num_planes(&self) -> usize {
        self.image_record.num_planes.max(1) as usize
    }

    pub fn num_channels(&self) -> usize {
        self.image_record.num_channels.max(1) as usize
    }

    /// Stored timepoint count; positions are still folded in.
    pub fn num_timepoints_raw(&self) -> usize {
        self.image_record.num_timepoints.max(1) as usize
    }

    /// Number of distinct stage positions.
    ///
    /// Counted as the run of entries whose (x, y) prefix differs from the
    /// first entry's; z differences at the same (x, y) do not open a new
    /// position.
    pub fn num_positions(&self) -> usize {
        if self.stage_positions.len() <= 1 {
            return 1;
        }
        let first = self.stage_positions[0];
        let mut unique = 1;
        for point in &self.stage_positions[1..] {
            if point.x == first.x && point.y == first.y {
                break;
            }
            unique += 1;
        }
        unique
    }

    /// Timepoints per position.
    pub fn num_timepoints(&self) -> usize {
        (self.num_timepoints_raw() / self.num_positions()).max(1)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    pub fn pixel_signed(&self) -> bool {
        self.pixel_signed
    }

    pub fn is_single_timepoint_file(&self) -> bool {
        self.single_timepoint_file
    }

    pub fn elapsed_time_ms(&self, timepoint: usize) -> i32 {
        self.elapsed_times.get(timepoint).copied().unwrap_or(0)
    }

    pub fn elapsed_times(&self) -> &[i32] {
        &self.elapsed_times
    }

    pub fn channel_name(&self, channel: usize) -> &str {
        self.channel_records
            .get(channel)
            .map(|record| record.channel_def.name.as_str())
            .unwrap_or("")
    }

    pub fn exposure_time_ms(&self, channel: usize) -> i32 {
        self.channel_records
            .get(channel)
            .map(|record| record.exposure.exposure_time)
            .unwrap_or(0)
    }

    pub fn lens_name(&self) -> &str {
        &self.image_record.lens.name
    }

    /// Total magnification: lens actual magnification times the optovar's.
    pub fn magnification(&self) -> f64 {
        self.image_record.lens.actual_magnification as f64
            * self.image_record.optovar.magnification as f64
    }

    /// Physical pixel pitch in microns.
    pub fn voxel_size_um(&self) -> f32 {
        let mut size = self.image_record.lens.micron_per_pixel;
        let optovar = self.image_record.optovar.magnification;
        if optovar > 0.0 {
            size /= optovar;
        }
        let x_factor = self
            .channel_records
            .first()
            .map(|record| record.exposure.x_factor)
            .unwrap_or(0);
        if x_factor > 0 {
            size *= x_factor as f32;
        }
        size
    }

    pub fn interplane_spacing_um(&self) -> f32 {
        self.channel_records
            .first()
            .map(|record| record.exposure.interplane_spacing)
            .unwrap_or(0.0)
    }

    pub fn stage_x_um(&self, position: usize) -> f32 {
        self.stage_positions
            .get(position)
            .map(|point| point.x)
            .unwrap_or(0.0)
    }

    pub fn stage_y_um(&self, position: usize) -> f32 {
        self.stage_positions
            .get(position)
            .map(|point| point.y)
            .unwrap_or(0.0)
    }

    /// Stage z for a focal plane: recorded z plus the interplane spacing
    /// scaled by the plane index.
    pub fn stage_z_um(&self, position: usize, zplane: usize) -> f32 {
        let base = self
            .stage_positions
            .get(position)
            .map(|point| point.z)
            .unwrap_or(0.0);
        base + self.interplane_spacing_um() * zplane as f32
    }

    pub fn stage_positions(&self) -> &[Point3<f32>] {
        &self.stage_positions
    }

    pub fn sa_positions(&self) -> &[Vec<i32>] {
        &self.sa_positions
    }

    pub fn annotations(&self) -> &[TimepointAnnotations] {
        &self.annotations
    }

    pub fn mask_records(&self) -> &[MaskRecord70] {
        &self.mask_records
    }

    pub fn mask_positions(&self) -> &[MaskPositions] {
        &self.mask_positions
    }

    pub fn channel_records(&self) -> &[ChannelRecord70] {
        &self.channel_records
    }

    pub fn remap_luts(&self) -> &[RemapChannelLut70] {
        &self.remap_luts
    }

    pub fn align_manips(&self) -> &[AlignManipRecord70] {
        &self.align_manips
    }

    pub fn ratio_manips(&self) -> &[RatioManipRecord70] {
        &self.ratio_manips
    }

    pub fn fret_manips(&self) -> &[FretManipRecord70] {
        &self.fret_manips
    }

    pub fn remap_manips(&self) -> &[RemapManipRecord70] {
        &self.remap_manips
    }

    pub fn histogram_records(&self) -> &[HistogramRecord70] {
        &self.histogram_records
    }

    pub fn aux_float_tables(&self) -> &[AuxTable<f32>] {
        &self.aux_float
    }

    pub fn aux_double_tables(&self) -> &[AuxTable<f64>] {
        &self.aux_double
    }

    pub fn aux_sint32_tables(&self) -> &[AuxTable<i32>] {
        &self.aux_sint32
    }

    pub fn aux_sint64_tables(&self) -> &[AuxTable<i64>] {
        &self.aux_sint64
    }

    pub fn aux_xml_tables(&self) -> &[AuxXml] {
        &self.aux_xml
    }

    pub fn image_record(&self) -> &ImageRecord70 {
        &self.image_record
    }

    // -------------------------------------------------------------------------
    // Plane reads
    // -------------------------------------------------------------------------

    /// Bytes in one decoded 2-D plane.
    pub fn plane_size(&self) -> usize {
        self.width() * self.height() * self.bytes_per_pixel
    }

    /// Read one plane into the caller's buffer.
    ///
    /// For single-file-multi-timepoint groups the timepoint selects the slab
    /// inside the channel's timepoint-zero file; otherwise the z plane does.
    pub fn read_plane(
        &mut self,
        handles: &mut HandleCache,
        timepoint: usize,
        zplane: usize,
        channel: usize,
        buf: &mut [u8],
    ) -> Result<(), SlideError> {
        let width = self.width() as u64;
        let height = self.height() as u64;
        let single_plane = self.image_record.num_planes == 1;
        let sfmt = self.single_timepoint_file;

        let mut path = self.layout.image_data_path(&self.title, channel, timepoint);
        if single_plane && timepoint > 0 && sfmt {
            path = layout::rename_to_tp0(&path);
        }
        trace!(path = %path.display(), timepoint, zplane, channel, "reading plane");

        let stream = handles.get(&path)?;

        let refresh = match &self.plane_cache {
            Some(cache) => cache.channel != channel || cache.timepoint != timepoint,
            None => true,
        };
        if refresh {
            let header = NpyHeader::parse(stream)?;
            let mut blocks = header
                .is_compressed()
                .then(|| BlockReader::new(&header, width, height));
            if let Some(blocks) = blocks.as_mut() {
                blocks.read_dictionary(stream)?;
            }
            trace!(compressed = header.is_compressed(), "reset plane cache");
            self.plane_cache = Some(PlaneCache {
                channel,
                timepoint,
                header,
                blocks,
            });
        }

        let Some(cache) = self.plane_cache.as_mut() else {
            return Err(SlideError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "plane cache unavailable",
            )));
        };
        let plane_size = (width * height) as usize * cache.header.bytes_per_pixel;
        if buf.len() < plane_size {
            return Err(SlideError::BufferTooSmall {
                needed: plane_size,
                got: buf.len(),
            });
        }

        match cache.blocks.as_mut() {
            None => {
                let index = if single_plane && sfmt { timepoint } else { zplane };
                let offset = cache.header.header_size + (plane_size as u64) * index as u64;
                stream.seek(SeekFrom::Start(offset))?;
                stream.read_exact(&mut buf[..plane_size])?;
            }
            Some(blocks) => {
                let data = blocks.read_block(stream, zplane)?;
                if data.len() < plane_size {
                    return Err(SlideError::ShortBlock {
                        needed: plane_size,
                        got: data.len(),
                    });
                }
                buf[..plane_size].copy_from_slice(&data[..plane_size]);
            }
        }
        Ok(())
    }
}

fn probe_header(path: &Path) -> Result<NpyHeader, SlideError> {
    let mut file = std::fs::File::open(path)?;
    Ok(NpyHeader::parse(&mut file)?)
}

fn read_aux_table<'doc>(
    doc: &'doc Document,
    entries: &'doc [(String, crate::doc::Value)],
    mut cursor: usize,
) -> Result<(String, &'doc crate::doc::Value, usize), SlideError> {
    if let DecodeStep::Matched { next, .. } = decode_record::<DataTableHeaderRecord70>(doc, cursor)
    {
        cursor = next;
    }
    let Some((descriptor, next)) = get_string(doc, cursor, "theXMLDescriptor", true) else {
        return Err(DocError::MissingKey {
            expected: "theXMLDescriptor",
            index: cursor,
        }
        .into());
    };
    cursor = next;
    let Some((key, value)) = entries.get(cursor) else {
        return Err(DocError::MissingKey {
            expected: "theAuxData",
            index: cursor,
        }
        .into());
    };
    if key != "theAuxData" {
        return Err(DocError::MissingKey {
            expected: "theAuxData",
            index: cursor,
        }
        .into());
    }
    Ok((descriptor, value, cursor + 1))
}
