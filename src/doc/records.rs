//! Typed records stored in the metadata documents.
//!
//! Each record mirrors one class the acquisition software serialises between
//! `StartClass` / `EndClass` sentinels. The `record!` macro declares the
//! static wire-key-to-field table that drives [`Record::assign`]; composite
//! records additionally chain their trailing sub-records with an explicit
//! cursor, in the order the software writes them.
//!
//! Field names keep the source vocabulary (struct ids, file-offset pointers,
//! hardware positions) even where this reader never dereferences them, so a
//! decoded record is a faithful image of the stored one.

use tracing::trace;

use super::decode::{coerce, decode_record, get_integer, DecodeStep, Record};
use super::{int_array, Value};

// =============================================================================
// Geometry
// =============================================================================

/// A three-component point, used for stage positions, micron offsets and
/// annotation vertices.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> Point3<T> {
    pub fn new(x: T, y: T, z: T) -> Self {
        Point3 { x, y, z }
    }
}

// =============================================================================
// Record declaration macro
// =============================================================================

macro_rules! record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident($class:literal) {
            $( $key:literal => $field:ident: $kind:tt, )*
        }
        $( extra { $( $(#[$emeta:meta])* $efield:ident: $ety:ty, )* } )?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default)]
        pub struct $name {
            $( pub $field: record!(@ty $kind), )*
            $( $( $(#[$emeta])* pub $efield: $ety, )* )?
        }

        impl Record for $name {
            const CLASS_NAME: &'static str = $class;

            fn assign(&mut self, key: &str, value: &Value) -> bool {
                match key {
                    $( $key => {
                        record!(@set $kind, &mut self.$field, key, value);
                        true
                    } )*
                    _ => false,
                }
            }
        }
    };

    (@ty i32) => { i32 };
    (@ty i64) => { i64 };
    (@ty f32) => { f32 };
    (@ty f64) => { f64 };
    (@ty bool) => { bool };
    (@ty string) => { String };
    (@ty vec_i32) => { Vec<i32> };
    (@ty vec_i64) => { Vec<i64> };
    (@ty vec_f32) => { Vec<f32> };
    (@ty vec_f64) => { Vec<f64> };
    (@ty vec_bool) => { Vec<bool> };

    (@set i32, $slot:expr, $key:expr, $value:expr) => { coerce::set_i32($slot, $key, $value) };
    (@set i64, $slot:expr, $key:expr, $value:expr) => { coerce::set_i64($slot, $key, $value) };
    (@set f32, $slot:expr, $key:expr, $value:expr) => { coerce::set_f32($slot, $key, $value) };
    (@set f64, $slot:expr, $key:expr, $value:expr) => { coerce::set_f64($slot, $key, $value) };
    (@set bool, $slot:expr, $key:expr, $value:expr) => { coerce::set_bool($slot, $key, $value) };
    (@set string, $slot:expr, $key:expr, $value:expr) => { coerce::set_string($slot, $key, $value) };
    (@set vec_i32, $slot:expr, $key:expr, $value:expr) => { coerce::set_vec_i32($slot, $key, $value) };
    (@set vec_i64, $slot:expr, $key:expr, $value:expr) => { coerce::set_vec_i64($slot, $key, $value) };
    (@set vec_f32, $slot:expr, $key:expr, $value:expr) => { coerce::set_vec_f32($slot, $key, $value) };
    (@set vec_f64, $slot:expr, $key:expr, $value:expr) => { coerce::set_vec_f64($slot, $key, $value) };
    (@set vec_bool, $slot:expr, $key:expr, $value:expr) => { coerce::set_vec_bool($slot, $key, $value) };
}

// =============================================================================
// Slide and image records
// =============================================================================

record! {
    /// Top-level slide record carried in the sentinel file.
    pub struct SlideRecord70("CSlideRecord70") {
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mNotesLen" => notes_len: i32,
        "mNumImages" => num_images: i32,
        "mNotesPtr" => notes_ptr: i64,
        "mImagePtr" => image_ptr: i64,
        "mPrefsFileLen" => prefs_file_len: i32,
        "mPrefsOffset" => prefs_offset: i32,
        "mHardwareFileOffset" => hardware_file_offset: i32,
        "mHighestCount" => highest_count: i32,
        "mUncompactedSpace" => uncompacted_space: i32,
        "mCheckpointNumImages" => checkpoint_num_images: i32,
        "mCheckpointImagePtr" => checkpoint_image_ptr: i64,
        "mCheckpointMaxImages" => checkpoint_max_images: i32,
        "mHardwareFileLen" => hardware_file_len: i32,
        "mCaptureStatus" => capture_status: i32,
        "mDemoFlag" => demo_flag: i32,
        "mName" => name: string,
        "mProjectFolder" => project_folder: string,
        "mSpecialBuildStr" => special_build_str: string,
        "mFileVersion" => file_version: vec_i32,
    }
}

record! {
    /// Per-capture image record: dimensions, acquisition timestamp and table
    /// pointers, followed on the wire by the lens, optovar and main view
    /// definitions.
    pub struct ImageRecord70("CImageRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mYear" => year: i32,
        "mMonth" => month: i32,
        "mDay" => day: i32,
        "mHour" => hour: i32,
        "mMinute" => minute: i32,
        "mSecond" => second: i32,
        "mImported" => imported: bool,
        "mNotesLen" => notes_len: i32,
        "mNotesPtr" => notes_ptr: i64,
        "mWidth" => width: i32,
        "mHeight" => height: i32,
        "mNumPlanes" => num_planes: i32,
        "mNumChannels" => num_channels: i32,
        "mChannelPtr" => channel_ptr: i64,
        "mNumTimepoints" => num_timepoints: i32,
        "mNumMasks" => num_masks: i32,
        "mMaskPtr" => mask_ptr: i64,
        "mNumViews" => num_views: i32,
        "mViewPtr" => view_ptr: i64,
        "mXYInterpolationFactor" => xy_interpolation_factor: i32,
        "mZInterpolationFactor" => z_interpolation_factor: i32,
        "mImageGroupIndex" => image_group_index: i32,
        "mAnnotationTablePtr" => annotation_table_ptr: i64,
        "mElapsedTimeTablePtr" => elapsed_time_table_ptr: i64,
        "mSAPositionTablePtr" => sa_position_table_ptr: i64,
        "mStagePositionTablePtr" => stage_position_table_ptr: i64,
        "mAuxDataTablePtr" => aux_data_table_ptr: i64,
        "mNumAuxDataTables" => num_aux_data_tables: i32,
        "mThumbNail" => thumb_nail: vec_i64,
        "mElapsedTimeOffset" => elapsed_time_offset: i32,
        "mName" => name: string,
        "mInfo" => info: string,
        "mUniqueId" => unique_id: string,
    }
    extra {
        lens: LensDef70,
        optovar: OptovarDef70,
        main_view: MainViewRecord70,
    }
}

impl ImageRecord70 {
    /// Decode the image record together with its chained optical definitions.
    pub fn decode_chained(doc: &super::Document, start: usize) -> DecodeStep<Self> {
        let (mut record, mut cursor) = match decode_record::<Self>(doc, start) {
            DecodeStep::Matched { record, next } => (record, next),
            DecodeStep::NotThisClass => return DecodeStep::NotThisClass,
            DecodeStep::EndOfRecords => return DecodeStep::EndOfRecords,
        };
        if let DecodeStep::Matched { record: lens, next } = decode_record(doc, cursor) {
            record.lens = lens;
            cursor = next;
        }
        if let DecodeStep::Matched {
            record: optovar,
            next,
        } = decode_record(doc, cursor)
        {
            record.optovar = optovar;
            cursor = next;
        }
        if let DecodeStep::Matched {
            record: main_view,
            next,
        } = decode_record(doc, cursor)
        {
            record.main_view = main_view;
            cursor = next;
        }
        DecodeStep::Matched {
            record,
            next: cursor,
        }
    }
}

record! {
    /// Objective lens definition.
    pub struct LensDef70("CLensDef70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mName" => name: string,
        "mNA" => na: f32,
        "mdf" => df: f32,
        "mMicronPerPixel" => micron_per_pixel: f32,
        "mDeprecatedMagnification" => deprecated_magnification: i32,
        "mMedium" => medium: i32,
        "mUV" => uv: bool,
        "mTurretPosition" => turret_position: i32,
        "mParfocalOffset" => parfocal_offset: i32,
        "mDefault" => is_default: bool,
        "mParfocalOffset2" => parfocal_offset2: i32,
        "mParcentricOffsetX" => parcentric_offset_x: f32,
        "mParcentricOffsetY" => parcentric_offset_y: f32,
        "mBrightfieldPos" => brightfield_pos: i32,
        "mDarkfieldPos" => darkfield_pos: i32,
        "mDICPos" => dic_pos: i32,
        "mPhasePos" => phase_pos: i32,
        "mTLFieldDiaphramPos" => tl_field_diaphram_pos: i32,
        "mTLApertureDiaphramPos" => tl_aperture_diaphram_pos: i32,
        "mDICPrismPos" => dic_prism_pos: i32,
        "mTopLensPos" => top_lens_pos: i32,
        "mPolarizerPos" => polarizer_pos: i32,
        "mCameraName" => camera_name: string,
        "mCameraPixelSize" => camera_pixel_size: f32,
        "mCameraMagnificationChange" => camera_magnification_change: f32,
        "mActualMagnification" => actual_magnification: f32,
    }
}

record! {
    /// Optovar (intermediate magnification changer) definition.
    pub struct OptovarDef70("COptovarDef70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mName" => name: string,
        "mMagnification" => magnification: f32,
        "mDefault" => is_default: bool,
        "mTurretPosition" => turret_position: i32,
    }
}

record! {
    /// Display view settings stored alongside the image record.
    pub struct MainViewRecord70("CMainViewRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mViewID" => view_id: i32,
        "mRedChannel" => red_channel: i32,
        "mGreenChannel" => green_channel: i32,
        "mBlueChannel" => blue_channel: i32,
        "mBkgndChannel" => bkgnd_channel: i32,
        "mLow" => low: vec_i32,
        "mHigh" => high: vec_i32,
        "mColorDisplay" => color_display: i32,
        "mPseudoFrom" => pseudo_from: f32,
        "mPseudoTo" => pseudo_to: f32,
        "mThumbPlane" => thumb_plane: i32,
        "mViewOptions" => view_options: i32,
        "mGamma" => gamma: vec_f32,
        "mHue" => hue: vec_i32,
        "mSaturation" => saturation: vec_i32,
        "mValue" => value: vec_i32,
        "mChannelEnabled" => channel_enabled: vec_i32,
        "mBitDepth" => bit_depth: vec_i32,
        "mBlendFraction" => blend_fraction: f32,
        "mThumbTimePoint" => thumb_time_point: i32,
    }
}

// =============================================================================
// Channel records
// =============================================================================

record! {
    /// Per-channel record, followed on the wire by the exposure record and
    /// channel definition.
    pub struct ChannelRecord70("CChannelRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mNumPlanes" => num_planes: i32,
        "mNumManip" => num_manip: i32,
        "mManipPtr" => manip_ptr: i64,
        "mDataType" => data_type: i32,
        "mDataTablePtr" => data_table_ptr: i64,
        "mHistogramTablePtr" => histogram_table_ptr: i64,
        "mHistogramSummaryPtr" => histogram_summary_ptr: i64,
    }
    extra {
        exposure: ExposureRecord70,
        channel_def: ChannelDef70,
    }
}

impl ChannelRecord70 {
    /// Decode the channel record together with its chained exposure record
    /// and channel definition.
    pub fn decode_chained(doc: &super::Document, start: usize) -> DecodeStep<Self> {
        let (mut record, mut cursor) = match decode_record::<Self>(doc, start) {
            DecodeStep::Matched { record, next } => (record, next),
            DecodeStep::NotThisClass => return DecodeStep::NotThisClass,
            DecodeStep::EndOfRecords => return DecodeStep::EndOfRecords,
        };
        if let DecodeStep::Matched {
            record: exposure,
            next,
        } = decode_record(doc, cursor)
        {
            record.exposure = exposure;
            cursor = next;
        }
        if let DecodeStep::Matched {
            record: channel_def,
            next,
        } = ChannelDef70::decode_chained(doc, cursor)
        {
            record.channel_def = channel_def;
            cursor = next;
        }
        DecodeStep::Matched {
            record,
            next: cursor,
        }
    }
}

record! {
    /// Exposure settings for one channel.
    pub struct ExposureRecord70("CExposureRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mAuxZStartPosition" => aux_z_start_position: f32,
        "mExposureTime" => exposure_time: i32,
        "mXOffset" => x_offset: i32,
        "mYOffset" => y_offset: i32,
        "mXExtent" => x_extent: i32,
        "mYExtent" => y_extent: i32,
        "mBinning" => binning: bool,
        "mTimeLapse" => time_lapse: bool,
        "mCaptureType" => capture_type: i32,
        "mXFactor" => x_factor: i32,
        "mYFactor" => y_factor: i32,
        "mNumPlanes" => num_planes: i32,
        // number of planes per sample in a SA sweep
        "mNuTSACSampleSize" => nu_tsac_sample_size: i32,
        "mScanning" => scanning: bool,
        "mInterplaneSpacing" => interplane_spacing: f32,
        "mInitialOffset" => initial_offset: f32,
        "mTimeLapseInterval" => time_lapse_interval: i32,
        "mCaptureSetId" => capture_set_id: i32,
        "mXStartPosition" => x_start_position: f32,
        "mYStartPosition" => y_start_position: f32,
        "mZStartPosition" => z_start_position: f32,
        "mCaptureFlags" => capture_flags: i32,
        "mAuxCaptureFlags" => aux_capture_flags: i32,
        // negative if moving the stage right decreases stage x values
        "mMoveFieldRightSign" => move_field_right_sign: i32,
        "mMoveFieldDownSign" => move_field_down_sign: i32,
    }
}

record! {
    /// Channel naming, followed on the wire by the fluorophore definition.
    pub struct ChannelDef70("CChannelDef70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mName" => name: string,
        "mCameraName" => camera_name: string,
    }
    extra {
        fluor: FluorDef70,
    }
}

impl ChannelDef70 {
    /// Decode the channel definition together with its fluorophore record.
    pub fn decode_chained(doc: &super::Document, start: usize) -> DecodeStep<Self> {
        let (mut record, mut cursor) = match decode_record::<Self>(doc, start) {
            DecodeStep::Matched { record, next } => (record, next),
            DecodeStep::NotThisClass => return DecodeStep::NotThisClass,
            DecodeStep::EndOfRecords => return DecodeStep::EndOfRecords,
        };
        if let DecodeStep::Matched { record: fluor, next } = decode_record(doc, cursor) {
            record.fluor = fluor;
            cursor = next;
        }
        DecodeStep::Matched {
            record,
            next: cursor,
        }
    }
}

record! {
    /// Fluorophore and light-path configuration for one channel.
    pub struct FluorDef70("CFluorDef70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mName" => name: string,
        "mLaserPowerPos" => laser_power_pos: i32,
        "mCameraBitDepth" => camera_bit_depth: i32,
        "mAuxFilterWheel7Pos" => aux_filter_wheel7_pos: i32,
        "mNumExposuresAverage" => num_exposures_average: i32,
        "mExcitationLambda" => excitation_lambda: f32,
        "mAuxFilterWheel5Pos" => aux_filter_wheel5_pos: i32,
        "mAuxFilterWheel6Pos" => aux_filter_wheel6_pos: i32,
        "mLambda" => lambda: f32,
        "mTurretPosition" => turret_position: i32,
        "mUV" => uv: bool,
        "mImagingMode" => imaging_mode: i32,
        "mExcitationWheelPos" => excitation_wheel_pos: i32,
        "mEmissionWheelPos" => emission_wheel_pos: i32,
        "mLightSource" => light_source: i32,
        "mTransmittedModePrompt" => transmitted_mode_prompt: bool,
        "mLambdaOptions" => lambda_options: i32,
        "mAuxFilterWheel4Pos" => aux_filter_wheel4_pos: i32,
        "mDefaultColor" => default_color: i32,
        "mChannelType" => channel_type: i32,
        "mLCDPos" => lcd_pos: i32,
        "mTIRFPos" => tirf_pos: i32,
        "mRGBFactor" => rgb_factor: vec_f32,
        "mFilterSet" => filter_set: i32,
        "mCamera" => camera: i32,
        "mOcularPhotoTurretPos" => ocular_photo_turret_pos: i32,
        "mCameraVideoTurretPos" => camera_video_turret_pos: i32,
        "mIlluminationMode" => illumination_mode: i32,
        "mAltSourcePosition" => alt_source_position: i32,
        "mCameraGain" => camera_gain: i32,
        "mCameraSpeed" => camera_speed: i32,
        "mCameraIntensification" => camera_intensification: i32,
        "mCameraPort" => camera_port: i32,
        "mCameraParameter1" => camera_parameter1: i32,
        "mNDPos" => nd_pos: i32,
        "mHue" => hue: i32,
        "mSaturation" => saturation: i32,
        "mValue" => value: i32,
        "mAuxFilterWheelPos" => aux_filter_wheel_pos: i32,
        "mDefaultColorDisplay" => default_color_display: i32,
        "mAuxNDPos" => aux_nd_pos: i32,
        "mAuxFilterWheel2Pos" => aux_filter_wheel2_pos: i32,
        "mAuxFilterWheel3Pos" => aux_filter_wheel3_pos: i32,
    }
}

// =============================================================================
// Per-channel manipulation records
// =============================================================================

record! {
    /// Channel alignment offsets.
    pub struct AlignManipRecord70("CAlignManipRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mManipID" => manip_id: i32,
        "mXOffset" => x_offset: f32,
        "mYOffset" => y_offset: f32,
        "mZOffset" => z_offset: f32,
    }
}

record! {
    /// Ratio-imaging calibration.
    pub struct RatioManipRecord70("CRatioManipRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mManipID" => manip_id: i32,
        "mKd" => kd: f32,
        "mRmin" => rmin: f32,
        "mRmax" => rmax: f32,
        "mBeta" => beta: f32,
        "mRlow" => rlow: f32,
        "mRhigh" => rhigh: f32,
        "mNumBackground" => num_background: i32,
        "mDenBackground" => den_background: i32,
        "mExposureFactor" => exposure_factor: f32,
        "mBackX1" => back_x1: i32,
        "mBackY1" => back_y1: i32,
        "mBackX2" => back_x2: i32,
        "mBackY2" => back_y2: i32,
        "mNumMin" => num_min: i32,
        "mNumMax" => num_max: i32,
        "mDenMin" => den_min: i32,
        "mDenMax" => den_max: i32,
    }
}

record! {
    /// FRET analysis parameters.
    pub struct FretManipRecord70("CFRETManipRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mManipID" => manip_id: i32,
        "mFRETParadigm" => fret_paradigm: i32,
        "mFdDd" => fd_dd: f32,
        "mFaAa" => fa_aa: f32,
        "mDisplayLow" => display_low: f32,
        "mDisplayHigh" => display_high: f32,
        "mDisplayNormalization" => display_normalization: i32,
        "mSignalThreshold" => signal_threshold: f32,
        "mPhaseZero" => phase_zero: f32,
        "mModZero" => mod_zero: f32,
        "mDonor1Lifetime" => donor1_lifetime: f32,
        "mDonor1X" => donor1_x: f32,
        "mDonor1Y" => donor1_y: f32,
        "mDonor2Lifetime" => donor2_lifetime: f32,
        "mTwoLifetimeRatio" => two_lifetime_ratio: f32,
        "mMainFrequency" => main_frequency: f32,
        "mPhaseFlatFieldCorrected" => phase_flat_field_corrected: bool,
        "mModulationFlatFieldCorrected" => modulation_flat_field_corrected: bool,
        "mNumPhases" => num_phases: i32,
        "mDarkValue" => dark_value: i32,
        "mFRETMethod" => fret_method: i32,
        "mFRETAddParameter" => fret_add_parameter: f32,
    }
}

record! {
    /// Intensity remap calibration pointers.
    pub struct RemapManipRecord70("CRemapManipRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mManipID" => manip_id: i32,
        "mRemapType" => remap_type: i32,
        "mNumCalibPoints" => num_calib_points: i32,
        "mReserved2" => reserved2: i32,
        "mCalibDataPtrLow" => calib_data_ptr_low: i64,
        "mCalibDataPtrHigh" => calib_data_ptr_high: i64,
    }
}

record! {
    /// Per-channel intensity remap lookup table.
    pub struct RemapChannelLut70("CRemapChannelLUT70") {
        "mCoefficients" => coefficients: vec_f64,
        "mValues" => values: vec_f32,
        "mInsideRange" => inside_range: vec_bool,
        "mLowDesired" => low_desired: f32,
        "mHighDesired" => high_desired: f32,
        "mLowGiven" => low_given: i32,
        "mHighGiven" => high_given: i32,
        "mBuiltTable" => built_table: bool,
        "mRemapType" => remap_type: i32,
        "mEquationString" => equation_string: string,
    }
}

record! {
    /// Summary histogram for one channel/image pair.
    pub struct HistogramRecord70("CHistogramRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mMin" => min: i32,
        "mMax" => max: i32,
        "mMean" => mean: f32,
        "mHistogramType" => histogram_type: i32,
        "mNumBins" => num_bins: i32,
        "mDataBlockSize" => data_block_size: i32,
        "mChannelIndex" => channel_index: i32,
        "mImageIndex" => image_index: i32,
    }
}

// =============================================================================
// Masks and auxiliary tables
// =============================================================================

record! {
    /// Mask naming and table pointers.
    pub struct MaskRecord70("CMaskRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mName" => name: string,
        "mNumManip" => num_manip: i32,
        "mManipPtr" => manip_ptr: i64,
        "mMaskDataTablePtr" => mask_data_table_ptr: i64,
        "mPersistentSubmasks" => persistent_submasks: i32,
        "mCentroidFeature" => centroid_feature: string,
        "mCentroidChannel" => centroid_channel: i32,
    }
}

record! {
    /// Header of an auxiliary data table.
    pub struct DataTableHeaderRecord70("CDataTableHeaderRecord70") {
        "mStructID" => struct_id: i32,
        "mStructVersion" => struct_version: i32,
        "mByteOrdering" => byte_ordering: i32,
        "mStructLen" => struct_len: i32,
        "mParentRecordPtr" => parent_record_ptr: i64,
        "mChannelIndex" => channel_index: i32,
        "mRows" => rows: i32,
        "mColumns" => columns: i32,
        "mPlanes" => planes: i32,
        "mValueType" => value_type: i32,
        "mTableType" => table_type: i32,
        "mTimeBasis" => time_basis: i32,
        "mDescriptorVersion" => descriptor_version: i32,
        "mDescriptorSize" => descriptor_size: i32,
        "mDescriptorFileOffset" => descriptor_file_offset: i64,
        "mStartTime" => start_time: i32,
        "mTimeInterval" => time_interval: i32,
        "mTimePointsWritten" => time_points_written: i32,
        "mTimePointsTableSize" => time_points_table_size: i32,
        "mNextTableFileOffset" => next_table_file_offset: i64,
    }
}

// =============================================================================
// Annotations
// =============================================================================

/// Geometric ROI annotation attached to a timepoint.
///
/// The micron offsets arrive as flattened dotted keys
/// (`mStageOffsetMicrons.mX`) and the vertex list arrives under a key that
/// varies by annotation kind; both are captured by the unknown-attribute hook.
#[derive(Debug, Clone, Default)]
pub struct Annotation70 {
    pub graphic_type: i32,
    pub dependency_type: i32,
    pub text: String,
    pub channel_mask: Vec<bool>,
    /// Timelapse or position capture group
    pub group_id: i32,
    /// Image plane
    pub plane_id: i32,
    /// Path id
    pub sequence_id: i32,
    /// Mask or submask id
    pub object_id: i32,
    pub dependency_ref: i32,
    pub version: i32,
    pub byte_ordering: i32,
    pub field_offset_microns: Point3<f64>,
    pub field_microns_per_pixel: f64,
    pub field_offset_set: bool,
    pub stage_offset_microns: Point3<f64>,
    pub stage_offset_set: bool,
    pub z_stage_increase_towards_sample: bool,
    pub aux_z_stage_microns: f64,
    pub aux_z_stage_microns_set: bool,
    pub aux_z_stage_increase_towards_sample: bool,
    pub z_stage_directions_valid: bool,
    pub store_micron_positions: bool,
    pub relative_power: f64,
    pub border_fill_pixels: i32,
    pub vertices: Vec<Point3<i32>>,
}

impl Record for Annotation70 {
    const CLASS_NAME: &'static str = "CAnnotation70";

    fn assign(&mut self, key: &str, value: &Value) -> bool {
        match key {
            "mGraphicType70" => coerce::set_i32(&mut self.graphic_type, key, value),
            "mDependencyType70" => coerce::set_i32(&mut self.dependency_type, key, value),
            "mText" => coerce::set_string(&mut self.text, key, value),
            "mChannelMask" => coerce::set_vec_bool(&mut self.channel_mask, key, value),
            "mGroupId" => coerce::set_i32(&mut self.group_id, key, value),
            "mPlaneId" => coerce::set_i32(&mut self.plane_id, key, value),
            "mSequenceId" => coerce::set_i32(&mut self.sequence_id, key, value),
            "mObjectId" => coerce::set_i32(&mut self.object_id, key, value),
            "mDependencyRef" => coerce::set_i32(&mut self.dependency_ref, key, value),
            "mVersion" => coerce::set_i32(&mut self.version, key, value),
            "mByteOrdering" => coerce::set_i32(&mut self.byte_ordering, key, value),
            "mFieldMicronsPerPixel" => {
                coerce::set_f64(&mut self.field_microns_per_pixel, key, value)
            }
            "mFieldOffsetSet" => coerce::set_bool(&mut self.field_offset_set, key, value),
            "mStageOffsetSet" => coerce::set_bool(&mut self.stage_offset_set, key, value),
            "mZStageIncreaseTowardsSample" => {
                coerce::set_bool(&mut self.z_stage_increase_towards_sample, key, value)
            }
            "mAuxZStageMicrons" => coerce::set_f64(&mut self.aux_z_stage_microns, key, value),
            "mAuxZStageMicronsSet" => {
                coerce::set_bool(&mut self.aux_z_stage_microns_set, key, value)
            }
            "mAuxZStageIncreaseTowardsSample" => {
                coerce::set_bool(&mut self.aux_z_stage_increase_towards_sample, key, value)
            }
            "mZStageDirectionsValid" => {
                coerce::set_bool(&mut self.z_stage_directions_valid, key, value)
            }
            "mStoreMicronPositions" => {
                coerce::set_bool(&mut self.store_micron_positions, key, value)
            }
            "mRelativePower" => coerce::set_f64(&mut self.relative_power, key, value),
            "mBorderFillPixels" => coerce::set_i32(&mut self.border_fill_pixels, key, value),
            _ => return false,
        }
        true
    }

    fn assign_unknown(&mut self, key: &str, value: &Value) {
        trace!(key, "annotation unknown attribute");
        match value {
            Value::Scalar(text) => {
                let Ok(parsed) = text.trim().parse::<f64>() else {
                    return;
                };
                match key {
                    "mStageOffsetMicrons.mX" => self.stage_offset_microns.x = parsed,
                    "mStageOffsetMicrons.mY" => self.stage_offset_microns.y = parsed,
                    "mFieldOffsetMicrons.mX" => self.field_offset_microns.x = parsed,
                    "mFieldOffsetMicrons.mY" => self.field_offset_microns.y = parsed,
                    _ => {}
                }
            }
            Value::Sequence(_) => {
                let flat = int_array(value, key, false);
                self.vertices = flat
                    .chunks_exact(3)
                    .map(|triple| Point3::new(triple[0], triple[1], triple[2]))
                    .collect();
            }
            Value::Mapping(_) => {}
        }
    }
}

record! {
    /// Cube-shaped ROI annotation, followed on the wire by its base
    /// annotation.
    pub struct CubeAnnotation70("CCubeAnnotation70") {
        "mIsBackground" => is_background: bool,
        "mRegionIndex" => region_index: i32,
        "mIsFRAP" => is_frap: bool,
        "mFRAPDevice" => frap_device: string,
        "mIsStimulation" => is_stimulation: bool,
        "mIsLLS" => is_lls: bool,
        "mIsNoLabel" => is_no_label: bool,
        "mReservedBuf" => reserved_buf: string,
        "mIsIntSet" => is_int_set: bool,
        "mIsFloatSet" => is_float_set: bool,
        "mIntData" => int_data: i32,
        "mFloatData" => float_data: f32,
    }
    extra {
        annotation: Annotation70,
    }
}

impl CubeAnnotation70 {
    /// Decode the cube annotation together with its base annotation.
    pub fn decode_chained(doc: &super::Document, start: usize) -> DecodeStep<Self> {
        let (mut record, mut cursor) = match decode_record::<Self>(doc, start) {
            DecodeStep::Matched { record, next } => (record, next),
            DecodeStep::NotThisClass => return DecodeStep::NotThisClass,
            DecodeStep::EndOfRecords => return DecodeStep::EndOfRecords,
        };
        if let DecodeStep::Matched {
            record: annotation,
            next,
        } = decode_record(doc, cursor)
        {
            record.annotation = annotation;
            cursor = next;
        }
        DecodeStep::Matched {
            record,
            next: cursor,
        }
    }
}

record! {
    /// FRAP region annotation: an XML payload, a base annotation and a list
    /// of cube-shaped regions.
    pub struct FrapRegionAnnotation70("CFRAPRegionAnnotation70") {
        "mXML" => xml: string,
    }
    extra {
        annotation: Annotation70,
        regions: Vec<CubeAnnotation70>,
    }
}

impl FrapRegionAnnotation70 {
    /// Decode the FRAP region together with its base annotation and regions.
    pub fn decode_chained(doc: &super::Document, start: usize) -> DecodeStep<Self> {
        let (mut record, mut cursor) = match decode_record::<Self>(doc, start) {
            DecodeStep::Matched { record, next } => (record, next),
            DecodeStep::NotThisClass => return DecodeStep::NotThisClass,
            DecodeStep::EndOfRecords => return DecodeStep::EndOfRecords,
        };
        if let DecodeStep::Matched {
            record: annotation,
            next,
        } = decode_record(doc, cursor)
        {
            record.annotation = annotation;
            cursor = next;
        }
        if let Some((count, next)) = get_integer(doc, cursor, "theNumRegions") {
            cursor = next;
            for _ in 0..count.max(0) {
                match CubeAnnotation70::decode_chained(doc, cursor) {
                    DecodeStep::Matched { record: cube, next } => {
                        record.regions.push(cube);
                        cursor = next;
                    }
                    _ => break,
                }
            }
        }
        DecodeStep::Matched {
            record,
            next: cursor,
        }
    }
}

/// Annotation of a kind this format revision does not name; carries only the
/// base annotation.
#[derive(Debug, Clone, Default)]
pub struct UnknownAnnotation70 {
    pub annotation: Annotation70,
}

impl Record for UnknownAnnotation70 {
    const CLASS_NAME: &'static str = "CUnknownAnnotation70";

    fn assign(&mut self, _key: &str, _value: &Value) -> bool {
        false
    }
}

impl UnknownAnnotation70 {
    /// Decode the wrapper together with its base annotation.
    pub fn decode_chained(doc: &super::Document, start: usize) -> DecodeStep<Self> {
        let (mut record, mut cursor) = match decode_record::<Self>(doc, start) {
            DecodeStep::Matched { record, next } => (record, next),
            DecodeStep::NotThisClass => return DecodeStep::NotThisClass,
            DecodeStep::EndOfRecords => return DecodeStep::EndOfRecords,
        };
        if let DecodeStep::Matched {
            record: annotation,
            next,
        } = decode_record(doc, cursor)
        {
            record.annotation = annotation;
            cursor = next;
        }
        DecodeStep::Matched {
            record,
            next: cursor,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::super::Document;
    use super::*;

    fn class_block(class: &str, body: &str) -> String {
        format!("StartClass:\n  ClassName: {class}\n{body}EndClass: 0\n")
    }

    #[test]
    fn test_image_record_chained_decode() {
        let text = [
            class_block(
                "CImageRecord70",
                "  mWidth: 512\n  mHeight: 256\n  mNumPlanes: 5\n  mNumChannels: 2\n  mNumTimepoints: 3\n  mName: demo_#32;capture\n",
            ),
            class_block(
                "CLensDef70",
                "  mName: 63x Oil\n  mMicronPerPixel: 0.103\n  mActualMagnification: 63.0\n",
            ),
            class_block("COptovarDef70", "  mName: 1x\n  mMagnification: 1.0\n"),
            class_block("CMainViewRecord70", "  mViewID: 1\n  mLow: [2, 0, 0]\n"),
        ]
        .concat();
        let doc = Document::parse(&text).unwrap();

        let (record, next) = ImageRecord70::decode_chained(&doc, 0)
            .into_matched()
            .unwrap();
        assert_eq!(record.width, 512);
        assert_eq!(record.height, 256);
        assert_eq!(record.num_planes, 5);
        assert_eq!(record.name, "demo capture");
        assert_eq!(record.lens.name, "63x Oil");
        assert!((record.lens.micron_per_pixel - 0.103).abs() < 1e-6);
        assert_eq!(record.optovar.magnification, 1.0);
        assert_eq!(record.main_view.view_id, 1);
        assert_eq!(record.main_view.low, vec![0, 0]);
        assert_eq!(next, doc.len());
    }

    #[test]
    fn test_channel_record_chained_decode() {
        let text = [
            class_block("CChannelRecord70", "  mNumPlanes: 5\n  mDataType: 1\n"),
            class_block(
                "CExposureRecord70",
                "  mExposureTime: 120\n  mInterplaneSpacing: 0.5\n  mXFactor: 1\n",
            ),
            class_block("CChannelDef70", "  mName: GFP_#32;\n"),
            class_block("CFluorDef70", "  mName: GFP\n  mLambda: 488.0\n"),
        ]
        .concat();
        let doc = Document::parse(&text).unwrap();

        let (record, _) = ChannelRecord70::decode_chained(&doc, 0)
            .into_matched()
            .unwrap();
        assert_eq!(record.exposure.exposure_time, 120);
        assert_eq!(record.exposure.interplane_spacing, 0.5);
        assert_eq!(record.channel_def.name, "GFP ");
        assert_eq!(record.channel_def.fluor.name, "GFP");
        assert_eq!(record.channel_def.fluor.lambda, 488.0);
    }

    #[test]
    fn test_annotation_unknown_attributes() {
        let text = class_block(
            "CAnnotation70",
            concat!(
                "  mGraphicType70: 2\n",
                "  mStageOffsetMicrons.mX: 12.5\n",
                "  mStageOffsetMicrons.mY: -3.25\n",
                "  mVertexes: [10, 20, 0, 110, 220, 0]\n",
            ),
        );
        let doc = Document::parse(&text).unwrap();

        let (ann, _) = decode_record::<Annotation70>(&doc, 0)
            .into_matched()
            .unwrap();
        assert_eq!(ann.graphic_type, 2);
        assert_eq!(ann.stage_offset_microns.x, 12.5);
        assert_eq!(ann.stage_offset_microns.y, -3.25);
        assert_eq!(
            ann.vertices,
            vec![Point3::new(10, 20, 0), Point3::new(110, 220, 0)]
        );
    }

    #[test]
    fn test_cube_annotation_carries_base() {
        let text = [
            class_block("CCubeAnnotation70", "  mRegionIndex: 4\n  mIsFRAP: true\n"),
            class_block(
                "CAnnotation70",
                "  mGraphicType70: 8\n  mVerts: [1, 2, 3, 7, 8, 9]\n",
            ),
        ]
        .concat();
        let doc = Document::parse(&text).unwrap();

        let (cube, _) = CubeAnnotation70::decode_chained(&doc, 0)
            .into_matched()
            .unwrap();
        assert_eq!(cube.region_index, 4);
        assert!(cube.is_frap);
        assert_eq!(cube.annotation.graphic_type, 8);
        assert_eq!(cube.annotation.vertices.len(), 2);
    }

    #[test]
    fn test_frap_region_decodes_nested_regions() {
        let text = [
            class_block("CFRAPRegionAnnotation70", "  mXML: _#60;frap/_#62;\n"),
            class_block("CAnnotation70", "  mGraphicType70: 3\n"),
            "theNumRegions: 2\n".to_string(),
            class_block("CCubeAnnotation70", "  mRegionIndex: 0\n"),
            class_block("CAnnotation70", "  mGraphicType70: 2\n"),
            class_block("CCubeAnnotation70", "  mRegionIndex: 1\n"),
            class_block("CAnnotation70", "  mGraphicType70: 2\n"),
        ]
        .concat();
        let doc = Document::parse(&text).unwrap();

        let (frap, _) = FrapRegionAnnotation70::decode_chained(&doc, 0)
            .into_matched()
            .unwrap();
        assert_eq!(frap.xml, "<frap/>");
        assert_eq!(frap.annotation.graphic_type, 3);
        assert_eq!(frap.regions.len(), 2);
        assert_eq!(frap.regions[1].region_index, 1);
    }

    #[test]
    fn test_slide_record_fields() {
        let text = class_block(
            "CSlideRecord70",
            "  mNumImages: 3\n  mName: my slide\n  mFileVersion: [2, 7, 0]\n",
        );
        let doc = Document::parse(&text).unwrap();

        let (record, _) = decode_record::<SlideRecord70>(&doc, 0)
            .into_matched()
            .unwrap();
        assert_eq!(record.num_images, 3);
        assert_eq!(record.name, "my slide");
        assert_eq!(record.file_version, vec![7, 0]);
    }
}
