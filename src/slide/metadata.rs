//! Structured metadata published per capture.
//!
//! This is the emission contract towards downstream metadata consumers: for
//! each capture, the dimensions and pixel typing, per-plane timing and stage
//! coordinates, trimmed channel names, ROI shapes derived from annotations,
//! one objective, and the physical pixel size. Consumers treat this as plain
//! data; nothing here reads files.

use tracing::trace;

use crate::doc::Annotation70;

use super::group::ImageGroup;

// =============================================================================
// Pixel typing
// =============================================================================

/// Storage type of one pixel sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    UInt16,
    Int16,
    UInt32,
    Int32,
}

impl PixelType {
    /// Derive the pixel type from sample width and signedness.
    pub fn from_bytes(bytes_per_pixel: usize, signed: bool) -> Self {
        match (bytes_per_pixel, signed) {
            (4, false) => PixelType::UInt32,
            (4, true) => PixelType::Int32,
            (_, true) => PixelType::Int16,
            _ => PixelType::UInt16,
        }
    }

    pub const fn bytes(self) -> usize {
        match self {
            PixelType::UInt16 | PixelType::Int16 => 2,
            PixelType::UInt32 | PixelType::Int32 => 4,
        }
    }
}

// =============================================================================
// ROI shapes
// =============================================================================

/// A geometric region of interest derived from an annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum RoiShape {
    Point {
        x: f64,
        y: f64,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },
    Rectangle {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Polygon {
        points: Vec<(f64, f64)>,
    },
    Ellipse {
        center_x: f64,
        center_y: f64,
        radius_x: f64,
        radius_y: f64,
    },
}

/// Graphic type tags written by the acquisition software.
mod graphic_type {
    pub const POINT: i32 = 0;
    pub const LINE: i32 = 1;
    pub const RECTANGLE: i32 = 2;
    pub const POLYGON: i32 = 3;
    pub const ELLIPSE: i32 = 8;
}

/// Convert an annotation into the shape it publishes.
///
/// Graphic types 4 through 7 (volumes, object paths, arrows, stereology
/// marks) have no 2-D shape and return `None`, as do annotations with too few
/// vertices for their type.
pub fn roi_shape(annotation: &Annotation70) -> Option<RoiShape> {
    let vertices = &annotation.vertices;
    match annotation.graphic_type {
        graphic_type::POINT => {
            let v = vertices.first()?;
            Some(RoiShape::Point {
                x: v.x as f64,
                y: v.y as f64,
            })
        }
        graphic_type::LINE => {
            let a = vertices.first()?;
            let b = vertices.get(1)?;
            Some(RoiShape::Line {
                x1: a.x as f64,
                y1: a.y as f64,
                x2: b.x as f64,
                y2: b.y as f64,
            })
        }
        graphic_type::RECTANGLE => {
            let a = vertices.first()?;
            let b = vertices.get(1)?;
            Some(RoiShape::Rectangle {
                x: a.x as f64,
                y: a.y as f64,
                width: (b.x - a.x) as f64,
                height: (b.y - a.y) as f64,
            })
        }
        graphic_type::POLYGON => Some(RoiShape::Polygon {
            points: vertices
                .iter()
                .map(|v| (v.x as f64, v.y as f64))
                .collect(),
        }),
        graphic_type::ELLIPSE => {
            let a = vertices.first()?;
            let b = vertices.get(1)?;
            Some(RoiShape::Ellipse {
                center_x: (a.x + b.x) as f64 / 2.0,
                center_y: (a.y + b.y) as f64 / 2.0,
                radius_x: (b.x - a.x) as f64 / 2.0,
                radius_y: (b.y - a.y) as f64 / 2.0,
            })
        }
        other => {
            trace!(graphic_type = other, "annotation type carries no shape");
            None
        }
    }
}

// =============================================================================
// Capture metadata
// =============================================================================

/// Timing and stage coordinates for one published plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneMeta {
    pub timepoint: usize,
    pub position: usize,
    pub zplane: usize,
    pub channel: usize,
    /// Elapsed time since the first timepoint, milliseconds
    pub delta_t_ms: i32,
    /// Camera exposure, milliseconds
    pub exposure_ms: i32,
    pub position_x_um: f64,
    pub position_y_um: f64,
    pub position_z_um: f64,
}

/// The objective used for one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveMeta {
    pub model: String,
    /// Lens actual magnification times optovar magnification
    pub magnification: f64,
}

/// Everything one capture publishes to a metadata consumer.
#[derive(Debug, Clone)]
pub struct CaptureMetadata {
    pub name: String,
    pub description: String,
    pub width: usize,
    pub height: usize,
    pub z_planes: usize,
    /// Channel count after RGB splitting
    pub channels: usize,
    /// Published timepoint axis; positions are folded in
    pub timepoints: usize,
    pub positions: usize,
    pub rgb: bool,
    pub pixel_type: PixelType,
    pub little_endian: bool,
    /// Physical pixel pitch, microns; `None` when the optics do not define it
    pub physical_pixel_size_um: Option<f64>,
    /// Z step between focal planes, microns; `None` for single-plane captures
    pub z_step_um: Option<f64>,
    pub channel_names: Vec<String>,
    pub planes: Vec<PlaneMeta>,
    pub rois: Vec<RoiShape>,
    pub objective: ObjectiveMeta,
}

impl CaptureMetadata {
    /// Build the published metadata for one loaded group.
    pub fn from_group(group: &ImageGroup) -> Self {
        let positions = group.num_positions();
        let timepoints = group.num_timepoints();
        let z_planes = group.num_planes();

        // A sample width divisible by three means packed RGB: split the
        // channel axis and shrink the sample.
        let mut bytes = group.bytes_per_pixel();
        let mut channels = group.num_channels();
        let rgb = bytes % 3 == 0;
        if rgb {
            channels *= 3;
            bytes /= 3;
        }
        let pixel_type = PixelType::from_bytes(bytes, group.pixel_signed());

        let raw_channels = group.num_channels();
        let mut planes =
            Vec::with_capacity(timepoints * positions * z_planes * raw_channels);
        for timepoint in 0..timepoints {
            let delta_t_ms = group.elapsed_time_ms(timepoint);
            for position in 0..positions {
                for zplane in 0..z_planes {
                    for channel in 0..raw_channels {
                        planes.push(PlaneMeta {
                            timepoint,
                            position,
                            zplane,
                            channel,
                            delta_t_ms,
                            exposure_ms: group.exposure_time_ms(channel),
                            position_x_um: group.stage_x_um(position) as f64,
                            position_y_um: group.stage_y_um(position) as f64,
                            position_z_um: group.stage_z_um(position, zplane) as f64,
                        });
                    }
                }
            }
        }

        let channel_names = (0..raw_channels)
            .map(|channel| group.channel_name(channel).trim().to_string())
            .collect();

        let rois = group
            .annotations()
            .iter()
            .flat_map(|timepoint| timepoint.cubes.iter())
            .filter_map(|cube| roi_shape(&cube.annotation))
            .collect();

        let voxel = group.voxel_size_um() as f64;
        let physical_pixel_size_um = (voxel > 0.0).then_some(voxel);
        let z_step_um = (z_planes > 1).then(|| group.interplane_spacing_um() as f64);

        CaptureMetadata {
            name: group.name().to_string(),
            description: group.info().to_string(),
            width: group.width(),
            height: group.height(),
            z_planes,
            channels,
            timepoints: timepoints * positions,
            positions,
            rgb,
            pixel_type,
            little_endian: true,
            physical_pixel_size_um,
            z_step_um,
            channel_names,
            planes,
            rois,
            objective: ObjectiveMeta {
                model: group.lens_name().to_string(),
                magnification: group.magnification(),
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Point3;

    fn annotation(graphic_type: i32, vertices: &[(i32, i32)]) -> Annotation70 {
        Annotation70 {
            graphic_type,
            vertices: vertices
                .iter()
                .map(|&(x, y)| Point3::new(x, y, 0))
                .collect(),
            ..Annotation70::default()
        }
    }

    #[test]
    fn test_pixel_type_from_bytes() {
        assert_eq!(PixelType::from_bytes(2, false), PixelType::UInt16);
        assert_eq!(PixelType::from_bytes(2, true), PixelType::Int16);
        assert_eq!(PixelType::from_bytes(4, false), PixelType::UInt32);
        assert_eq!(PixelType::from_bytes(4, true), PixelType::Int32);
        assert_eq!(PixelType::UInt32.bytes(), 4);
        assert_eq!(PixelType::Int16.bytes(), 2);
    }

    #[test]
    fn test_roi_point_and_line() {
        let point = annotation(0, &[(5, 6)]);
        assert_eq!(roi_shape(&point), Some(RoiShape::Point { x: 5.0, y: 6.0 }));

        let line = annotation(1, &[(0, 0), (10, 20)]);
        assert_eq!(
            roi_shape(&line),
            Some(RoiShape::Line {
                x1: 0.0,
                y1: 0.0,
                x2: 10.0,
                y2: 20.0
            })
        );
    }

    #[test]
    fn test_roi_rectangle_from_corners() {
        let rect = annotation(2, &[(10, 20), (110, 220)]);
        assert_eq!(
            roi_shape(&rect),
            Some(RoiShape::Rectangle {
                x: 10.0,
                y: 20.0,
                width: 100.0,
                height: 200.0
            })
        );
    }

    #[test]
    fn test_roi_polygon_keeps_all_vertices() {
        let poly = annotation(3, &[(0, 0), (4, 0), (4, 4), (0, 4)]);
        match roi_shape(&poly) {
            Some(RoiShape::Polygon { points }) => {
                assert_eq!(points.len(), 4);
                assert_eq!(points[2], (4.0, 4.0));
            }
            other => panic!("expected polygon, got {other:?}"),
        }
    }

    #[test]
    fn test_roi_ellipse_centre_and_radii() {
        let ellipse = annotation(8, &[(10, 20), (30, 60)]);
        assert_eq!(
            roi_shape(&ellipse),
            Some(RoiShape::Ellipse {
                center_x: 20.0,
                center_y: 40.0,
                radius_x: 10.0,
                radius_y: 20.0
            })
        );
    }

    #[test]
    fn test_roi_skipped_types() {
        for graphic_type in 4..=7 {
            let ann = annotation(graphic_type, &[(0, 0), (1, 1)]);
            assert_eq!(roi_shape(&ann), None);
        }
    }

    #[test]
    fn test_roi_missing_vertices() {
        let rect = annotation(2, &[(10, 20)]);
        assert_eq!(roi_shape(&rect), None);
        let point = annotation(0, &[]);
        assert_eq!(roi_shape(&point), None);
    }
}
