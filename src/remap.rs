//! Maps landmarks predicted on a rotated, cropped tile back into image space.

use nalgebra::{Matrix3, Point3};
use ndarray::Array4;

use crate::geometry::{invert_transform, rotate_point, rotation_matrix, BoundingBox, Point};
use crate::result::{Annotations, Landmarks};
use crate::runtime::ImageKernels;

/// How a model tile was cut out of the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropTransform {
    /// Crop box in frame pixels.
    pub bbox: BoundingBox,
    /// Image rotation applied before cropping, zero when unrotated.
    pub angle: f32,
    /// Rotation by `-angle` about the box center.
    pub rotation: Matrix3<f32>,
    pub input_size: usize,
}

impl CropTransform {
    pub fn new(bbox: BoundingBox, angle: f32, input_size: usize) -> Self {
        Self::about(bbox, angle, bbox.center(), input_size)
    }

    /// Crop whose frame was rotated about `center` instead of the box center.
    pub fn about(bbox: BoundingBox, angle: f32, center: Point, input_size: usize) -> Self {
        Self {
            bbox,
            angle,
            rotation: rotation_matrix(-angle, center),
            input_size,
        }
    }
}

/// Rotates the frame about the box center (when asked and supported) and
/// crops the box to an `input_size` square tile.
///
/// Falls back to an axis-aligned crop with angle 0 when the kernels cannot
/// rotate.
pub fn crop_rotated<K: ImageKernels + ?Sized>(
    kernels: &K,
    image: &Array4<f32>,
    bbox: BoundingBox,
    angle: f32,
    input_size: usize,
) -> (Array4<f32>, CropTransform) {
    crop_rotated_about(kernels, image, bbox, angle, bbox.center(), input_size)
}

/// Like [`crop_rotated`], rotating the frame about `center`.
pub fn crop_rotated_about<K: ImageKernels + ?Sized>(
    kernels: &K,
    image: &Array4<f32>,
    bbox: BoundingBox,
    angle: f32,
    center: Point,
    input_size: usize,
) -> (Array4<f32>, CropTransform) {
    let (_, height, width, _) = image.dim();
    let (width, height) = (width as f32, height as f32);

    let mut angle = if angle.is_finite() { angle } else { 0.0 };
    let rotated = if angle != 0.0 {
        let normalized = Point::new(center.x / width, center.y / height);
        let rotated = kernels.rotate_with_offset(image, angle, normalized);
        if rotated.is_none() {
            tracing::debug!("image rotation unavailable, using axis-aligned crop");
            angle = 0.0;
        }
        rotated
    } else {
        None
    };

    let source = rotated.as_ref().unwrap_or(image);
    let tile = kernels.crop_and_resize(source, bbox.crop_rect(width, height), input_size);
    (tile, CropTransform::about(bbox, angle, center, input_size))
}

/// Maps tile-space landmarks (pixels of the `input_size` tile) back to frame
/// pixels: rescale around the tile center, undo the rotation, translate to
/// the box center. `x`/`y` are rounded; `z` is multiplied by `depth_scale`.
pub fn transform_raw_coords(
    raw: &[Point3<f32>],
    transform: &CropTransform,
    depth_scale: f32,
) -> Landmarks {
    let input = transform.input_size as f32;
    let size = transform.bbox.size();
    let scale_x = size.x / input;
    let scale_y = size.y / input;

    let coords_rotation = rotation_matrix(transform.angle, Point::origin());
    let inverse = invert_transform(&transform.rotation);
    let center = rotate_point(&inverse, transform.bbox.center());

    raw.iter()
        .map(|p| {
            let scaled = Point::new(scale_x * (p.x - input / 2.0), scale_y * (p.y - input / 2.0));
            let rotated = rotate_point(&coords_rotation, scaled);
            Point3::new(
                (rotated.x + center.x).round(),
                (rotated.y + center.y).round(),
                p.z * depth_scale,
            )
        })
        .collect()
}

/// Square box around the landmark extent, scaled by `factor`. Cached as the
/// next frame's crop.
pub fn tracking_box(landmarks: &[Point3<f32>], factor: f32) -> Option<BoundingBox> {
    let bbox = BoundingBox::from_points(landmarks)?;
    Some(bbox.enlarge(factor).squarify())
}

/// Landmarks normalized to the frame size; `z` is left as is.
pub fn normalize_landmarks(landmarks: &[Point3<f32>], width: f32, height: f32) -> Landmarks {
    landmarks
        .iter()
        .map(|p| Point3::new(p.x / width, p.y / height, p.z))
        .collect()
}

/// Builds named groups from a static `(name, indices)` table. Indices past the
/// end of `landmarks` are skipped, so tables covering refined points also work
/// on unrefined sets.
pub fn annotate(landmarks: &[Point3<f32>], table: &[(&str, &[usize])]) -> Annotations {
    table
        .iter()
        .filter_map(|(name, indices)| {
            let points: Vec<Point3<f32>> = indices
                .iter()
                .filter_map(|&i| landmarks.get(i).copied())
                .collect();
            (!points.is_empty()).then(|| (name.to_string(), points))
        })
        .collect()
}
