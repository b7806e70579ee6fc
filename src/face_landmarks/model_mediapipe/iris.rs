use nalgebra::Point3;
use ndarray::Array4;

use crate::config::IrisConfig;
use crate::error::{Error, Result};
use crate::face_landmarks::coords::{Eye, EyeContour, MESH_POINTS};
use crate::geometry::BoundingBox;
use crate::runtime::{GraphModel, ImageKernels};

/// MediaPipe iris landmark model: 71 eye contour points followed by 5 iris
/// points per eye crop.
pub struct IrisModel {
    model: Box<dyn GraphModel>,
}

/// Eye crop geometry in mesh tile pixels.
struct EyeCrop {
    bbox: BoundingBox,
    flipped: bool,
    tile: Array4<f32>,
}

impl IrisModel {
    pub const POINTS: usize = 76;
    pub const IRIS_START: usize = 71;
    pub const EYE_BOX_SCALE: f32 = 2.3;

    pub fn new(model: Box<dyn GraphModel>) -> Self {
        Self { model }
    }

    /// Refines the eyes of a raw 468 point mesh (mesh tile pixels) and
    /// appends both irises, left first. Other meshes are left untouched.
    pub fn augment(
        &self,
        raw: &mut Vec<Point3<f32>>,
        mesh_tile: &Array4<f32>,
        kernels: &dyn ImageKernels,
        config: &IrisConfig,
    ) -> Result<()> {
        if raw.len() != MESH_POINTS {
            tracing::debug!(points = raw.len(), "skipping iris refinement");
            return Ok(());
        }

        let (Some(left), Some(right)) = (
            self.predict_eye(raw, mesh_tile, kernels, Eye::Left)?,
            self.predict_eye(raw, mesh_tile, kernels, Eye::Right)?,
        ) else {
            tracing::debug!("degenerate eye box, keeping the unrefined mesh");
            return Ok(());
        };

        let depth_difference = raw[Eye::Left.bounds()[0]].z - raw[Eye::Right.bounds()[0]].z;
        if depth_difference.abs() < config.depth_threshold {
            replace_eye(raw, &left, Eye::Left, &EyeContour::ALL);
            replace_eye(raw, &right, Eye::Right, &EyeContour::ALL);
        } else if depth_difference < 1.0 {
            // left eye closer to the camera
            replace_eye(raw, &left, Eye::Left, &[EyeContour::Upper0, EyeContour::Lower0]);
        } else {
            replace_eye(raw, &right, Eye::Right, &[EyeContour::Upper0, EyeContour::Lower0]);
        }

        let left_iris = iris_with_depth(raw, &left[Self::IRIS_START..], Eye::Left);
        let right_iris = iris_with_depth(raw, &right[Self::IRIS_START..], Eye::Right);
        raw.extend(left_iris);
        raw.extend(right_iris);
        Ok(())
    }

    fn crop_eye(
        &self,
        raw: &[Point3<f32>],
        mesh_tile: &Array4<f32>,
        kernels: &dyn ImageKernels,
        eye: Eye,
    ) -> Option<EyeCrop> {
        let [outer, inner] = eye.bounds();
        let bbox = BoundingBox::from_points([&raw[outer], &raw[inner]])?
            .enlarge(Self::EYE_BOX_SCALE)
            .squarify();
        if bbox.is_degenerate() {
            return None;
        }

        let (_, height, width, _) = mesh_tile.dim();
        let size = self.model.input_size();
        let tile = kernels.crop_and_resize(
            mesh_tile,
            bbox.crop_rect(width as f32, height as f32),
            size,
        );
        // the model is trained on one eye; the left one is mirrored
        let (tile, flipped) = match eye {
            Eye::Left => match kernels.flip_left_right(&tile) {
                Some(flipped) => (flipped, true),
                None => (tile, false),
            },
            Eye::Right => (tile, false),
        };
        Some(EyeCrop {
            bbox,
            flipped,
            tile,
        })
    }

    /// Runs the model on one eye and maps its 76 points to mesh tile pixels.
    /// `None` when the eye corners do not span a box.
    fn predict_eye(
        &self,
        raw: &[Point3<f32>],
        mesh_tile: &Array4<f32>,
        kernels: &dyn ImageKernels,
        eye: Eye,
    ) -> Result<Option<Vec<Point3<f32>>>> {
        let Some(crop) = self.crop_eye(raw, mesh_tile, kernels, eye) else {
            return Ok(None);
        };
        let outputs = self.model.execute(&crop.tile)?;

        let values: Vec<f32> = match outputs.iter().find(|o| o.len() == Self::POINTS * 3) {
            Some(output) => output.iter().copied().collect(),
            // contour and iris heads
            None => outputs.iter().flat_map(|o| o.iter().copied()).collect(),
        };
        if values.len() != Self::POINTS * 3 {
            return Err(Error::shape("iris output", "[1, 228]", &[values.len()]));
        }

        let input = self.model.input_size() as f32;
        let size = crop.bbox.size();
        Ok(Some(
            values
                .chunks_exact(3)
                .map(|v| {
                    let x = if crop.flipped {
                        1.0 - v[0] / input
                    } else {
                        v[0] / input
                    };
                    Point3::new(
                        x * size.x + crop.bbox.start_point.x,
                        v[1] / input * size.y + crop.bbox.start_point.y,
                        v[2],
                    )
                })
                .collect(),
        ))
    }
}

/// Overwrites mesh contours with the iris model's, averaging depth.
fn replace_eye(raw: &mut [Point3<f32>], eye_points: &[Point3<f32>], eye: Eye, contours: &[EyeContour]) {
    for contour in contours {
        for (&mesh_index, &iris_index) in contour.mesh_indices(eye).iter().zip(contour.iris_indices()) {
            let refined = eye_points[iris_index];
            let z = (refined.z + raw[mesh_index].z) / 2.0;
            raw[mesh_index] = Point3::new(refined.x, refined.y, z);
        }
    }
}

/// The iris model's own depth is unreliable; take it from the lids.
fn iris_with_depth(raw: &[Point3<f32>], iris: &[Point3<f32>], eye: Eye) -> Vec<Point3<f32>> {
    let upper_z = raw[EyeContour::Upper0.mesh_indices(eye)[3]].z;
    let lower_z = raw[EyeContour::Lower0.mesh_indices(eye)[4]].z;
    let average_z = (upper_z + lower_z) / 2.0;

    iris.iter()
        .enumerate()
        .map(|(i, p)| {
            let z = match i {
                2 => upper_z,
                4 => lower_z,
                _ => average_z,
            };
            Point3::new(p.x, p.y, z)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CpuKernels;
    use ndarray::{Array2, ArrayD};

    /// Predicts every contour point at the crop center with depth 100, and
    /// the iris one pixel right of it.
    struct CenteredIris;

    impl GraphModel for CenteredIris {
        fn execute(&self, _input: &Array4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
            let mut out = Array2::<f32>::zeros((1, IrisModel::POINTS * 3));
            for i in 0..IrisModel::POINTS {
                out[[0, i * 3]] = if i >= IrisModel::IRIS_START { 33.0 } else { 32.0 };
                out[[0, i * 3 + 1]] = 32.0;
                out[[0, i * 3 + 2]] = 100.0;
            }
            Ok(vec![out.into_dyn()])
        }

        fn input_size(&self) -> usize {
            64
        }
    }

    fn mesh(left_z: f32, right_z: f32) -> Vec<Point3<f32>> {
        let mut raw = vec![Point3::new(96.0, 96.0, 0.0); MESH_POINTS];
        for &i in EyeContour::Lower0.mesh_indices(Eye::Left) {
            raw[i] = Point3::new(120.0, 80.0, left_z);
        }
        for &i in EyeContour::Lower0.mesh_indices(Eye::Right) {
            raw[i] = Point3::new(60.0, 80.0, right_z);
        }
        let [outer, inner] = Eye::Left.bounds();
        raw[outer].x = 130.0;
        raw[inner].x = 110.0;
        let [outer, inner] = Eye::Right.bounds();
        raw[outer].x = 50.0;
        raw[inner].x = 70.0;
        raw
    }

    #[test]
    fn test_appends_irises() {
        let iris = IrisModel::new(Box::new(CenteredIris));
        let tile = Array4::<f32>::zeros((1, 192, 192, 3));
        let mut raw = mesh(0.0, 0.0);
        iris.augment(&mut raw, &tile, &CpuKernels, &IrisConfig::default())
            .unwrap();

        assert_eq!(raw.len(), 478);
        // both eyes replaced: contours moved to the eye box centers
        let left_lower = EyeContour::Lower0.mesh_indices(Eye::Left)[2];
        assert!((raw[left_lower].x - 120.0).abs() < 1.0);
        assert!((raw[left_lower].z - 50.0).abs() < 1e-4);
        // left crop is mirrored, so its iris lands left of the center
        assert!(raw[468].x < 120.0);
        assert!(raw[473].x > 60.0);
    }

    #[test]
    fn test_depth_conflict_replaces_one_eye() {
        let iris = IrisModel::new(Box::new(CenteredIris));
        let tile = Array4::<f32>::zeros((1, 192, 192, 3));
        // left eye far behind the right one
        let mut raw = mesh(80.0, 0.0);
        let right_upper = EyeContour::Upper1.mesh_indices(Eye::Right)[0];
        let left_upper = EyeContour::Upper1.mesh_indices(Eye::Left)[0];
        let before = raw[left_upper];
        iris.augment(&mut raw, &tile, &CpuKernels, &IrisConfig::default())
            .unwrap();

        assert_eq!(raw[left_upper], before);
        // only Upper0/Lower0 of the right eye are refined
        assert_eq!(raw[right_upper], Point3::new(96.0, 96.0, 0.0));
        let right_lower = EyeContour::Lower0.mesh_indices(Eye::Right)[3];
        assert!((raw[right_lower].z - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_skips_refined_mesh() {
        let iris = IrisModel::new(Box::new(CenteredIris));
        let tile = Array4::<f32>::zeros((1, 192, 192, 3));
        let mut raw = vec![Point3::origin(); 478];
        iris.augment(&mut raw, &tile, &CpuKernels, &IrisConfig::default())
            .unwrap();
        assert_eq!(raw.len(), 478);
    }

    #[test]
    fn test_collapsed_eye_keeps_mesh() {
        let iris = IrisModel::new(Box::new(CenteredIris));
        let tile = Array4::<f32>::zeros((1, 192, 192, 3));
        // every point, eye corners included, on one pixel
        let mut raw = vec![Point3::new(96.0, 96.0, 0.0); MESH_POINTS];
        let before = raw.clone();
        iris.augment(&mut raw, &tile, &CpuKernels, &IrisConfig::default())
            .unwrap();
        assert_eq!(raw, before);
    }
}
