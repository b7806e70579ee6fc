//! Face pipeline: detector, skip-frame cache, mesh, iris and remap.

use nalgebra::Point3;
use ndarray::Array4;

use crate::cache::DetectorState;
use crate::config::FaceConfig;
use crate::error::Result;
use crate::face_detection::{FaceBox, FaceDetectionModel};
use crate::face_landmarks::coords::{BLAZEFACE_ANNOTATIONS, MESH_ANNOTATIONS, MESH_SYMMETRY_LINE};
use crate::face_landmarks::model_mediapipe::IrisModel;
use crate::face_landmarks::rotation::face_rotation;
use crate::face_landmarks::FaceLandmarksModel;
use crate::geometry::{compute_rotation, Point};
use crate::remap::{annotate, crop_rotated, normalize_landmarks, tracking_box, transform_raw_coords};
use crate::result::FaceResult;
use crate::runtime::ImageKernels;
use crate::utils::round2;

/// Rotations smaller than this (radians) are not worth resampling for.
pub const MIN_ROTATION: f32 = 0.2;
/// Tracking box scale around the mesh extent.
pub const TRACKING_BOX_SCALE: f32 = 1.5;

pub struct FacePipeline {
    detector: Box<dyn FaceDetectionModel>,
    mesh: Option<Box<dyn FaceLandmarksModel>>,
    iris: Option<IrisModel>,
    config: FaceConfig,
    state: DetectorState<FaceBox>,
}

impl FacePipeline {
    pub fn new(detector: Box<dyn FaceDetectionModel>, config: FaceConfig) -> Self {
        Self {
            detector,
            mesh: None,
            iris: None,
            config,
            state: DetectorState::default(),
        }
    }

    pub fn with_mesh(mut self, mesh: Box<dyn FaceLandmarksModel>) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_iris(mut self, iris: IrisModel) -> Self {
        self.iris = Some(iris);
        self
    }

    /// Detects (or tracks) faces in a `[1, H, W, 3]` frame.
    ///
    /// `frame_unchanged` comes from the frame change detector and allows the
    /// cached tracking boxes to stand in for the detector.
    pub fn predict(
        &mut self,
        image: &Array4<f32>,
        kernels: &dyn ImageKernels,
        now_ms: u64,
        frame_unchanged: bool,
    ) -> Result<Vec<FaceResult>> {
        let (_, height, width, _) = image.dim();
        if height == 0 || width == 0 {
            return Ok(Vec::new());
        }

        let detector_config = &self.config.detector;
        if self.state.can_skip(detector_config, now_ms, frame_unchanged) {
            self.state.mark_skipped();
            tracing::debug!(skipped = self.state.skipped(), "reusing cached face boxes");
        } else {
            let boxes = self.detector.detect(image, kernels, detector_config)?;
            self.state.refresh(boxes, now_ms);
        }

        let boxes = std::mem::take(&mut self.state.boxes);
        let mut faces = Vec::with_capacity(boxes.len());
        let mut tracked = Vec::with_capacity(boxes.len());
        for face_box in boxes.iter().take(detector_config.max_detected) {
            let Some((face, next)) = self.refine(image, kernels, face_box)? else {
                continue;
            };
            if let Some(next) = next {
                tracked.push(next);
            }
            if face.score > detector_config.min_confidence {
                faces.push(face);
            }
        }
        self.state.boxes = tracked;

        for (id, face) in faces.iter_mut().enumerate() {
            face.id = id;
        }
        Ok(faces)
    }

    /// Runs the mesh on one box. Returns the face and, when the mesh held,
    /// the tracking box for the next frame.
    fn refine(
        &self,
        image: &Array4<f32>,
        kernels: &dyn ImageKernels,
        face_box: &FaceBox,
    ) -> Result<Option<(FaceResult, Option<FaceBox>)>> {
        let (_, height, width, _) = image.dim();
        let (width, height) = (width as f32, height as f32);
        if face_box.bbox.is_degenerate() {
            tracing::debug!("dropping degenerate face box");
            return Ok(None);
        }

        let (mesh_model, mesh_config) = match (&self.mesh, &self.config.mesh) {
            (Some(model), Some(config)) => (model, config),
            (None, Some(_)) => {
                tracing::debug!("face mesh model not loaded, returning detector boxes");
                return Ok(Some((self.box_only(face_box, width, height), None)));
            }
            _ => return Ok(Some((self.box_only(face_box, width, height), None))),
        };

        let angle = if self.config.detector.rotation {
            let angle = symmetry_angle(face_box);
            if angle.abs() > MIN_ROTATION {
                angle
            } else {
                0.0
            }
        } else {
            0.0
        };

        let size = mesh_model.input_size();
        let (tile, transform) = crop_rotated(kernels, image, face_box.bbox, angle, size);
        let output = mesh_model.run(&tile)?;
        let face_score = round2(output.confidence);

        if face_score < mesh_config.min_confidence {
            tracing::debug!(face_score, "mesh confidence too low, keeping detector box");
            let mut face = self.box_only(face_box, width, height);
            face.face_score = face_score;
            return Ok(Some((face, None)));
        }

        let mut raw = output.landmarks;
        match (&self.iris, &self.config.iris) {
            (Some(iris), Some(iris_config)) => {
                iris.augment(&mut raw, &tile, kernels, iris_config)?;
            }
            (None, Some(_)) => tracing::debug!("iris model not loaded, skipping refinement"),
            _ => {}
        }

        let mesh = transform_raw_coords(&raw, &transform, 1.0);
        let Some(next_box) = tracking_box(&mesh, TRACKING_BOX_SCALE) else {
            return Ok(None);
        };
        let mesh_raw: Vec<Point3<f32>> = normalize_landmarks(&mesh, width, height)
            .into_iter()
            .map(|p| Point3::new(p.x, p.y, p.z / size as f32))
            .collect();

        let rect = next_box.to_rect(width, height);
        let rect_raw = next_box.to_raw_rect(width, height);
        let rotation = face_rotation(&mesh, &mesh_raw, &rect_raw, width, height);

        let face = FaceResult {
            id: 0,
            score: face_score,
            box_score: round2(face_box.score),
            face_score,
            rect,
            rect_raw,
            annotations: annotate(&mesh, MESH_ANNOTATIONS),
            mesh_raw,
            rotation,
            embedding: None,
            mesh,
        };

        let next = FaceBox {
            bbox: next_box,
            score: face_box.score,
            keypoints: face.mesh.iter().map(|p| Point::new(p.x, p.y)).collect(),
        };
        Ok(Some((face, Some(next))))
    }

    /// Detector-only result: keypoints become a six point mesh.
    fn box_only(&self, face_box: &FaceBox, width: f32, height: f32) -> FaceResult {
        let mesh: Vec<Point3<f32>> = face_box
            .keypoints
            .iter()
            .map(|p| Point3::new(p.x, p.y, 0.0))
            .collect();
        let annotations = if mesh.len() == BLAZEFACE_ANNOTATIONS.len() {
            annotate(&mesh, BLAZEFACE_ANNOTATIONS)
        } else {
            annotate(&mesh, MESH_ANNOTATIONS)
        };
        FaceResult {
            id: 0,
            score: round2(face_box.score),
            box_score: round2(face_box.score),
            face_score: 0.0,
            rect: face_box.bbox.to_rect(width, height),
            rect_raw: face_box.bbox.to_raw_rect(width, height),
            mesh_raw: normalize_landmarks(&mesh, width, height),
            annotations,
            rotation: None,
            embedding: None,
            mesh,
        }
    }

    /// Drops cached boxes, forcing the detector on the next frame.
    pub fn reset(&mut self) {
        self.state.clear();
    }
}

/// Roll of a detector or tracking box: BlazeFace mouth to nose, or mesh upper
/// lip to the point between the eyes.
fn symmetry_angle(face_box: &FaceBox) -> f32 {
    let points = if face_box.keypoints.len() > MESH_SYMMETRY_LINE[1] {
        let [from, to] = MESH_SYMMETRY_LINE;
        Some((face_box.keypoints[from], face_box.keypoints[to]))
    } else {
        face_box.symmetry_points()
    };
    points.map_or(0.0, |(from, to)| compute_rotation(from, to))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DetectorConfig, IrisConfig, MeshConfig};
    use crate::face_landmarks::coords::Eye;
    use crate::face_landmarks::MeshOutput;
    use crate::runtime::GraphModel;
    use ndarray::ArrayD;
    use crate::geometry::BoundingBox;
    use crate::runtime::CpuKernels;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedDetector {
        calls: Arc<AtomicUsize>,
    }

    impl FaceDetectionModel for FixedDetector {
        fn detect(
            &self,
            _image: &Array4<f32>,
            _kernels: &dyn ImageKernels,
            _config: &DetectorConfig,
        ) -> Result<Vec<FaceBox>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![FaceBox {
                bbox: BoundingBox::new(40.0, 40.0, 104.0, 104.0),
                score: 0.9,
                keypoints: vec![
                    Point::new(60.0, 60.0),
                    Point::new(84.0, 60.0),
                    Point::new(72.0, 72.0),
                    Point::new(72.0, 90.0),
                    Point::new(45.0, 65.0),
                    Point::new(99.0, 65.0),
                ],
            }])
        }
    }

    /// Mesh spread evenly over the middle half of the tile.
    struct GridMesh {
        confidence: f32,
    }

    impl FaceLandmarksModel for GridMesh {
        fn input_size(&self) -> usize {
            64
        }

        fn run(&self, _tile: &Array4<f32>) -> Result<MeshOutput> {
            let landmarks = (0..468)
                .map(|i| {
                    let x = 16.0 + (i % 22) as f32 * (32.0 / 21.0);
                    let y = 16.0 + (i / 22) as f32 * (32.0 / 21.0);
                    Point3::new(x, y, 0.0)
                })
                .collect();
            Ok(MeshOutput {
                landmarks,
                confidence: self.confidence,
            })
        }
    }

    fn config(mesh: bool) -> FaceConfig {
        FaceConfig {
            detector: DetectorConfig {
                rotation: false,
                ..DetectorConfig::default()
            },
            mesh: mesh.then(MeshConfig::default),
            iris: None,
        }
    }

    fn image() -> Array4<f32> {
        Array4::zeros((1, 128, 128, 3))
    }

    #[test]
    fn test_box_only_without_mesh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = FacePipeline::new(
            Box::new(FixedDetector {
                calls: calls.clone(),
            }),
            config(false),
        );
        let faces = pipeline.predict(&image(), &CpuKernels, 0, false).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].mesh.len(), 6);
        assert_eq!(faces[0].rect.x, 40.0);
        assert!(faces[0].annotations.contains_key("nose"));
        assert!(faces[0].rotation.is_none());
    }

    #[test]
    fn test_mesh_and_tracking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = FacePipeline::new(
            Box::new(FixedDetector {
                calls: calls.clone(),
            }),
            config(true),
        )
        .with_mesh(Box::new(GridMesh { confidence: 0.95 }));

        let faces = pipeline.predict(&image(), &CpuKernels, 0, false).unwrap();
        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert_eq!(face.mesh.len(), 468);
        // the mesh covers the middle half of the 64px box
        let extent = BoundingBox::from_points(&face.mesh).unwrap();
        assert!((extent.size().x - 32.0).abs() <= 2.0);
        assert!((extent.center().x - 72.0).abs() <= 1.0);
        assert!(face.rotation.is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // unchanged frame: the tracking box replaces the detector
        let faces = pipeline.predict(&image(), &CpuKernels, 10, true).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // changed frame: detector runs again
        pipeline.predict(&image(), &CpuKernels, 20, false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_low_mesh_confidence_keeps_box() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = FacePipeline::new(Box::new(FixedDetector { calls }), config(true))
            .with_mesh(Box::new(GridMesh { confidence: 0.05 }));
        let faces = pipeline.predict(&image(), &CpuKernels, 0, false).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].mesh.len(), 6);
        assert!(faces[0].face_score < 0.2);
    }

    /// Grid mesh with both corners of each eye on the same pixel.
    struct CollapsedEyes;

    impl FaceLandmarksModel for CollapsedEyes {
        fn input_size(&self) -> usize {
            64
        }

        fn run(&self, tile: &Array4<f32>) -> Result<MeshOutput> {
            let mut output = GridMesh { confidence: 0.95 }.run(tile)?;
            for eye in [Eye::Left, Eye::Right] {
                let [outer, inner] = eye.bounds();
                output.landmarks[inner] = output.landmarks[outer];
            }
            Ok(output)
        }
    }

    struct CountingIris {
        calls: Arc<AtomicUsize>,
    }

    impl GraphModel for CountingIris {
        fn execute(&self, _input: &Array4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ArrayD::zeros(vec![1, IrisModel::POINTS * 3])])
        }

        fn input_size(&self) -> usize {
            64
        }
    }

    #[test]
    fn test_collapsed_eyes_skip_iris() {
        let detector_calls = Arc::new(AtomicUsize::new(0));
        let iris_calls = Arc::new(AtomicUsize::new(0));
        let config = FaceConfig {
            iris: Some(IrisConfig::default()),
            ..config(true)
        };
        let mut pipeline = FacePipeline::new(
            Box::new(FixedDetector {
                calls: detector_calls,
            }),
            config,
        )
        .with_mesh(Box::new(CollapsedEyes))
        .with_iris(IrisModel::new(Box::new(CountingIris {
            calls: iris_calls.clone(),
        })));

        let faces = pipeline.predict(&image(), &CpuKernels, 0, false).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].mesh.len(), 468);
        assert!(!faces[0].annotations.contains_key("leftEyeIris"));
        assert_eq!(iris_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_symmetry_angle_upright() {
        let face_box = FaceBox {
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            score: 1.0,
            keypoints: vec![
                Point::new(3.0, 3.0),
                Point::new(7.0, 3.0),
                Point::new(5.0, 5.0),
                Point::new(5.0, 8.0),
            ],
        };
        assert!(symmetry_angle(&face_box).abs() < 1e-6);
    }
}
