//! Hand pipeline: palm detector, skip-frame cache, hand landmarks and remap.

pub mod fingerpose;

use nalgebra::Point3;
use ndarray::Array4;

use crate::cache::DetectorState;
use crate::config::{DetectorConfig, HandConfig};
use crate::detection::{decode_detections, join_heads, AnchorGrid};
use crate::error::{Error, Result};
use crate::geometry::{compute_rotation, rotate_point, rotation_matrix, BoundingBox, Point};
use crate::remap::{annotate, crop_rotated_about, tracking_box, transform_raw_coords};
use crate::result::HandResult;
use crate::runtime::{GraphModel, ImageKernels};
use crate::utils::round2;

pub const HAND_ANNOTATIONS: &[(&str, &[usize])] = &[
    ("thumb", &[1, 2, 3, 4]),
    ("index", &[5, 6, 7, 8]),
    ("middle", &[9, 10, 11, 12]),
    ("ring", &[13, 14, 15, 16]),
    ("pinky", &[17, 18, 19, 20]),
    ("palm", &[0]),
];

pub const HAND_POINTS: usize = 21;

/// Hand landmarks that stand in for the palm detector keypoints when a
/// tracked box is reused: wrist, finger bases and the two thumb joints.
pub const PALM_LANDMARK_IDS: [usize; 7] = [0, 5, 9, 13, 17, 1, 2];
const PALM_BASE: usize = 0;
const MIDDLE_FINGER_BASE: usize = 2;

/// Palm box scale around the rotated palm keypoints.
pub const PALM_BOX_SCALE: f32 = 5.0;
/// Tracking box scale around the hand landmarks.
pub const HAND_BOX_SCALE: f32 = 1.65;

/// Palm detector output or a tracked hand, in frame pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct PalmBox {
    pub bbox: BoundingBox,
    pub score: f32,
    pub keypoints: Vec<Point>,
    /// Straight from the detector: the crop still has to be grown from the
    /// palm keypoints.
    pub fresh: bool,
}

impl PalmBox {
    fn rotation_points(&self) -> Option<(Point, Point)> {
        Some((
            *self.keypoints.get(PALM_BASE)?,
            *self.keypoints.get(MIDDLE_FINGER_BASE)?,
        ))
    }

    /// Square crop around the palm keypoints as they appear in a frame
    /// rotated by `angle` about `center`.
    fn palm_crop(&self, angle: f32, center: Point) -> Option<BoundingBox> {
        let rotation = rotation_matrix(-angle, center);
        let rotated: Vec<Point3<f32>> = self
            .keypoints
            .iter()
            .map(|&p| {
                let p = rotate_point(&rotation, p);
                Point3::new(p.x, p.y, 0.0)
            })
            .collect();
        let bbox = BoundingBox::from_points(&rotated)?
            .squarify()
            .enlarge(PALM_BOX_SCALE);
        (!bbox.is_degenerate()).then_some(bbox)
    }
}

/// MediaPipe palm detector: one `[1, N, 19]` output (logit, box, seven
/// keypoints) or the equivalent split heads.
pub struct PalmDetector {
    model: Box<dyn GraphModel>,
    anchors: AnchorGrid,
}

impl PalmDetector {
    pub const KEYPOINTS: usize = 7;

    pub fn new(model: Box<dyn GraphModel>) -> Self {
        let anchors = AnchorGrid::palm(model.input_size());
        Self::with_anchors(model, anchors)
    }

    pub fn with_anchors(model: Box<dyn GraphModel>, anchors: AnchorGrid) -> Self {
        Self { model, anchors }
    }

    pub fn detect(
        &self,
        image: &Array4<f32>,
        kernels: &dyn ImageKernels,
        config: &DetectorConfig,
    ) -> Result<Vec<PalmBox>> {
        let (_, height, width, _) = image.dim();
        if height == 0 || width == 0 {
            return Ok(Vec::new());
        }
        let (width, height) = (width as f32, height as f32);

        let size = self.model.input_size();
        let input = kernels.resize(image, size, size).mapv(|v| v * 2.0 - 1.0);
        let outputs = self.model.execute(&input)?;
        let (regressors, logits) = join_heads(&outputs)?;
        let detections = decode_detections(
            regressors.view(),
            logits.view(),
            &self.anchors,
            size as f32,
            Self::KEYPOINTS,
            config,
        )?;

        let palms = detections
            .into_iter()
            .filter_map(|detection| {
                let bbox = detection.bounding_box.scale(width, height);
                if bbox.is_degenerate() {
                    tracing::debug!(anchor = detection.anchor, "dropping degenerate palm box");
                    return None;
                }
                Some(PalmBox {
                    bbox,
                    score: detection.score,
                    keypoints: detection
                        .keypoints
                        .iter()
                        .map(|p| Point::new(p.x * width, p.y * height))
                        .collect(),
                    fresh: true,
                })
            })
            .collect::<Vec<_>>();

        tracing::debug!(palms = palms.len(), "palm detector");
        Ok(palms)
    }
}

/// 21 point hand landmark model with a hand presence score.
pub struct HandLandmarksModel {
    model: Box<dyn GraphModel>,
}

impl HandLandmarksModel {
    pub fn new(model: Box<dyn GraphModel>) -> Self {
        Self { model }
    }

    pub fn input_size(&self) -> usize {
        self.model.input_size()
    }

    /// Runs on a `[1, S, S, 3]` tile in `[0, 1]`. Returns the presence score
    /// and the landmarks in tile pixels.
    pub fn run(&self, tile: &Array4<f32>) -> Result<(f32, Vec<Point3<f32>>)> {
        let outputs = self.model.execute(tile)?;
        let keypoints = outputs
            .iter()
            .find(|o| o.len() == HAND_POINTS * 3)
            .ok_or_else(|| Error::shape("hand landmarks", "[1, 63]", &[outputs.len()]))?;
        let confidence = outputs
            .iter()
            .find(|o| o.len() == 1)
            .and_then(|o| o.iter().next().copied())
            .ok_or_else(|| Error::shape("hand presence", "[1, 1]", &[outputs.len()]))?;

        let values: Vec<f32> = keypoints.iter().copied().collect();
        let landmarks = values
            .chunks_exact(3)
            .map(|p| Point3::new(p[0], p[1], p[2]))
            .collect();
        let confidence = if confidence.is_finite() { confidence } else { 0.0 };
        Ok((confidence, landmarks))
    }
}

pub struct HandPipeline {
    detector: PalmDetector,
    landmarks: Option<HandLandmarksModel>,
    config: HandConfig,
    state: DetectorState<PalmBox>,
}

impl HandPipeline {
    pub fn new(detector: PalmDetector, config: HandConfig) -> Self {
        Self {
            detector,
            landmarks: None,
            config,
            state: DetectorState::default(),
        }
    }

    pub fn with_landmarks(mut self, landmarks: HandLandmarksModel) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    /// Detects (or tracks) hands in a `[1, H, W, 3]` frame.
    pub fn predict(
        &mut self,
        image: &Array4<f32>,
        kernels: &dyn ImageKernels,
        now_ms: u64,
        frame_unchanged: bool,
    ) -> Result<Vec<HandResult>> {
        let (_, height, width, _) = image.dim();
        if height == 0 || width == 0 {
            return Ok(Vec::new());
        }

        let detector_config = &self.config.detector;
        if self.state.can_skip(detector_config, now_ms, frame_unchanged) {
            self.state.mark_skipped();
            tracing::debug!(skipped = self.state.skipped(), "reusing cached hand boxes");
        } else {
            let boxes = self.detector.detect(image, kernels, detector_config)?;
            self.state.refresh(boxes, now_ms);
        }

        let boxes = std::mem::take(&mut self.state.boxes);
        let mut hands = Vec::with_capacity(boxes.len());
        let mut tracked = Vec::with_capacity(boxes.len());
        for palm in boxes.iter().take(detector_config.max_detected) {
            let Some((hand, next)) = self.refine(image, kernels, palm)? else {
                continue;
            };
            if let Some(next) = next {
                tracked.push(next);
            }
            hands.push(hand);
        }
        self.state.boxes = tracked;

        hands.truncate(detector_config.max_detected);
        for (id, hand) in hands.iter_mut().enumerate() {
            hand.id = id;
        }
        Ok(hands)
    }

    fn refine(
        &self,
        image: &Array4<f32>,
        kernels: &dyn ImageKernels,
        palm: &PalmBox,
    ) -> Result<Option<(HandResult, Option<PalmBox>)>> {
        let (_, height, width, _) = image.dim();
        let (width, height) = (width as f32, height as f32);

        let model = match &self.landmarks {
            Some(model) if self.config.landmarks => model,
            Some(_) => return Ok(box_only(palm, width, height)),
            None => {
                if self.config.landmarks {
                    tracing::debug!("hand landmark model not loaded, returning palm boxes");
                }
                return Ok(box_only(palm, width, height));
            }
        };

        let angle = if self.config.detector.rotation {
            palm.rotation_points()
                .map_or(0.0, |(base, middle)| compute_rotation(base, middle))
        } else {
            0.0
        };
        let center = palm.bbox.center();
        let size = model.input_size();

        let crop_for = |angle: f32| -> Option<BoundingBox> {
            if palm.fresh {
                palm.palm_crop(angle, center)
            } else {
                (!palm.bbox.is_degenerate()).then_some(palm.bbox)
            }
        };
        let Some(bbox) = crop_for(angle) else {
            tracing::debug!("dropping degenerate hand box");
            return Ok(None);
        };
        let (mut tile, mut transform) = crop_rotated_about(kernels, image, bbox, angle, center, size);
        if transform.angle != angle {
            // rotation unsupported; the palm crop was grown for a rotated frame
            let Some(bbox) = crop_for(0.0) else {
                return Ok(None);
            };
            (tile, transform) = crop_rotated_about(kernels, image, bbox, 0.0, center, size);
        }

        let (confidence, raw) = model.run(&tile)?;
        if confidence < self.config.detector.min_confidence / 4.0 {
            tracing::debug!(confidence, "hand lost");
            return Ok(None);
        }

        let box_size = transform.bbox.size();
        let depth_scale = (box_size.x + box_size.y) / 2.0 / size as f32;
        let keypoints = transform_raw_coords(&raw, &transform, depth_scale);
        let Some(next_box) = tracking_box(&keypoints, HAND_BOX_SCALE) else {
            return Ok(None);
        };

        let hand = HandResult {
            id: 0,
            score: round2(confidence),
            box_score: round2(palm.score),
            finger_score: round2(confidence),
            rect: next_box.to_rect(width, height),
            rect_raw: next_box.to_raw_rect(width, height),
            annotations: annotate(&keypoints, HAND_ANNOTATIONS),
            fingers: fingerpose::estimate(&keypoints).unwrap_or_default(),
            keypoints,
        };
        let next = PalmBox {
            bbox: next_box,
            score: confidence,
            keypoints: PALM_LANDMARK_IDS
                .iter()
                .filter_map(|&i| hand.keypoints.get(i))
                .map(|p| Point::new(p.x, p.y))
                .collect(),
            fresh: false,
        };
        Ok(Some((hand, Some(next))))
    }

    /// Drops cached boxes, forcing the detector on the next frame.
    pub fn reset(&mut self) {
        self.state.clear();
    }
}

/// Detector-only result around the palm. Never cached.
fn box_only(palm: &PalmBox, width: f32, height: f32) -> Option<(HandResult, Option<PalmBox>)> {
    let bbox = palm.bbox.squarify().enlarge(HAND_BOX_SCALE);
    if bbox.is_degenerate() {
        return None;
    }
    let hand = HandResult {
        id: 0,
        score: round2(palm.score),
        box_score: round2(palm.score),
        finger_score: 0.0,
        rect: bbox.to_rect(width, height),
        rect_raw: bbox.to_raw_rect(width, height),
        keypoints: palm
            .keypoints
            .iter()
            .map(|p| Point3::new(p.x, p.y, 0.0))
            .collect(),
        annotations: Default::default(),
        fingers: Vec::new(),
    };
    Some((hand, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CpuKernels;
    use ndarray::{Array2, Array3, ArrayD};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// One palm on a chosen anchor of the 256px grid, fingers pointing up.
    struct OnePalm {
        anchor: usize,
        calls: Arc<AtomicUsize>,
    }

    impl GraphModel for OnePalm {
        fn execute(&self, _input: &Array4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = Array3::<f32>::from_elem((1, 2944, 19), 0.0);
            for i in 0..2944 {
                out[[0, i, 0]] = -10.0;
            }
            let row = self.anchor;
            out[[0, row, 0]] = 5.0;
            out[[0, row, 3]] = 32.0;
            out[[0, row, 4]] = 32.0;
            // wrist below, middle finger base above the anchor center
            let keypoints = [
                (0.0, 12.0),
                (-10.0, 8.0),
                (0.0, -12.0),
                (-4.0, -12.0),
                (4.0, -12.0),
                (8.0, -10.0),
                (-8.0, -10.0),
            ];
            for (k, (x, y)) in keypoints.iter().enumerate() {
                out[[0, row, 5 + 2 * k]] = *x;
                out[[0, row, 6 + 2 * k]] = *y;
            }
            Ok(vec![out.into_dyn()])
        }

        fn input_size(&self) -> usize {
            256
        }
    }

    /// Hand spread over the middle of the tile.
    struct SpreadHand {
        confidence: f32,
    }

    impl GraphModel for SpreadHand {
        fn execute(&self, _input: &Array4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
            let mut points = Array2::<f32>::zeros((1, HAND_POINTS * 3));
            for i in 0..HAND_POINTS {
                points[[0, i * 3]] = 16.0 + (i % 5) as f32 * 8.0;
                points[[0, i * 3 + 1]] = 16.0 + (i / 5) as f32 * 8.0;
                points[[0, i * 3 + 2]] = 4.0;
            }
            let flag = ArrayD::from_elem(vec![1, 1], self.confidence);
            Ok(vec![flag, points.into_dyn()])
        }

        fn input_size(&self) -> usize {
            64
        }
    }

    // anchor on the stride 8 layer at cell (16, 16): center (132, 132)
    const ANCHOR: usize = (16 * 32 + 16) * 2;

    fn config(landmarks: bool) -> HandConfig {
        HandConfig {
            landmarks,
            ..HandConfig::default()
        }
    }

    fn image() -> Array4<f32> {
        Array4::zeros((1, 256, 256, 3))
    }

    fn detector(calls: &Arc<AtomicUsize>) -> PalmDetector {
        PalmDetector::new(Box::new(OnePalm {
            anchor: ANCHOR,
            calls: calls.clone(),
        }))
    }

    #[test]
    fn test_palm_decode() {
        let calls = Arc::new(AtomicUsize::new(0));
        let palms = detector(&calls)
            .detect(&image(), &CpuKernels, &HandConfig::default().detector)
            .unwrap();
        assert_eq!(palms.len(), 1);
        let palm = &palms[0];
        assert!(palm.fresh);
        assert_eq!(palm.keypoints.len(), 7);
        assert!((palm.bbox.center().x - 132.0).abs() < 1e-3);
        assert!((palm.bbox.size().x - 32.0).abs() < 1e-3);
        // upright palm: no roll
        let (base, middle) = palm.rotation_points().unwrap();
        assert!(compute_rotation(base, middle).abs() < 1e-5);
    }

    #[test]
    fn test_box_only_without_landmarks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = HandPipeline::new(detector(&calls), config(false));
        let hands = pipeline.predict(&image(), &CpuKernels, 0, false).unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(hands[0].keypoints.len(), 7);
        assert!((hands[0].rect_raw.width * 256.0 - 32.0 * HAND_BOX_SCALE).abs() < 1e-3);
        assert_eq!(hands[0].finger_score, 0.0);

        // nothing cached: the detector runs again
        pipeline.predict(&image(), &CpuKernels, 10, true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_landmarks_and_tracking() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = HandPipeline::new(detector(&calls), config(true))
            .with_landmarks(HandLandmarksModel::new(Box::new(SpreadHand { confidence: 0.9 })));

        let hands = pipeline.predict(&image(), &CpuKernels, 0, false).unwrap();
        assert_eq!(hands.len(), 1);
        let hand = &hands[0];
        assert_eq!(hand.keypoints.len(), HAND_POINTS);
        assert_eq!(hand.fingers.len(), 5);
        assert_eq!(hand.annotations["palm"].len(), 1);
        assert!(hand.keypoints.iter().all(|p| p.z > 0.0));

        let hands = pipeline.predict(&image(), &CpuKernels, 10, true).unwrap();
        assert_eq!(hands.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tracking_capped_at_max_detected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = HandPipeline::new(detector(&calls), config(true))
            .with_landmarks(HandLandmarksModel::new(Box::new(SpreadHand { confidence: 0.9 })));
        let palms = pipeline
            .detector
            .detect(&image(), &CpuKernels, &HandConfig::default().detector)
            .unwrap();
        let max_detected = pipeline.config.detector.max_detected;
        pipeline.state.refresh(vec![palms[0].clone(); max_detected + 2], 0);

        let hands = pipeline.predict(&image(), &CpuKernels, 10, true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(hands.len(), max_detected);
        assert_eq!(pipeline.state.boxes.len(), max_detected);
    }

    #[test]
    fn test_low_presence_drops_hand() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = HandPipeline::new(detector(&calls), config(true))
            .with_landmarks(HandLandmarksModel::new(Box::new(SpreadHand { confidence: 0.01 })));
        assert!(pipeline.predict(&image(), &CpuKernels, 0, false).unwrap().is_empty());
        // the lost hand is not tracked
        pipeline.predict(&image(), &CpuKernels, 10, true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_palm_crop_grows_square() {
        let palm = PalmBox {
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            score: 1.0,
            keypoints: vec![Point::new(4.0, 6.0), Point::new(6.0, 4.0)],
            fresh: true,
        };
        let bbox = palm.palm_crop(0.0, palm.bbox.center()).unwrap();
        assert!((bbox.size().x - 10.0).abs() < 1e-4);
        assert!((bbox.size().y - 10.0).abs() < 1e-4);
    }
}
