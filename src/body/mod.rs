//! Body pose: bottom-up PoseNet decoding, the top-down parsers and the
//! pipeline that dispatches between them.

pub mod blazepose;
pub mod efficientpose;
pub mod movenet;
pub mod posenet;

use std::collections::BTreeMap;

use nalgebra::Point3;
use ndarray::Array4;

use crate::cache::DetectorState;
use crate::config::{BodyConfig, BodyModelKind};
use crate::error::Result;
use crate::geometry::BoundingBox;
use crate::result::{BodyKeypoint, BodyResult};
use crate::runtime::{GraphModel, ImageKernels};
use crate::utils::round2;

/// COCO keypoint order shared by PoseNet and MoveNet.
pub const COCO_PARTS: [&str; 17] = [
    "nose",
    "leftEye",
    "rightEye",
    "leftEar",
    "rightEar",
    "leftShoulder",
    "rightShoulder",
    "leftElbow",
    "rightElbow",
    "leftWrist",
    "rightWrist",
    "leftHip",
    "rightHip",
    "leftKnee",
    "rightKnee",
    "leftAnkle",
    "rightAnkle",
];

pub const BLAZEPOSE_PARTS: [&str; 39] = [
    "nose",
    "leftEyeInside",
    "leftEye",
    "leftEyeOutside",
    "rightEyeInside",
    "rightEye",
    "rightEyeOutside",
    "leftEar",
    "rightEar",
    "leftMouth",
    "rightMouth",
    "leftShoulder",
    "rightShoulder",
    "leftElbow",
    "rightElbow",
    "leftWrist",
    "rightWrist",
    "leftPinky",
    "rightPinky",
    "leftIndex",
    "rightIndex",
    "leftThumb",
    "rightThumb",
    "leftHip",
    "rightHip",
    "leftKnee",
    "rightKnee",
    "leftAnkle",
    "rightAnkle",
    "leftHeel",
    "rightHeel",
    "leftFoot",
    "rightFoot",
    "bodyCenter",
    "bodyTop",
    "leftPalm",
    "leftHand",
    "rightPalm",
    "rightHand",
];

pub const EFFICIENTPOSE_PARTS: [&str; 16] = [
    "head",
    "neck",
    "rightShoulder",
    "rightElbow",
    "rightWrist",
    "chest",
    "leftShoulder",
    "leftElbow",
    "leftWrist",
    "bodyCenter",
    "rightHip",
    "rightKnee",
    "rightAnkle",
    "leftHip",
    "leftKnee",
    "leftAnkle",
];

pub type ConnectedParts = &'static [(&'static str, &'static [&'static str])];

pub const COCO_CONNECTED: ConnectedParts = &[
    ("leftLeg", &["leftHip", "leftKnee", "leftAnkle"]),
    ("rightLeg", &["rightHip", "rightKnee", "rightAnkle"]),
    (
        "torso",
        &["leftShoulder", "rightShoulder", "rightHip", "leftHip", "leftShoulder"],
    ),
    ("leftArm", &["leftShoulder", "leftElbow", "leftWrist"]),
    ("rightArm", &["rightShoulder", "rightElbow", "rightWrist"]),
    ("head", &[]),
];

pub const BLAZEPOSE_CONNECTED: ConnectedParts = &[
    (
        "leftLeg",
        &["leftHip", "leftKnee", "leftAnkle", "leftHeel", "leftFoot"],
    ),
    (
        "rightLeg",
        &["rightHip", "rightKnee", "rightAnkle", "rightHeel", "rightFoot"],
    ),
    (
        "torso",
        &["leftShoulder", "rightShoulder", "rightHip", "leftHip", "leftShoulder"],
    ),
    ("leftArm", &["leftShoulder", "leftElbow", "leftWrist", "leftPalm"]),
    ("rightArm", &["rightShoulder", "rightElbow", "rightWrist", "rightPalm"]),
    ("leftHand", &[]),
    ("rightHand", &[]),
    ("head", &[]),
];

pub const EFFICIENTPOSE_CONNECTED: ConnectedParts = &[
    ("leftLeg", &["leftHip", "leftKnee", "leftAnkle"]),
    ("rightLeg", &["rightHip", "rightKnee", "rightAnkle"]),
    (
        "torso",
        &["leftShoulder", "rightShoulder", "rightHip", "leftHip", "leftShoulder"],
    ),
    ("leftArm", &["leftShoulder", "leftElbow", "leftWrist"]),
    ("rightArm", &["rightShoulder", "rightElbow", "rightWrist"]),
    ("head", &["head", "neck", "chest", "bodyCenter"]),
];

/// One keypoint as a parser sees it: index into the part table, position
/// normalized to the model input, `z` as the model reports it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParsedKeypoint {
    pub part: usize,
    pub position: Point3<f32>,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPose {
    pub score: f32,
    pub keypoints: Vec<ParsedKeypoint>,
}

impl BodyModelKind {
    pub fn parts(self) -> &'static [&'static str] {
        match self {
            BodyModelKind::PoseNet | BodyModelKind::MoveNetSingle | BodyModelKind::MoveNetMulti => {
                &COCO_PARTS
            }
            BodyModelKind::BlazePose => &BLAZEPOSE_PARTS,
            BodyModelKind::EfficientPose => &EFFICIENTPOSE_PARTS,
        }
    }

    pub fn connected(self) -> ConnectedParts {
        match self {
            BodyModelKind::PoseNet | BodyModelKind::MoveNetSingle | BodyModelKind::MoveNetMulti => {
                COCO_CONNECTED
            }
            BodyModelKind::BlazePose => BLAZEPOSE_CONNECTED,
            BodyModelKind::EfficientPose => EFFICIENTPOSE_CONNECTED,
        }
    }

    /// Maps a `[0, 1]` frame to the value range the model was trained on.
    fn normalize(self, value: f32) -> f32 {
        match self {
            BodyModelKind::PoseNet | BodyModelKind::EfficientPose => value * 2.0 - 1.0,
            BodyModelKind::MoveNetSingle | BodyModelKind::MoveNetMulti => value * 255.0,
            BodyModelKind::BlazePose => value,
        }
    }
}

/// Connected part polylines, one two-point segment per pair of neighbouring
/// parts that both survived.
pub fn connect(keypoints: &[BodyKeypoint], connected: ConnectedParts) -> BTreeMap<String, Vec<Vec<Point3<f32>>>> {
    connected
        .iter()
        .map(|(name, chain)| {
            let segments = chain
                .windows(2)
                .filter_map(|pair| {
                    let from = keypoints.iter().find(|k| k.part == pair[0])?;
                    let to = keypoints.iter().find(|k| k.part == pair[1])?;
                    Some(vec![from.position, to.position])
                })
                .collect();
            (name.to_string(), segments)
        })
        .collect()
}

/// Scales a parsed pose to the frame. Poses without keypoints are dropped.
pub fn to_body_result(
    pose: &ParsedPose,
    kind: BodyModelKind,
    width: f32,
    height: f32,
) -> Option<BodyResult> {
    let parts = kind.parts();
    let keypoints: Vec<BodyKeypoint> = pose
        .keypoints
        .iter()
        .filter_map(|k| {
            let part = *parts.get(k.part)?;
            Some(BodyKeypoint {
                part,
                position: Point3::new(
                    (k.position.x * width).round(),
                    (k.position.y * height).round(),
                    k.position.z.trunc(),
                ),
                position_raw: k.position,
                score: round2(k.score),
            })
        })
        .collect();

    let positions: Vec<Point3<f32>> = keypoints.iter().map(|k| k.position).collect();
    let bbox = BoundingBox::from_points(&positions)?;
    Some(BodyResult {
        id: 0,
        score: round2(pose.score),
        rect: bbox.to_rect(width, height),
        rect_raw: bbox.to_raw_rect(width, height),
        annotations: connect(&keypoints, kind.connected()),
        keypoints,
    })
}

pub struct BodyPipeline {
    model: Box<dyn GraphModel>,
    config: BodyConfig,
    state: DetectorState<BodyResult>,
}

impl BodyPipeline {
    pub fn new(model: Box<dyn GraphModel>, config: BodyConfig) -> Self {
        Self {
            model,
            config,
            state: DetectorState::default(),
        }
    }

    pub fn kind(&self) -> BodyModelKind {
        self.config.model
    }

    /// Runs the configured pose model on a `[1, H, W, 3]` frame. On unchanged
    /// frames the previous bodies are returned as they were.
    pub fn predict(
        &mut self,
        image: &Array4<f32>,
        kernels: &dyn ImageKernels,
        now_ms: u64,
        frame_unchanged: bool,
    ) -> Result<Vec<BodyResult>> {
        let (_, height, width, _) = image.dim();
        if height == 0 || width == 0 {
            return Ok(Vec::new());
        }

        let detector = &self.config.detector;
        if self.state.can_skip(detector, now_ms, frame_unchanged) {
            self.state.mark_skipped();
            tracing::debug!(skipped = self.state.skipped(), "reusing cached bodies");
            return Ok(self.state.boxes.clone());
        }

        let kind = self.config.model;
        let size = self.model.input_size();
        let input = kernels.resize(image, size, size).mapv(|v| kind.normalize(v));
        let outputs = self.model.execute(&input)?;

        let poses = match kind {
            BodyModelKind::PoseNet => posenet::parse(&outputs, size, &self.config)?,
            BodyModelKind::MoveNetSingle => movenet::parse_single(&outputs, detector)?,
            BodyModelKind::MoveNetMulti => movenet::parse_multi(&outputs, detector)?,
            BodyModelKind::BlazePose => blazepose::parse(&outputs, size, detector)?,
            BodyModelKind::EfficientPose => efficientpose::parse(&outputs, detector)?,
        };

        let mut bodies: Vec<BodyResult> = poses
            .iter()
            .filter(|pose| pose.score > detector.min_confidence)
            .filter_map(|pose| to_body_result(pose, kind, width as f32, height as f32))
            .take(detector.max_detected)
            .collect();
        for (id, body) in bodies.iter_mut().enumerate() {
            body.id = id;
        }
        tracing::debug!(?kind, bodies = bodies.len(), "body model");

        self.state.refresh(bodies.clone(), now_ms);
        Ok(bodies)
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }
}
