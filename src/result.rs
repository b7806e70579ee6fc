//! Per-frame entity results handed to rendering and persistence.

use std::collections::BTreeMap;

use nalgebra::{Matrix3, Point3};
use serde::Serialize;

use crate::descriptor::Descriptor;
use crate::geometry::Rect;
use crate::hand::fingerpose::FingerState;

pub type Landmarks = Vec<Point3<f32>>;

/// Named landmark groups built from the static annotation tables.
pub type Annotations = BTreeMap<String, Vec<Point3<f32>>>;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct EulerAngles {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Gaze {
    /// Radians, `0` is looking straight up in image space.
    pub bearing: f32,
    pub strength: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RotationDescriptor {
    pub angle: EulerAngles,
    pub matrix: Matrix3<f32>,
    pub gaze: Gaze,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceResult {
    pub id: usize,
    /// Mesh score when a mesh ran, detector score otherwise.
    pub score: f32,
    pub box_score: f32,
    pub face_score: f32,
    /// Pixel box clamped to the frame.
    pub rect: Rect,
    /// Box normalized to the frame.
    pub rect_raw: Rect,
    /// Image space mesh (468 or 478 points), empty in box-only mode.
    pub mesh: Landmarks,
    /// `mesh` normalized to the frame.
    pub mesh_raw: Landmarks,
    pub annotations: Annotations,
    pub rotation: Option<RotationDescriptor>,
    pub embedding: Option<Descriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandResult {
    pub id: usize,
    pub score: f32,
    pub box_score: f32,
    pub finger_score: f32,
    pub rect: Rect,
    pub rect_raw: Rect,
    /// 21 image space keypoints, or the 7 palm keypoints without a landmark model.
    pub keypoints: Landmarks,
    pub annotations: Annotations,
    pub fingers: Vec<FingerState>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BodyKeypoint {
    pub part: &'static str,
    pub position: Point3<f32>,
    /// `position` normalized to the frame.
    pub position_raw: Point3<f32>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BodyResult {
    pub id: usize,
    pub score: f32,
    pub rect: Rect,
    pub rect_raw: Rect,
    pub keypoints: Vec<BodyKeypoint>,
    /// Connected part polylines, by body region.
    pub annotations: BTreeMap<String, Vec<Vec<Point3<f32>>>>,
}

impl BodyResult {
    pub fn keypoint(&self, part: &str) -> Option<&BodyKeypoint> {
        self.keypoints.iter().find(|k| k.part == part)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectResult {
    pub id: usize,
    pub score: f32,
    pub class: usize,
    pub label: &'static str,
    pub rect: Rect,
    pub rect_raw: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GestureSource {
    Face(usize),
    Iris(usize),
    Body(usize),
    Hand(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Gesture {
    pub source: GestureSource,
    pub name: String,
}

impl Gesture {
    pub fn new(source: GestureSource, name: impl Into<String>) -> Self {
        Self {
            source,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Canvas {
    pub width: usize,
    pub height: usize,
}

/// Everything detected in one frame.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FrameResult {
    pub timestamp_ms: u64,
    pub canvas: Canvas,
    pub face: Vec<FaceResult>,
    pub body: Vec<BodyResult>,
    pub hand: Vec<HandResult>,
    pub object: Vec<ObjectResult>,
    pub gesture: Vec<Gesture>,
}

impl FrameResult {
    /// Groups entities into persons; see [`crate::person::join`].
    pub fn persons(&self) -> Vec<crate::person::Person> {
        crate::person::join(self)
    }
}
