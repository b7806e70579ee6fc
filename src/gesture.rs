//! Rule based gestures over face, iris, body and hand landmarks.
//!
//! Every classifier is a pure function of one frame's results. Blinks can
//! additionally be confirmed over time with [`BlinkTracker`].

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Point3;

use crate::config::GestureConfig;
use crate::hand::fingerpose::{match_poses, MIN_POSE_CONFIDENCE};
use crate::result::{BodyResult, FaceResult, Gesture, GestureSource, HandResult};

/// Yaw ratio (eye depth over eye distance) under which a face faces the camera.
const FACING_CENTER_RATIO: f32 = 0.15;
const BLINK_RATIO: f32 = 0.2;
const MOUTH_OPEN_PERCENT: f32 = 10.0;
const HEAD_TILT_DEPTH: f32 = 10.0;
const IRIS_AREA_DIFFERENCE: f32 = 0.25;
const IRIS_CENTER_X: f32 = 0.06;
const IRIS_LOOKING_X: f32 = 0.05;
const IRIS_LOOKING_DOWN_Y: f32 = 0.01;
const IRIS_LOOKING_UP_Y: f32 = 0.022;
const LEANING_SHOULDER_DIFFERENCE: f32 = 0.1;

pub const BLINK_LEFT: &str = "blink left eye";
pub const BLINK_RIGHT: &str = "blink right eye";

fn aperture(mesh: &[Point3<f32>], lids: (usize, usize), border: (usize, usize)) -> f32 {
    (mesh[lids.0].y - mesh[lids.1].y).abs() / (mesh[border.0].y - mesh[border.1].y).abs()
}

/// Facing direction, blinks, mouth opening and head tilt. Needs a full mesh.
pub fn face(faces: &[FaceResult]) -> Vec<Gesture> {
    let mut gestures = Vec::new();
    for f in faces.iter().filter(|f| f.mesh.len() > 450) {
        let source = GestureSource::Face(f.id);
        let mesh = &f.mesh;

        let z_diff = mesh[33].z - mesh[263].z;
        let x_diff = mesh[33].x - mesh[263].x;
        let yaw = (z_diff / x_diff).abs();
        let facing = if !(yaw > FACING_CENTER_RATIO) {
            "facing center"
        } else if z_diff < 0.0 {
            "facing left"
        } else {
            "facing right"
        };
        gestures.push(Gesture::new(source, facing));

        if aperture(mesh, (374, 386), (443, 450)) < BLINK_RATIO {
            gestures.push(Gesture::new(source, BLINK_LEFT));
        }
        if aperture(mesh, (145, 159), (223, 230)) < BLINK_RATIO {
            gestures.push(Gesture::new(source, BLINK_RIGHT));
        }

        let mouth = (500.0 * aperture(mesh, (13, 14), (10, 152))).min(100.0);
        if mouth > MOUTH_OPEN_PERCENT {
            gestures.push(Gesture::new(source, format!("mouth {}% open", mouth.trunc())));
        }

        let chin_depth = mesh[152].z;
        if chin_depth.abs() > HEAD_TILT_DEPTH {
            let direction = if chin_depth < 0.0 { "up" } else { "down" };
            gestures.push(Gesture::new(source, format!("head {direction}")));
        }
    }
    gestures
}

/// Gaze buckets from iris position relative to the eye corners and lids.
/// Needs the refined mesh with iris annotations.
pub fn iris(faces: &[FaceResult]) -> Vec<Gesture> {
    let mut gestures = Vec::new();
    for f in faces {
        let (Some(left), Some(right)) = (
            f.annotations.get("leftEyeIris"),
            f.annotations.get("rightEyeIris"),
        ) else {
            continue;
        };
        if left.len() < 5 || right.len() < 5 || f.mesh.len() <= 374 {
            continue;
        }
        let source = GestureSource::Iris(f.id);

        let area = |iris: &[Point3<f32>]| ((iris[3].x - iris[1].x) * (iris[4].y - iris[2].y)).abs();
        let (area_left, area_right) = (area(left.as_slice()), area(right.as_slice()));
        let difference = (area_left - area_right).abs() / area_left.max(area_right);
        let mut center = false;
        if difference < IRIS_AREA_DIFFERENCE {
            center = true;
            gestures.push(Gesture::new(source, "facing center"));
        }

        let (box_width, box_height) = (f.rect.width, f.rect.height);
        let left_x = (f.mesh[263].x - left[0].x).abs() / box_width;
        let right_x = (f.mesh[33].x - right[0].x).abs() / box_width;
        if left_x > IRIS_CENTER_X || right_x > IRIS_CENTER_X {
            center = false;
        }
        if left_x > right_x {
            if left_x > IRIS_LOOKING_X {
                gestures.push(Gesture::new(source, "looking right"));
            }
        } else if right_x > IRIS_LOOKING_X {
            gestures.push(Gesture::new(source, "looking left"));
        }

        let right_y = (f.mesh[145].y - right[0].y).abs() / box_height;
        let left_y = (f.mesh[374].y - left[0].y).abs() / box_height;
        let down = left_y < IRIS_LOOKING_DOWN_Y || right_y < IRIS_LOOKING_DOWN_Y;
        let up = left_y > IRIS_LOOKING_UP_Y || right_y > IRIS_LOOKING_UP_Y;
        if down {
            gestures.push(Gesture::new(source, "looking down"));
        }
        if up {
            gestures.push(Gesture::new(source, "looking up"));
        }
        if center && !down && !up {
            gestures.push(Gesture::new(source, "looking center"));
        }
    }
    gestures
}

/// Raised hands and shoulder lean.
pub fn body(bodies: &[BodyResult]) -> Vec<Gesture> {
    let mut gestures = Vec::new();
    for b in bodies {
        let source = GestureSource::Body(b.id);
        let nose = b.keypoint("nose");
        let raised = |part: &str| match (nose, b.keypoint(part)) {
            (Some(nose), Some(wrist)) => wrist.position.y < nose.position.y,
            _ => false,
        };
        match (raised("leftWrist"), raised("rightWrist")) {
            (true, true) => gestures.push(Gesture::new(source, "i give up")),
            (true, false) => gestures.push(Gesture::new(source, "raise left hand")),
            (false, true) => gestures.push(Gesture::new(source, "raise right hand")),
            (false, false) => {}
        }

        if let (Some(left), Some(right)) = (b.keypoint("leftShoulder"), b.keypoint("rightShoulder")) {
            if (left.position_raw.y - right.position_raw.y).abs() > LEANING_SHOULDER_DIFFERENCE {
                let side = if left.position.y > right.position.y {
                    "left"
                } else {
                    "right"
                };
                gestures.push(Gesture::new(source, format!("leaning {side}")));
            }
        }
    }
    gestures
}

/// Closest and highest fingertip, plus every matching finger pose.
pub fn hand(hands: &[HandResult]) -> Vec<Gesture> {
    let mut gestures = Vec::new();
    for h in hands {
        let source = GestureSource::Hand(h.id);
        let tips: Vec<(&str, Point3<f32>)> = h
            .annotations
            .iter()
            .filter(|(name, _)| name.as_str() != "palm")
            .filter_map(|(name, points)| Some((name.as_str(), *points.last()?)))
            .collect();

        if let Some((name, _)) = tips.iter().min_by(|a, b| a.1.z.total_cmp(&b.1.z)) {
            gestures.push(Gesture::new(source, format!("{name} forward")));
        }
        if let Some((name, _)) = tips.iter().min_by(|a, b| a.1.y.total_cmp(&b.1.y)) {
            gestures.push(Gesture::new(source, format!("{name} up")));
        }

        for pose in match_poses(&h.keypoints, MIN_POSE_CONFIDENCE) {
            gestures.push(Gesture::new(source, pose.name));
        }
    }
    gestures
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EyeSide {
    Left,
    Right,
}

impl EyeSide {
    fn blinked(self) -> &'static str {
        match self {
            EyeSide::Left => "blinked left eye",
            EyeSide::Right => "blinked right eye",
        }
    }
}

/// Turns per-frame "blink" tags into confirmed blinks: an eye has to stay
/// closed for a duration within the configured window and then reopen.
#[derive(Debug, Clone)]
pub struct BlinkTracker {
    min_ms: u64,
    max_ms: u64,
    closed_since: BTreeMap<(usize, EyeSide), u64>,
}

impl BlinkTracker {
    pub fn new(config: &GestureConfig) -> Self {
        Self {
            min_ms: config.blink_min_ms,
            max_ms: config.blink_max_ms,
            closed_since: BTreeMap::new(),
        }
    }

    /// Feeds one frame's face gestures; returns the blinks that completed.
    pub fn update(&mut self, gestures: &[Gesture], now_ms: u64) -> Vec<Gesture> {
        let mut present = BTreeSet::new();
        let mut closed = BTreeSet::new();
        for gesture in gestures {
            let GestureSource::Face(id) = gesture.source else {
                continue;
            };
            present.insert(id);
            match gesture.name.as_str() {
                BLINK_LEFT => {
                    closed.insert((id, EyeSide::Left));
                }
                BLINK_RIGHT => {
                    closed.insert((id, EyeSide::Right));
                }
                _ => {}
            }
        }

        let window = self.min_ms..=self.max_ms;
        let mut confirmed = Vec::new();
        self.closed_since.retain(|&(id, side), &mut since| {
            if closed.contains(&(id, side)) {
                return true;
            }
            let duration = now_ms.saturating_sub(since);
            if present.contains(&id) && window.contains(&duration) {
                confirmed.push(Gesture::new(GestureSource::Face(id), side.blinked()));
            }
            false
        });
        for key in closed {
            self.closed_since.entry(key).or_insert(now_ms);
        }
        confirmed
    }

    pub fn reset(&mut self) {
        self.closed_since.clear();
    }
}
