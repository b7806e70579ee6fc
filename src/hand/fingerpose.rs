//! Finger curl and direction estimation, and pose templates scored against
//! them.

use std::sync::OnceLock;

use nalgebra::Point3;
use serde::Serialize;

const NO_CURL_START_LIMIT: f32 = 130.0;
const HALF_CURL_START_LIMIT: f32 = 60.0;
const DISTANCE_VOTE_POWER: f32 = 1.1;
const SINGLE_ANGLE_VOTE_POWER: f32 = 0.9;
const TOTAL_ANGLE_VOTE_POWER: f32 = 1.6;

/// Templates scoring at least this much are reported.
pub const MIN_POSE_CONFIDENCE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Finger {
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Finger {
    pub const ALL: [Finger; 5] = [
        Finger::Thumb,
        Finger::Index,
        Finger::Middle,
        Finger::Ring,
        Finger::Pinky,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Finger::Thumb => "thumb",
            Finger::Index => "index",
            Finger::Middle => "middle",
            Finger::Ring => "ring",
            Finger::Pinky => "pinky",
        }
    }

    /// Bone segments from the wrist to the tip.
    fn segments(self) -> [(usize, usize); 4] {
        let base = 1 + 4 * self as usize;
        [(0, base), (base, base + 1), (base + 1, base + 2), (base + 2, base + 3)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerCurl {
    None,
    Half,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FingerDirection {
    VerticalUp,
    VerticalDown,
    HorizontalLeft,
    HorizontalRight,
    DiagonalUpRight,
    DiagonalUpLeft,
    DiagonalDownRight,
    DiagonalDownLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FingerState {
    pub finger: Finger,
    pub curl: FingerCurl,
    pub direction: FingerDirection,
}

/// Slope of the `p1 -> p2` line in degrees, folded into `[0, 180]`.
fn slope(p1x: f32, p1y: f32, p2x: f32, p2y: f32) -> f32 {
    let degrees = ((p1y - p2y) / (p1x - p2x)).atan().to_degrees();
    if degrees.is_nan() {
        0.0
    } else if degrees <= 0.0 {
        -degrees
    } else {
        180.0 - degrees
    }
}

/// `(vertical, diagonal, horizontal)` votes for one angle.
fn orientation_votes(angle: f32, weight: f32) -> [f32; 3] {
    if (75.0..=105.0).contains(&angle) {
        [weight, 0.0, 0.0]
    } else if (25.0..=155.0).contains(&angle) {
        [0.0, weight, 0.0]
    } else {
        [0.0, 0.0, weight]
    }
}

/// Curl from the angle at `mid` of the `start, mid, end` triangle.
fn estimate_curl(start: &Point3<f32>, mid: &Point3<f32>, end: &Point3<f32>) -> FingerCurl {
    let start_mid = (start - mid).norm();
    let start_end = (start - end).norm();
    let mid_end = (mid - end).norm();

    let cos = ((mid_end * mid_end + start_mid * start_mid - start_end * start_end)
        / (2.0 * mid_end * start_mid))
        .clamp(-1.0, 1.0);
    let angle = if cos.is_nan() { 0.0 } else { cos.acos().to_degrees() };

    if angle > NO_CURL_START_LIMIT {
        FingerCurl::None
    } else if angle > HALF_CURL_START_LIMIT {
        FingerCurl::Half
    } else {
        FingerCurl::Full
    }
}

/// Signed per-axis distances of a finger: start to mid, start to end, mid to end.
struct AxisDistances {
    start_mid: f32,
    start_end: f32,
    mid_end: f32,
}

impl AxisDistances {
    fn max_abs(&self) -> f32 {
        self.start_mid
            .abs()
            .max(self.start_end.abs())
            .max(self.mid_end.abs())
    }

    /// Sign of the dominant distance.
    fn dominant(&self) -> f32 {
        let max = self.max_abs();
        if max == self.start_end.abs() {
            self.start_end
        } else if max == self.start_mid.abs() {
            self.start_mid
        } else {
            self.mid_end
        }
    }
}

fn horizontal_direction(x: &AxisDistances) -> FingerDirection {
    if x.dominant() > 0.0 {
        FingerDirection::HorizontalLeft
    } else {
        FingerDirection::HorizontalRight
    }
}

fn vertical_direction(y: &AxisDistances) -> FingerDirection {
    if y.dominant() < 0.0 {
        FingerDirection::VerticalDown
    } else {
        FingerDirection::VerticalUp
    }
}

fn diagonal_direction(x: &AxisDistances, y: &AxisDistances) -> FingerDirection {
    let up = vertical_direction(y) == FingerDirection::VerticalUp;
    let left = horizontal_direction(x) == FingerDirection::HorizontalLeft;
    match (up, left) {
        (true, true) => FingerDirection::DiagonalUpLeft,
        (true, false) => FingerDirection::DiagonalUpRight,
        (false, true) => FingerDirection::DiagonalDownLeft,
        (false, false) => FingerDirection::DiagonalDownRight,
    }
}

/// Direction by three votes: axis distance ratio, overall slope and the slope
/// of every segment.
fn estimate_direction(
    start: &Point3<f32>,
    mid: &Point3<f32>,
    end: &Point3<f32>,
    segment_slopes: &[f32],
) -> FingerDirection {
    let x = AxisDistances {
        start_mid: start.x - mid.x,
        start_end: start.x - end.x,
        mid_end: mid.x - end.x,
    };
    let y = AxisDistances {
        start_mid: start.y - mid.y,
        start_end: start.y - end.y,
        mid_end: mid.y - end.y,
    };

    let mut votes = [0.0f32; 3];
    let ratio = y.max_abs() / (x.max_abs() + 0.00001);
    if ratio > 1.5 {
        votes[0] += DISTANCE_VOTE_POWER;
    } else if ratio > 0.66 {
        votes[1] += DISTANCE_VOTE_POWER;
    } else {
        votes[2] += DISTANCE_VOTE_POWER;
    }

    // overall slope over the longest of the three spans
    let start_mid = x.start_mid.hypot(y.start_mid);
    let start_end = x.start_end.hypot(y.start_end);
    let mid_end = x.mid_end.hypot(y.mid_end);
    let longest = start_mid.max(start_end).max(mid_end);
    let (from, to) = if longest == mid_end && longest != start_end && longest != start_mid {
        (mid, end)
    } else {
        (start, end)
    };
    let total = orientation_votes(slope(from.x, from.y, to.x, to.y), TOTAL_ANGLE_VOTE_POWER);
    for (vote, add) in votes.iter_mut().zip(total) {
        *vote += add;
    }
    for &segment in segment_slopes {
        for (vote, add) in votes
            .iter_mut()
            .zip(orientation_votes(segment, SINGLE_ANGLE_VOTE_POWER))
        {
            *vote += add;
        }
    }

    let [vertical, diagonal, horizontal] = votes;
    if vertical >= diagonal && vertical >= horizontal {
        vertical_direction(&y)
    } else if horizontal >= diagonal {
        horizontal_direction(&x)
    } else {
        diagonal_direction(&x, &y)
    }
}

/// Curl and direction of every finger of a 21 point hand.
pub fn estimate(landmarks: &[Point3<f32>]) -> Option<Vec<FingerState>> {
    if landmarks.len() < 21 {
        return None;
    }

    let states = Finger::ALL
        .iter()
        .map(|&finger| {
            let segments = finger.segments();
            let slopes: Vec<f32> = segments
                .iter()
                .map(|&(a, b)| slope(landmarks[a].x, landmarks[a].y, landmarks[b].x, landmarks[b].y))
                .collect();

            // the thumb starts at its own base, not the wrist
            let first = if finger == Finger::Thumb { 1 } else { 0 };
            let start = &landmarks[segments[first].0];
            let mid = &landmarks[segments[first + 1].1];
            let end = &landmarks[segments[3].1];

            FingerState {
                finger,
                curl: estimate_curl(start, mid, end),
                direction: estimate_direction(start, mid, end, &slopes[first..]),
            }
        })
        .collect();
    Some(states)
}

/// A named pose: accepted curls and directions per finger with their scores.
#[derive(Debug, Clone)]
pub struct FingerGesture {
    pub name: &'static str,
    curls: [Vec<(FingerCurl, f32)>; 5],
    directions: [Vec<(FingerDirection, f32)>; 5],
    weights: [f32; 5],
}

impl FingerGesture {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            curls: Default::default(),
            directions: Default::default(),
            weights: [1.0; 5],
        }
    }

    pub fn curl(mut self, finger: Finger, curl: FingerCurl, score: f32) -> Self {
        self.curls[finger as usize].push((curl, score));
        self
    }

    pub fn direction(mut self, finger: Finger, direction: FingerDirection, score: f32) -> Self {
        self.directions[finger as usize].push((direction, score));
        self
    }

    pub fn weight(mut self, finger: Finger, weight: f32) -> Self {
        self.weights[finger as usize] = weight;
        self
    }

    /// Weighted agreement in `[0, 1]`. Fingers without expectations count as
    /// full agreement.
    pub fn score(&self, states: &[FingerState]) -> f32 {
        let total: f32 = self.weights.iter().sum();
        let relative = self.weights.map(|w| w * 5.0 / total);

        let mut confidence = 0.0;
        for state in states {
            let i = state.finger as usize;
            confidence += match self.curls[i].as_slice() {
                [] => relative[i],
                expected => expected
                    .iter()
                    .find(|(curl, _)| *curl == state.curl)
                    .map_or(0.0, |(_, score)| score * relative[i]),
            };
            confidence += match self.directions[i].as_slice() {
                [] => relative[i],
                expected => expected
                    .iter()
                    .find(|(direction, _)| *direction == state.direction)
                    .map_or(0.0, |(_, score)| score * relative[i]),
            };
        }
        confidence / 10.0
    }
}

/// The built-in template catalog.
pub fn catalog() -> &'static [FingerGesture] {
    static CATALOG: OnceLock<Vec<FingerGesture>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        use FingerCurl as C;
        use FingerDirection as D;
        let curled = [Finger::Index, Finger::Middle, Finger::Ring, Finger::Pinky];

        let mut thumbs_up = FingerGesture::new("thumbs up")
            .curl(Finger::Thumb, C::None, 1.0)
            .direction(Finger::Thumb, D::VerticalUp, 1.0)
            .direction(Finger::Thumb, D::DiagonalUpLeft, 0.25)
            .direction(Finger::Thumb, D::DiagonalUpRight, 0.25);
        for finger in curled {
            thumbs_up = thumbs_up
                .curl(finger, C::Full, 1.0)
                .direction(finger, D::HorizontalLeft, 1.0)
                .direction(finger, D::HorizontalRight, 1.0);
        }

        let victory = FingerGesture::new("victory")
            .curl(Finger::Thumb, C::Half, 0.5)
            .curl(Finger::Thumb, C::None, 0.5)
            .direction(Finger::Thumb, D::VerticalUp, 1.0)
            .direction(Finger::Thumb, D::DiagonalUpLeft, 1.0)
            .curl(Finger::Index, C::None, 1.0)
            .direction(Finger::Index, D::VerticalUp, 0.75)
            .direction(Finger::Index, D::DiagonalUpLeft, 1.0)
            .curl(Finger::Middle, C::None, 1.0)
            .direction(Finger::Middle, D::VerticalUp, 1.0)
            .direction(Finger::Middle, D::DiagonalUpLeft, 0.75)
            .curl(Finger::Ring, C::Full, 1.0)
            .direction(Finger::Ring, D::VerticalUp, 0.2)
            .direction(Finger::Ring, D::DiagonalUpLeft, 1.0)
            .direction(Finger::Ring, D::HorizontalLeft, 0.2)
            .curl(Finger::Pinky, C::Full, 1.0)
            .direction(Finger::Pinky, D::VerticalUp, 0.2)
            .direction(Finger::Pinky, D::DiagonalUpLeft, 1.0)
            .direction(Finger::Pinky, D::HorizontalLeft, 0.2)
            .weight(Finger::Index, 2.0)
            .weight(Finger::Middle, 2.0);

        let point = FingerGesture::new("point")
            .curl(Finger::Thumb, C::Full, 1.0)
            .curl(Finger::Thumb, C::Half, 0.5)
            .curl(Finger::Index, C::None, 1.0)
            .curl(Finger::Middle, C::Full, 1.0)
            .curl(Finger::Ring, C::Full, 1.0)
            .curl(Finger::Pinky, C::Full, 1.0)
            .weight(Finger::Index, 2.0);

        let middle_finger = FingerGesture::new("middle finger")
            .curl(Finger::Thumb, C::Full, 1.0)
            .curl(Finger::Thumb, C::Half, 0.5)
            .curl(Finger::Index, C::Full, 1.0)
            .curl(Finger::Middle, C::None, 1.0)
            .curl(Finger::Ring, C::Full, 1.0)
            .curl(Finger::Pinky, C::Full, 1.0)
            .weight(Finger::Middle, 2.0);

        let mut open_palm = FingerGesture::new("open palm");
        for finger in Finger::ALL {
            open_palm = open_palm.curl(finger, C::None, 0.75);
        }

        vec![thumbs_up, victory, point, middle_finger, open_palm]
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoseMatch {
    pub name: &'static str,
    pub confidence: f32,
}

/// Every catalog template scoring at least `min_confidence`.
pub fn match_poses(landmarks: &[Point3<f32>], min_confidence: f32) -> Vec<PoseMatch> {
    let Some(states) = estimate(landmarks) else {
        return Vec::new();
    };
    catalog()
        .iter()
        .filter_map(|gesture| {
            let confidence = gesture.score(&states);
            (confidence >= min_confidence).then_some(PoseMatch {
                name: gesture.name,
                confidence,
            })
        })
        .collect()
}
