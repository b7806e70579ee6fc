//! Temporal smoothing of consecutive frame results.
//!
//! The buffer keeps the last emitted [`FrameResult`] and blends every new
//! one into it with a weight that decays with the time since the previous
//! frame. Entity lists whose length changed are replaced rather than
//! blended, since identities can no longer be paired by index.

use std::collections::BTreeMap;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use nalgebra::Point3;

use crate::geometry::Rect;
use crate::result::{
    BodyKeypoint, BodyResult, EulerAngles, FaceResult, FrameResult, Gaze, HandResult,
    ObjectResult, RotationDescriptor,
};

/// Elapsed time at and above which the newest value replaces the old one.
const BLEND_HORIZON_MS: u64 = 1000;
const BLEND_BASE: f32 = 8.0;

/// `max(1, 8 - ln(elapsed + 1))` below one second, `1` afterwards.
pub fn blend_weight(elapsed_ms: u64) -> f32 {
    if elapsed_ms < BLEND_HORIZON_MS {
        (BLEND_BASE - (elapsed_ms as f32 + 1.0).ln()).max(1.0)
    } else {
        1.0
    }
}

/// Weighted blend towards `new`: `((weight - 1) * old + new) / weight`.
pub trait Lerp {
    fn blend(&self, new: &Self, weight: f32) -> Self;
}

impl Lerp for f32 {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        ((weight - 1.0) * self + new) / weight
    }
}

impl Lerp for Point3<f32> {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        Point3::new(
            self.x.blend(&new.x, weight),
            self.y.blend(&new.y, weight),
            self.z.blend(&new.z, weight),
        )
    }
}

impl Lerp for Rect {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        Rect::new(
            self.x.blend(&new.x, weight),
            self.y.blend(&new.y, weight),
            self.width.blend(&new.width, weight),
            self.height.blend(&new.height, weight),
        )
    }
}

impl<T: Lerp + Clone> Lerp for Vec<T> {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        blend_entities(self, new, weight)
    }
}

impl<T: Lerp + Clone> Lerp for BTreeMap<String, T> {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        new.iter()
            .map(|(key, value)| {
                let blended = match self.get(key) {
                    Some(old) => old.blend(value, weight),
                    None => value.clone(),
                };
                (key.clone(), blended)
            })
            .collect()
    }
}

impl Lerp for EulerAngles {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        EulerAngles {
            pitch: self.pitch.blend(&new.pitch, weight),
            yaw: self.yaw.blend(&new.yaw, weight),
            roll: self.roll.blend(&new.roll, weight),
        }
    }
}

impl Lerp for Gaze {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        Gaze {
            bearing: self.bearing.blend(&new.bearing, weight),
            strength: self.strength.blend(&new.strength, weight),
        }
    }
}

impl Lerp for RotationDescriptor {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        RotationDescriptor {
            angle: self.angle.blend(&new.angle, weight),
            matrix: new.matrix,
            gaze: self.gaze.blend(&new.gaze, weight),
        }
    }
}

impl Lerp for FaceResult {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        let rotation = match (&self.rotation, &new.rotation) {
            (Some(old), Some(current)) => Some(old.blend(current, weight)),
            (_, current) => current.clone(),
        };
        FaceResult {
            rect: self.rect.blend(&new.rect, weight),
            rect_raw: self.rect_raw.blend(&new.rect_raw, weight),
            mesh: self.mesh.blend(&new.mesh, weight),
            mesh_raw: self.mesh_raw.blend(&new.mesh_raw, weight),
            annotations: self.annotations.blend(&new.annotations, weight),
            rotation,
            ..new.clone()
        }
    }
}

impl Lerp for HandResult {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        HandResult {
            rect: self.rect.blend(&new.rect, weight),
            rect_raw: self.rect_raw.blend(&new.rect_raw, weight),
            keypoints: self.keypoints.blend(&new.keypoints, weight),
            annotations: self.annotations.blend(&new.annotations, weight),
            ..new.clone()
        }
    }
}

impl Lerp for BodyKeypoint {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        BodyKeypoint {
            position: self.position.blend(&new.position, weight),
            position_raw: self.position_raw.blend(&new.position_raw, weight),
            ..new.clone()
        }
    }
}

impl Lerp for BodyResult {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        // keypoints are matched by part, the parsers drop weak ones
        let keypoints = new
            .keypoints
            .iter()
            .map(|k| match self.keypoint(k.part) {
                Some(old) => old.blend(k, weight),
                None => k.clone(),
            })
            .collect();
        BodyResult {
            rect: self.rect.blend(&new.rect, weight),
            rect_raw: self.rect_raw.blend(&new.rect_raw, weight),
            keypoints,
            annotations: self.annotations.blend(&new.annotations, weight),
            ..new.clone()
        }
    }
}

impl Lerp for ObjectResult {
    fn blend(&self, new: &Self, weight: f32) -> Self {
        ObjectResult {
            rect: self.rect.blend(&new.rect, weight),
            rect_raw: self.rect_raw.blend(&new.rect_raw, weight),
            ..new.clone()
        }
    }
}

/// Blends two entity lists pairwise; a length change replaces `old` with a
/// copy of `new`.
pub fn blend_entities<T: Lerp + Clone>(old: &[T], new: &[T], weight: f32) -> Vec<T> {
    if old.len() != new.len() {
        return new.to_vec();
    }
    old.iter().zip(new).map(|(o, n)| o.blend(n, weight)).collect()
}

/// Owns the last emitted result. Exactly one consumer loop feeds it.
#[derive(Debug, Default)]
pub struct TemporalBuffer {
    last: Option<FrameResult>,
    last_ms: u64,
}

impl TemporalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blends `new` into the buffer at time `now_ms` and returns the
    /// smoothed result. The first frame passes through unchanged.
    pub fn interpolate(&mut self, new: &FrameResult, now_ms: u64) -> FrameResult {
        let blended = match &self.last {
            None => new.clone(),
            Some(last) => {
                let elapsed = now_ms.saturating_sub(self.last_ms);
                let weight = blend_weight(elapsed);
                tracing::trace!(elapsed, weight, "interpolating frame");
                FrameResult {
                    face: blend_entities(&last.face, &new.face, weight),
                    body: blend_entities(&last.body, &new.body, weight),
                    hand: blend_entities(&last.hand, &new.hand, weight),
                    object: blend_entities(&last.object, &new.object, weight),
                    ..new.clone()
                }
            }
        };
        self.last = Some(blended.clone());
        self.last_ms = now_ms;
        blended
    }

    pub fn last(&self) -> Option<&FrameResult> {
        self.last.as_ref()
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.last_ms = 0;
    }
}

/// Runs a [`TemporalBuffer`] on its own thread. Frames sent in are
/// interpolated at their own timestamp; the thread exits once either side
/// of the channel pair is dropped.
pub fn spawn_interpolation_worker(
    capacity: usize,
) -> (Sender<FrameResult>, Receiver<FrameResult>, JoinHandle<()>) {
    let (tx_raw, rx_raw): (Sender<FrameResult>, Receiver<FrameResult>) =
        crossbeam_channel::bounded(capacity);
    let (tx_smooth, rx_smooth) = crossbeam_channel::bounded(capacity);

    let handle = std::thread::spawn(move || {
        let mut buffer = TemporalBuffer::new();
        while let Ok(frame) = rx_raw.recv() {
            let smoothed = buffer.interpolate(&frame, frame.timestamp_ms);
            if tx_smooth.send(smoothed).is_err() {
                tracing::debug!("interpolation consumer dropped, stopping worker");
                break;
            }
        }
    });
    (tx_raw, rx_smooth, handle)
}
