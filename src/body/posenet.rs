//! Bottom-up multi-person PoseNet decoding.
//!
//! Part heatmaps give root candidates; each accepted root grows into a full
//! pose by walking the skeleton tree along the displacement fields and
//! snapping every step with the short-range offsets.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::Point3;
use ndarray::{ArrayD, ArrayView3, Axis, Ix3};
use rayon::prelude::*;

use crate::body::{ParsedKeypoint, ParsedPose, COCO_PARTS};
use crate::config::BodyConfig;
use crate::error::{Error, Result};
use crate::geometry::Point;
use crate::utils::{round2, sigmoid};

pub const LOCAL_MAXIMUM_RADIUS: usize = 1;
pub const OFFSET_REFINE_STEPS: usize = 2;

/// Parent to child edges of the skeleton tree, rooted at the nose.
pub const POSE_CHAIN: [(usize, usize); 16] = [
    (0, 1),
    (1, 3),
    (0, 2),
    (2, 4),
    (0, 5),
    (5, 7),
    (7, 9),
    (5, 11),
    (11, 13),
    (13, 15),
    (0, 6),
    (6, 8),
    (8, 10),
    (6, 12),
    (12, 14),
    (14, 16),
];

#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    pub output_stride: usize,
    pub max_detected: usize,
    pub min_confidence: f32,
    /// In input pixels.
    pub nms_radius: f32,
}

/// Heatmap cell that is a local maximum of its part channel.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PartCandidate {
    score: f32,
    y: usize,
    x: usize,
    part: usize,
}

impl Eq for PartCandidate {}

impl Ord for PartCandidate {
    // max-heap on score; ties pop in part, row, column order
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.part.cmp(&self.part))
            .then_with(|| other.y.cmp(&self.y))
            .then_with(|| other.x.cmp(&self.x))
    }
}

impl PartialOrd for PartCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy)]
struct Keypoint {
    position: Point,
    score: f32,
}

/// The four PoseNet heads, batch dimension removed.
pub struct PoseNetOutputs<'a> {
    /// `[H, W, K]` part scores in `[0, 1]`.
    pub scores: ArrayView3<'a, f32>,
    /// `[H, W, 2K]` short-range offsets, all `y` then all `x`.
    pub offsets: ArrayView3<'a, f32>,
    /// `[H, W, 2E]` parent to child displacements.
    pub displacements_fwd: ArrayView3<'a, f32>,
    /// `[H, W, 2E]` child to parent displacements.
    pub displacements_bwd: ArrayView3<'a, f32>,
}

impl PoseNetOutputs<'_> {
    fn num_parts(&self) -> usize {
        self.scores.dim().2
    }

    fn validate(&self) -> Result<()> {
        let (h, w, k) = self.scores.dim();
        let edges = POSE_CHAIN.len();
        if k != COCO_PARTS.len() {
            return Err(Error::shape("posenet heatmap", "[H, W, 17]", self.scores.shape()));
        }
        if self.offsets.dim() != (h, w, 2 * k) {
            return Err(Error::shape("posenet offsets", "[H, W, 34]", self.offsets.shape()));
        }
        for displacements in [&self.displacements_fwd, &self.displacements_bwd] {
            if displacements.dim() != (h, w, 2 * edges) {
                return Err(Error::shape(
                    "posenet displacements",
                    "[H, W, 32]",
                    displacements.shape(),
                ));
            }
        }
        Ok(())
    }

    fn offset(&self, y: usize, x: usize, part: usize) -> Point {
        let k = self.num_parts();
        Point::new(self.offsets[[y, x, part + k]], self.offsets[[y, x, part]])
    }

    /// Image position of a heatmap cell: cell origin plus its offset.
    fn image_coords(&self, y: usize, x: usize, part: usize, stride: f32) -> Point {
        let offset = self.offset(y, x, part);
        Point::new(x as f32 * stride + offset.x, y as f32 * stride + offset.y)
    }

    /// Nearest heatmap cell to an image position.
    fn strided_index(&self, point: Point, stride: f32) -> (usize, usize) {
        let (h, w, _) = self.scores.dim();
        let clamp = |v: f32, max: usize| (v / stride).round().clamp(0.0, (max - 1) as f32) as usize;
        (clamp(point.y, h), clamp(point.x, w))
    }
}

/// Local maxima at or above `min_confidence`, scanned per part channel in
/// parallel and queued in a deterministic order.
fn build_part_queue(scores: &ArrayView3<'_, f32>, min_confidence: f32) -> BinaryHeap<PartCandidate> {
    let (height, width, parts) = scores.dim();
    let per_part: Vec<Vec<PartCandidate>> = (0..parts)
        .into_par_iter()
        .map(|part| {
            let channel = scores.index_axis(Axis(2), part);
            let mut found = Vec::new();
            for y in 0..height {
                for x in 0..width {
                    let score = channel[[y, x]];
                    if !(score >= min_confidence) {
                        continue;
                    }
                    let y0 = y.saturating_sub(LOCAL_MAXIMUM_RADIUS);
                    let y1 = (y + LOCAL_MAXIMUM_RADIUS + 1).min(height);
                    let x0 = x.saturating_sub(LOCAL_MAXIMUM_RADIUS);
                    let x1 = (x + LOCAL_MAXIMUM_RADIUS + 1).min(width);
                    let is_max = (y0..y1).all(|yy| (x0..x1).all(|xx| channel[[yy, xx]] <= score));
                    if is_max {
                        found.push(PartCandidate { score, y, x, part });
                    }
                }
            }
            found
        })
        .collect();
    per_part.into_iter().flatten().collect()
}

fn within_radius(
    poses: &[Vec<Option<Keypoint>>],
    point: Point,
    part: usize,
    squared_radius: f32,
) -> bool {
    poses.iter().any(|pose| {
        pose.get(part)
            .copied()
            .flatten()
            .is_some_and(|k| (k.position - point).norm_squared() <= squared_radius)
    })
}

/// Follows one edge from `source` to `target_part`: displacement jump, then
/// offset refinement at the strided location.
fn traverse(
    outputs: &PoseNetOutputs<'_>,
    displacements: &ArrayView3<'_, f32>,
    edge: usize,
    source: Keypoint,
    target_part: usize,
    stride: f32,
) -> Keypoint {
    let edges = POSE_CHAIN.len();
    let (sy, sx) = outputs.strided_index(source.position, stride);
    let displacement = Point::new(
        displacements[[sy, sx, edges + edge]],
        displacements[[sy, sx, edge]],
    );
    let mut target = Point::new(
        source.position.x + displacement.x,
        source.position.y + displacement.y,
    );
    for _ in 0..OFFSET_REFINE_STEPS {
        let (ty, tx) = outputs.strided_index(target, stride);
        target = outputs.image_coords(ty, tx, target_part, stride);
    }
    let (ty, tx) = outputs.strided_index(target, stride);
    Keypoint {
        position: target,
        score: outputs.scores[[ty, tx, target_part]],
    }
}

fn decode_pose(outputs: &PoseNetOutputs<'_>, root: &PartCandidate, stride: f32) -> Vec<Option<Keypoint>> {
    let mut keypoints: Vec<Option<Keypoint>> = vec![None; outputs.num_parts()];
    keypoints[root.part] = Some(Keypoint {
        position: outputs.image_coords(root.y, root.x, root.part, stride),
        score: root.score,
    });

    // towards the root first, then out to the leaves
    for (edge, &(parent, child)) in POSE_CHAIN.iter().enumerate().rev() {
        if let (Some(source), None) = (keypoints[child], keypoints[parent]) {
            keypoints[parent] = Some(traverse(
                outputs,
                &outputs.displacements_bwd,
                edge,
                source,
                parent,
                stride,
            ));
        }
    }
    for (edge, &(parent, child)) in POSE_CHAIN.iter().enumerate() {
        if let (Some(source), None) = (keypoints[parent], keypoints[child]) {
            keypoints[child] = Some(traverse(
                outputs,
                &outputs.displacements_fwd,
                edge,
                source,
                child,
                stride,
            ));
        }
    }
    keypoints
}

/// Decodes up to `max_detected` poses. Positions are in input pixels.
pub fn decode_multiple(outputs: &PoseNetOutputs<'_>, params: &DecodeParams) -> Result<Vec<ParsedPose>> {
    outputs.validate()?;
    let stride = params.output_stride as f32;
    let squared_radius = params.nms_radius * params.nms_radius;

    let mut queue = build_part_queue(&outputs.scores, params.min_confidence);
    let mut accepted: Vec<Vec<Option<Keypoint>>> = Vec::new();
    let mut poses = Vec::new();

    while poses.len() < params.max_detected {
        let Some(root) = queue.pop() else {
            break;
        };
        let root_position = outputs.image_coords(root.y, root.x, root.part, stride);
        if within_radius(&accepted, root_position, root.part, squared_radius) {
            continue;
        }

        let keypoints: Vec<Option<Keypoint>> = decode_pose(outputs, &root, stride)
            .into_iter()
            .map(|k| k.filter(|k| k.score > params.min_confidence))
            .collect();
        let kept = keypoints.iter().flatten().count();
        if kept == 0 {
            continue;
        }
        let not_overlapped: f32 = keypoints
            .iter()
            .enumerate()
            .filter_map(|(part, k)| k.map(|k| (part, k)))
            .filter(|(part, k)| !within_radius(&accepted, k.position, *part, squared_radius))
            .map(|(_, k)| k.score)
            .sum();
        let score = not_overlapped / kept as f32;
        if !(score > params.min_confidence) {
            continue;
        }

        poses.push(ParsedPose {
            score: round2(score),
            keypoints: keypoints
                .iter()
                .enumerate()
                .filter_map(|(part, k)| {
                    k.map(|k| ParsedKeypoint {
                        part,
                        position: Point3::new(k.position.x, k.position.y, 0.0),
                        score: k.score,
                    })
                })
                .collect(),
        });
        accepted.push(keypoints);
    }

    tracing::trace!(poses = poses.len(), remaining = queue.len(), "posenet decode");
    Ok(poses)
}

fn squeeze3<'a>(tensor: &'a ArrayD<f32>, what: &'static str) -> Result<ArrayView3<'a, f32>> {
    let view = tensor.view();
    let view = match view.ndim() {
        4 if view.shape()[0] == 1 => view.index_axis_move(Axis(0), 0),
        3 => view,
        _ => return Err(Error::shape(what, "[1, H, W, C]", tensor.shape())),
    };
    view.into_dimensionality::<Ix3>()
        .map_err(|_| Error::shape(what, "[1, H, W, C]", tensor.shape()))
}

/// Parses the raw heads (offsets, heatmap logits, forward and backward
/// displacements, in that order) into poses normalized to the input.
pub fn parse(outputs: &[ArrayD<f32>], input_size: usize, config: &BodyConfig) -> Result<Vec<ParsedPose>> {
    let [offsets, heatmaps, fwd, bwd] = outputs else {
        return Err(Error::shape("posenet outputs", "4 heads", &[outputs.len()]));
    };
    let scores = squeeze3(heatmaps, "posenet heatmap")?.mapv(sigmoid);
    let heads = PoseNetOutputs {
        scores: scores.view(),
        offsets: squeeze3(offsets, "posenet offsets")?,
        displacements_fwd: squeeze3(fwd, "posenet displacements")?,
        displacements_bwd: squeeze3(bwd, "posenet displacements")?,
    };
    let params = DecodeParams {
        output_stride: config.output_stride,
        max_detected: config.detector.max_detected,
        min_confidence: config.detector.min_confidence,
        nms_radius: config.nms_radius,
    };

    let size = input_size as f32;
    let mut poses = decode_multiple(&heads, &params)?;
    for pose in &mut poses {
        for keypoint in &mut pose.keypoints {
            keypoint.position.x /= size;
            keypoint.position.y /= size;
        }
    }
    Ok(poses)
}
