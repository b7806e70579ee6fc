//! MoveNet single and multi pose parsers.

use nalgebra::Point3;
use ndarray::{ArrayD, Axis, Ix2};

use crate::body::{ParsedKeypoint, ParsedPose, COCO_PARTS};
use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use crate::utils::round2;

/// Values per multi pose row: 17 `(y, x, score)` triplets, a box and the
/// instance score.
pub const MULTI_ROW: usize = 56;
const MULTI_SCORE: usize = 55;

fn keypoints_from_triplets(values: &[f32], min_confidence: f32) -> Vec<ParsedKeypoint> {
    values
        .chunks_exact(3)
        .take(COCO_PARTS.len())
        .enumerate()
        .filter(|(_, v)| v[2] > min_confidence)
        .map(|(part, v)| ParsedKeypoint {
            part,
            position: Point3::new(v[1], v[0], 0.0),
            score: v[2],
        })
        .collect()
}

/// `[1, 1, 17, 3]` output. The pose score is the best keypoint score.
pub fn parse_single(outputs: &[ArrayD<f32>], config: &DetectorConfig) -> Result<Vec<ParsedPose>> {
    let output = outputs
        .first()
        .ok_or_else(|| Error::shape("movenet output", "[1, 1, 17, 3]", &[0]))?;
    if output.len() != COCO_PARTS.len() * 3 {
        return Err(Error::shape("movenet output", "[1, 1, 17, 3]", output.shape()));
    }
    let values: Vec<f32> = output.iter().copied().collect();
    let keypoints = keypoints_from_triplets(&values, config.min_confidence);
    if keypoints.is_empty() {
        return Ok(Vec::new());
    }
    let score = keypoints.iter().map(|k| k.score).fold(0.0, f32::max);
    Ok(vec![ParsedPose { score, keypoints }])
}

/// `[1, 6, 56]` output, sorted by instance score and truncated to
/// `max_detected`.
pub fn parse_multi(outputs: &[ArrayD<f32>], config: &DetectorConfig) -> Result<Vec<ParsedPose>> {
    let output = outputs
        .first()
        .ok_or_else(|| Error::shape("movenet output", "[1, 6, 56]", &[0]))?;
    let rows = match output.ndim() {
        3 if output.shape()[0] == 1 => output.index_axis(Axis(0), 0),
        _ => return Err(Error::shape("movenet output", "[1, 6, 56]", output.shape())),
    };
    let rows = rows
        .into_dimensionality::<Ix2>()
        .map_err(|_| Error::shape("movenet output", "[1, 6, 56]", output.shape()))?;
    if rows.ncols() != MULTI_ROW {
        return Err(Error::shape("movenet output", "[1, 6, 56]", output.shape()));
    }

    let mut poses: Vec<ParsedPose> = rows
        .rows()
        .into_iter()
        .filter_map(|row| {
            let score = round2(row[MULTI_SCORE]);
            if !(score > config.min_confidence) {
                return None;
            }
            let values: Vec<f32> = row.iter().copied().collect();
            let keypoints = keypoints_from_triplets(&values, config.min_confidence);
            (!keypoints.is_empty()).then_some(ParsedPose { score, keypoints })
        })
        .collect();
    poses.sort_by(|a, b| b.score.total_cmp(&a.score));
    poses.truncate(config.max_detected);
    Ok(poses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4};

    fn config() -> DetectorConfig {
        DetectorConfig {
            min_confidence: 0.3,
            max_detected: 2,
            ..DetectorConfig::default()
        }
    }

    #[test]
    fn test_single_drops_weak_keypoints() {
        let out = Array4::from_shape_fn((1, 1, 17, 3), |(_, _, k, c)| match c {
            0 => 0.25,
            1 => 0.75,
            _ if k == 0 => 0.9,
            _ if k < 5 => 0.5,
            _ => 0.1,
        });
        let poses = parse_single(&[out.into_dyn()], &config()).unwrap();
        assert_eq!(poses.len(), 1);
        assert_eq!(poses[0].keypoints.len(), 5);
        assert_eq!(poses[0].score, 0.9);
        // y first in the tensor
        assert_eq!(poses[0].keypoints[0].position, Point3::new(0.75, 0.25, 0.0));
    }

    #[test]
    fn test_multi_sorted_and_truncated() {
        let mut out = Array3::<f32>::zeros((1, 6, MULTI_ROW));
        for (row, score) in [(0, 0.4), (1, 0.9), (2, 0.1), (3, 0.7)] {
            out[[0, row, MULTI_SCORE]] = score;
            out[[0, row, 2]] = 0.8;
        }
        let poses = parse_multi(&[out.into_dyn()], &config()).unwrap();
        let scores: Vec<f32> = poses.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
        assert!(poses.iter().all(|p| p.keypoints.len() == 1));
    }

    #[test]
    fn test_wrong_shape() {
        let out = ndarray::ArrayD::<f32>::zeros(vec![1, 6, 10]);
        assert!(parse_multi(&[out], &config()).is_err());
        let out = ndarray::ArrayD::<f32>::zeros(vec![1, 1, 10, 3]);
        assert!(parse_single(&[out], &config()).is_err());
    }
}
