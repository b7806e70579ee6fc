use nalgebra::Point3;
use ndarray::ArrayD;

use crate::body::{ParsedKeypoint, ParsedPose, BLAZEPOSE_PARTS};
use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use crate::utils::{finite_or_zero, sigmoid};

/// `x, y, z, visibility, presence` per keypoint.
pub const VALUES_PER_POINT: usize = 5;

/// Parses the `[1, 195]` landmark regression (39 points, input pixels).
/// Keypoint score is `sigmoid(visibility) * sigmoid(presence)`; the pose
/// score is the best keypoint score.
pub fn parse(outputs: &[ArrayD<f32>], input_size: usize, config: &DetectorConfig) -> Result<Vec<ParsedPose>> {
    let expected = BLAZEPOSE_PARTS.len() * VALUES_PER_POINT;
    let landmarks = outputs
        .iter()
        .find(|o| o.len() == expected)
        .ok_or_else(|| Error::shape("blazepose landmarks", "[1, 195]", &[outputs.len()]))?;

    let size = input_size as f32;
    let values: Vec<f32> = landmarks.iter().copied().collect();
    let keypoints: Vec<ParsedKeypoint> = values
        .chunks_exact(VALUES_PER_POINT)
        .enumerate()
        .filter_map(|(part, v)| {
            let score = finite_or_zero(sigmoid(v[3]) * sigmoid(v[4]));
            (score > config.min_confidence).then(|| ParsedKeypoint {
                part,
                position: Point3::new(v[0] / size, v[1] / size, v[2]),
                score,
            })
        })
        .collect();

    if keypoints.is_empty() {
        return Ok(Vec::new());
    }
    let score = keypoints.iter().map(|k| k.score).fold(0.0, f32::max);
    Ok(vec![ParsedPose { score, keypoints }])
}
