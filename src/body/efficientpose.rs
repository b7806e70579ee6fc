use nalgebra::Point3;
use ndarray::{ArrayD, Axis, Ix3};

use crate::body::{ParsedKeypoint, ParsedPose, EFFICIENTPOSE_PARTS};
use crate::config::DetectorConfig;
use crate::error::{Error, Result};

/// Parses `[1, H, W, 16]` heatmaps: one keypoint per channel at its argmax,
/// normalized to the heatmap size. The pose score is the best keypoint score.
pub fn parse(outputs: &[ArrayD<f32>], config: &DetectorConfig) -> Result<Vec<ParsedPose>> {
    let heatmaps = outputs
        .first()
        .ok_or_else(|| Error::shape("efficientpose heatmaps", "[1, H, W, 16]", &[0]))?;
    let view = match heatmaps.ndim() {
        4 if heatmaps.shape()[0] == 1 => heatmaps.index_axis(Axis(0), 0),
        _ => {
            return Err(Error::shape(
                "efficientpose heatmaps",
                "[1, H, W, 16]",
                heatmaps.shape(),
            ))
        }
    };
    let view = view
        .into_dimensionality::<Ix3>()
        .map_err(|_| Error::shape("efficientpose heatmaps", "[1, H, W, 16]", heatmaps.shape()))?;
    let (height, width, channels) = view.dim();
    if channels != EFFICIENTPOSE_PARTS.len() || height == 0 || width == 0 {
        return Err(Error::shape("efficientpose heatmaps", "[1, H, W, 16]", heatmaps.shape()));
    }

    let keypoints: Vec<ParsedKeypoint> = (0..channels)
        .filter_map(|part| {
            let channel = view.index_axis(Axis(2), part);
            let ((y, x), score) = channel
                .indexed_iter()
                .filter(|(_, v)| v.is_finite())
                .fold(None, |best: Option<((usize, usize), f32)>, (index, &v)| match best {
                    Some((_, s)) if s >= v => best,
                    _ => Some((index, v)),
                })?;
            (score > config.min_confidence).then_some(ParsedKeypoint {
                part,
                position: Point3::new(x as f32 / width as f32, y as f32 / height as f32, 0.0),
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

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn test_argmax_per_channel() {
        let mut out = Array4::<f32>::zeros((1, 8, 8, 16));
        out[[0, 2, 6, 0]] = 0.9;
        out[[0, 5, 1, 0]] = 0.4;
        out[[0, 4, 4, 3]] = 0.6;
        let poses = parse(&[out.into_dyn()], &DetectorConfig::default()).unwrap();
        assert_eq!(poses.len(), 1);
        let pose = &poses[0];
        assert_eq!(pose.keypoints.len(), 2);
        assert_eq!(pose.keypoints[0].position, Point3::new(0.75, 0.25, 0.0));
        assert_eq!(pose.keypoints[1].part, 3);
        assert_eq!(pose.score, 0.9);
    }

    #[test]
    fn test_empty_heatmaps() {
        let out = Array4::<f32>::zeros((1, 8, 8, 16));
        assert!(parse(&[out.into_dyn()], &DetectorConfig::default())
            .unwrap()
            .is_empty());
    }
}
