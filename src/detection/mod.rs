//! Anchor-based box decoding shared by the face, palm and object detectors.

pub mod anchors;
pub mod nms;

use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix2};

pub use anchors::{Anchor, AnchorGrid, AnchorLayer};
pub use nms::non_max_suppression;

use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use crate::geometry::{BoundingBox, Point};
use crate::utils::{finite_or_zero, sigmoid};

/// Detector candidate in normalized input coordinates.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bounding_box: BoundingBox,
    pub score: f32,
    pub keypoints: Vec<Point>,
    pub anchor: usize,
}

/// Views a `[1, N, C]` or `[N, C]` output as `[N, C]`.
pub fn batch_rows<'a>(tensor: &'a ArrayD<f32>, what: &'static str) -> Result<ArrayView2<'a, f32>> {
    let view = tensor.view();
    let view = match view.ndim() {
        2 => view,
        3 if view.shape()[0] == 1 => view.index_axis_move(Axis(0), 0),
        _ => return Err(Error::shape(what, "[1, N, C]", tensor.shape())),
    };
    view.into_dimensionality::<Ix2>()
        .map_err(|_| Error::shape(what, "[1, N, C]", tensor.shape()))
}

/// Joins detector heads into `[N, 4 + 2K]` regressors and `[N]` logits.
///
/// Accepts either one combined `[1, N, 1 + 4 + 2K]` output, or split heads
/// where every `[1, n, 1]` output is a score head and every other output a
/// regressor head, concatenated in output order.
pub fn join_heads(outputs: &[ArrayD<f32>]) -> Result<(Array2<f32>, Array1<f32>)> {
    match outputs {
        [] => Err(Error::EmptyInput),
        [combined] => {
            let rows = batch_rows(combined, "detector output")?;
            let (boxes, logits) = split_logits(rows)?;
            Ok((boxes.to_owned(), logits.to_owned()))
        }
        heads => {
            let mut scores = Vec::new();
            let mut regressors = Vec::new();
            for head in heads {
                let rows = batch_rows(head, "detector head")?;
                if rows.ncols() == 1 {
                    scores.push(rows);
                } else {
                    regressors.push(rows);
                }
            }
            if scores.is_empty() || regressors.is_empty() {
                return Err(Error::shape(
                    "detector heads",
                    "score and regressor heads",
                    &[heads.len()],
                ));
            }
            let boxes = ndarray::concatenate(Axis(0), &regressors)
                .map_err(|_| Error::shape("regressor heads", "[n, C]", regressors[0].shape()))?;
            let logits = ndarray::concatenate(Axis(0), &scores)
                .map_err(|_| Error::shape("score heads", "[n, 1]", scores[0].shape()))?;
            Ok((boxes, logits.column(0).to_owned()))
        }
    }
}

/// Splits a combined `[N, 1 + 4 + 2K]` regressor (logit first) into the
/// `[N, 4 + 2K]` box regressors and the `[N]` logits.
pub fn split_logits(raw: ArrayView2<'_, f32>) -> Result<(ArrayView2<'_, f32>, ArrayView1<'_, f32>)> {
    if raw.ncols() < 5 {
        return Err(Error::shape("detector output", "[N, >=5]", raw.shape()));
    }
    let (logits, boxes) = raw.split_at(Axis(1), 1);
    Ok((boxes, logits.index_axis_move(Axis(1), 0)))
}

/// Decodes box regressors against `anchors`.
///
/// Each row is `dx, dy, w, h, kx0, ky0, ...` in input pixels. Centers are
/// offset from the anchor center and scaled by the anchor size; the result is
/// normalized to `[0, 1]` of the input.
pub fn decode_boxes(
    regressors: ArrayView2<'_, f32>,
    anchors: &AnchorGrid,
    input_size: f32,
    num_keypoints: usize,
) -> Result<Vec<(BoundingBox, Vec<Point>)>> {
    if regressors.nrows() != anchors.len() || regressors.ncols() < 4 + 2 * num_keypoints {
        return Err(Error::shape(
            "box regressors",
            "[anchors, 4 + 2 * keypoints]",
            regressors.shape(),
        ));
    }

    let decoded = regressors
        .rows()
        .into_iter()
        .zip(anchors.iter())
        .map(|(row, anchor)| {
            let x_center = row[0] / input_size * anchor.width + anchor.x_center;
            let y_center = row[1] / input_size * anchor.height + anchor.y_center;
            let w = row[2] / input_size * anchor.width;
            let h = row[3] / input_size * anchor.height;
            let bbox = BoundingBox::new(
                x_center - w / 2.0,
                y_center - h / 2.0,
                x_center + w / 2.0,
                y_center + h / 2.0,
            );
            let keypoints = (0..num_keypoints)
                .map(|k| {
                    let offset = 4 + k * 2;
                    Point::new(
                        row[offset] / input_size * anchor.width + anchor.x_center,
                        row[offset + 1] / input_size * anchor.height + anchor.y_center,
                    )
                })
                .collect();
            (bbox, keypoints)
        })
        .collect();
    Ok(decoded)
}

/// Full decode: sigmoid scores, anchor decoding and NMS.
///
/// Non-finite logits are treated as zero confidence.
pub fn decode_detections(
    regressors: ArrayView2<'_, f32>,
    logits: ArrayView1<'_, f32>,
    anchors: &AnchorGrid,
    input_size: f32,
    num_keypoints: usize,
    config: &DetectorConfig,
) -> Result<Vec<RawDetection>> {
    if logits.len() != anchors.len() {
        return Err(Error::shape("detector scores", "[anchors]", logits.shape()));
    }
    let decoded = decode_boxes(regressors, anchors, input_size, num_keypoints)?;
    let scores: Vec<f32> = logits
        .iter()
        .map(|&logit| if logit.is_nan() { 0.0 } else { finite_or_zero(sigmoid(logit)) })
        .collect();
    let boxes: Vec<BoundingBox> = decoded.iter().map(|(b, _)| *b).collect();

    let kept = non_max_suppression(
        &boxes,
        &scores,
        config.max_detected,
        config.iou_threshold,
        config.min_confidence,
    );
    tracing::trace!(candidates = boxes.len(), kept = kept.len(), "decoded detections");

    Ok(kept
        .into_iter()
        .map(|index| RawDetection {
            bounding_box: decoded[index].0,
            score: scores[index],
            keypoints: decoded[index].1.clone(),
            anchor: index,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn grid() -> AnchorGrid {
        AnchorGrid::generate(64, &[AnchorLayer::new(32, 1)])
    }

    #[test]
    fn test_decode_boxes_around_anchor() {
        let anchors = grid();
        let mut raw = Array2::<f32>::zeros((4, 6));
        // anchor 3 sits at (0.75, 0.75); shift by 8px and predict 16x32
        raw.row_mut(3).assign(&Array1::from(vec![8.0, 0.0, 16.0, 32.0, -16.0, 0.0]));

        let decoded = decode_boxes(raw.view(), &anchors, 64.0, 1).unwrap();
        let (bbox, keypoints) = &decoded[3];
        let center = bbox.center();
        assert!((center.x - 0.875).abs() < 1e-6);
        assert!((center.y - 0.75).abs() < 1e-6);
        assert!((bbox.size().x - 0.25).abs() < 1e-6);
        assert!((bbox.size().y - 0.5).abs() < 1e-6);
        assert!((keypoints[0].x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_detections_filters_and_orders() {
        let anchors = grid();
        let mut raw = Array2::<f32>::zeros((4, 4));
        for mut row in raw.rows_mut() {
            row[2] = 16.0;
            row[3] = 16.0;
        }
        let logits = Array1::from(vec![-5.0, 3.0, f32::NAN, 1.0]);
        let config = DetectorConfig {
            min_confidence: 0.5,
            iou_threshold: 0.3,
            max_detected: 10,
            ..DetectorConfig::default()
        };

        let detections =
            decode_detections(raw.view(), logits.view(), &anchors, 64.0, 0, &config).unwrap();
        let indices: Vec<usize> = detections.iter().map(|d| d.anchor).collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(detections[0].score > detections[1].score);
    }

    #[test]
    fn test_split_logits() {
        let raw = Array2::from_shape_vec((2, 5), (0..10).map(|v| v as f32).collect()).unwrap();
        let (boxes, logits) = split_logits(raw.view()).unwrap();
        assert_eq!(logits.to_vec(), vec![0.0, 5.0]);
        assert_eq!(boxes.shape(), &[2, 4]);
        assert_eq!(boxes[[1, 0]], 6.0);
    }

    #[test]
    fn test_join_split_heads() {
        let scores_a = ArrayD::from_shape_vec(vec![1, 2, 1], vec![0.1, 0.2]).unwrap();
        let boxes_a = ArrayD::from_shape_vec(vec![1, 2, 4], vec![1.0; 8]).unwrap();
        let scores_b = ArrayD::from_shape_vec(vec![1, 1, 1], vec![0.3]).unwrap();
        let boxes_b = ArrayD::from_shape_vec(vec![1, 1, 4], vec![2.0; 4]).unwrap();

        let (boxes, logits) = join_heads(&[scores_a, scores_b, boxes_a, boxes_b]).unwrap();
        assert_eq!(logits.to_vec(), vec![0.1, 0.2, 0.3]);
        assert_eq!(boxes.shape(), &[3, 4]);
        assert_eq!(boxes[[2, 0]], 2.0);
    }

    #[test]
    fn test_join_combined_head() {
        let combined = ArrayD::from_shape_vec(vec![1, 2, 5], (0..10).map(|v| v as f32).collect()).unwrap();
        let (boxes, logits) = join_heads(&[combined]).unwrap();
        assert_eq!(logits.to_vec(), vec![0.0, 5.0]);
        assert_eq!(boxes.shape(), &[2, 4]);
        assert!(matches!(join_heads(&[]), Err(Error::EmptyInput)));
    }

    #[test]
    fn test_shape_mismatch() {
        let anchors = grid();
        let raw = Array2::<f32>::zeros((3, 4));
        assert!(matches!(
            decode_boxes(raw.view(), &anchors, 64.0, 0),
            Err(Error::Shape { .. })
        ));
    }
}
