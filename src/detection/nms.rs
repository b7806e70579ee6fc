use std::cmp::Ordering;

use crate::geometry::BoundingBox;

/// Greedy non-max suppression.
///
/// Candidates are visited by descending score (ties by ascending index, so
/// the result is stable) and accepted while their IoU with every accepted box
/// stays below `iou_threshold`. Returns accepted indices in acceptance order.
pub fn non_max_suppression(
    boxes: &[BoundingBox],
    scores: &[f32],
    max_detected: usize,
    iou_threshold: f32,
    min_confidence: f32,
) -> Vec<usize> {
    let count = boxes.len().min(scores.len());
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by(|&a, &b| compare_scores(scores[b], scores[a]).then(a.cmp(&b)));

    let mut accepted: Vec<usize> = Vec::with_capacity(max_detected.min(count));
    for index in order {
        if accepted.len() >= max_detected {
            break;
        }
        let score = scores[index];
        if !(score >= min_confidence) {
            break;
        }
        let overlaps = accepted
            .iter()
            .any(|&kept| boxes[kept].iou(&boxes[index]) >= iou_threshold);
        if !overlaps {
            accepted.push(index);
        }
    }
    accepted
}

/// Orders scores with NaN treated as the lowest value.
fn compare_scores(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.total_cmp(&b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes() -> Vec<BoundingBox> {
        vec![
            BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            BoundingBox::new(1.0, 1.0, 11.0, 11.0),
            BoundingBox::new(50.0, 50.0, 60.0, 60.0),
            BoundingBox::new(51.0, 50.0, 61.0, 60.0),
            BoundingBox::new(100.0, 0.0, 110.0, 10.0),
        ]
    }

    #[test]
    fn test_suppresses_overlaps() {
        let scores = [0.9, 0.8, 0.7, 0.95, 0.1];
        let kept = non_max_suppression(&boxes(), &scores, 10, 0.3, 0.2);
        assert_eq!(kept, vec![3, 0]);
    }

    #[test]
    fn test_max_detected() {
        let scores = [0.9, 0.8, 0.7, 0.95, 0.6];
        let kept = non_max_suppression(&boxes(), &scores, 2, 0.3, 0.0);
        assert_eq!(kept, vec![3, 0]);
    }

    #[test]
    fn test_idempotent() {
        let all = boxes();
        let scores = [0.9, 0.8, 0.7, 0.95, 0.6];
        let kept = non_max_suppression(&all, &scores, 10, 0.3, 0.2);

        let kept_boxes: Vec<BoundingBox> = kept.iter().map(|&i| all[i]).collect();
        let kept_scores: Vec<f32> = kept.iter().map(|&i| scores[i]).collect();
        let again = non_max_suppression(&kept_boxes, &kept_scores, 10, 0.3, 0.2);
        assert_eq!(again, (0..kept.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_ties_are_deterministic() {
        let b = vec![BoundingBox::new(0.0, 0.0, 10.0, 10.0); 3];
        let scores = [0.5, 0.5, 0.5];
        for _ in 0..5 {
            assert_eq!(non_max_suppression(&b, &scores, 3, 0.3, 0.1), vec![0]);
        }
    }

    #[test]
    fn test_nan_scores_rejected() {
        let scores = [f32::NAN, 0.8, f32::NAN, 0.4, 0.3];
        let kept = non_max_suppression(&boxes(), &scores, 10, 0.3, 0.2);
        assert_eq!(kept, vec![1, 3, 4]);
    }

    #[test]
    fn test_empty_input() {
        assert!(non_max_suppression(&[], &[], 5, 0.3, 0.2).is_empty());
    }
}
