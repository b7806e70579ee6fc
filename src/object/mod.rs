//! CenterNet style object detector with COCO labels.

use ndarray::{Array4, ArrayD};

use crate::cache::DetectorState;
use crate::config::DetectorConfig;
use crate::detection::{batch_rows, non_max_suppression};
use crate::error::{Error, Result};
use crate::geometry::BoundingBox;
use crate::result::ObjectResult;
use crate::runtime::{GraphModel, ImageKernels};
use crate::utils::{finite_or_zero, trunc2};

pub static COCO_LABELS: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Decodes a `[1, N, 6]` output of `x1, y1, x2, y2, score, class` rows in
/// input pixels. Rows with an unknown class are dropped.
pub fn decode(
    output: &ArrayD<f32>,
    input_size: usize,
    width: f32,
    height: f32,
    config: &DetectorConfig,
) -> Result<Vec<ObjectResult>> {
    let rows = batch_rows(output, "object output")?;
    if rows.ncols() != 6 {
        return Err(Error::shape("object output", "[1, N, 6]", output.shape()));
    }

    let size = input_size as f32;
    let boxes: Vec<BoundingBox> = rows
        .rows()
        .into_iter()
        .map(|r| BoundingBox::new(r[0] / size, r[1] / size, r[2] / size, r[3] / size))
        .collect();
    let scores: Vec<f32> = rows.column(4).iter().map(|&s| finite_or_zero(s)).collect();
    let kept = non_max_suppression(
        &boxes,
        &scores,
        config.max_detected,
        config.iou_threshold,
        config.min_confidence,
    );

    let objects = kept
        .into_iter()
        .filter_map(|index| {
            let class = rows[[index, 5]];
            let label = (class >= 0.0)
                .then(|| COCO_LABELS.get(class as usize))
                .flatten();
            let Some(&label) = label else {
                tracing::debug!(class, "dropping object with unknown class");
                return None;
            };
            let bbox = boxes[index];
            if bbox.is_degenerate() {
                return None;
            }
            let pixels = bbox.scale(width, height);
            Some(ObjectResult {
                id: 0,
                score: trunc2(scores[index]),
                class: class as usize,
                label,
                rect: pixels.to_rect(width, height),
                rect_raw: bbox.to_raw_rect(1.0, 1.0),
            })
        })
        .enumerate()
        .map(|(id, object)| ObjectResult { id, ..object })
        .collect();
    Ok(objects)
}

pub struct ObjectDetector {
    model: Box<dyn GraphModel>,
    config: DetectorConfig,
    state: DetectorState<ObjectResult>,
}

impl ObjectDetector {
    pub fn new(model: Box<dyn GraphModel>, config: DetectorConfig) -> Self {
        Self {
            model,
            config,
            state: DetectorState::default(),
        }
    }

    pub fn predict(
        &mut self,
        image: &Array4<f32>,
        kernels: &dyn ImageKernels,
        now_ms: u64,
        frame_unchanged: bool,
    ) -> Result<Vec<ObjectResult>> {
        let (_, height, width, _) = image.dim();
        if height == 0 || width == 0 {
            return Ok(Vec::new());
        }
        if self.state.can_skip(&self.config, now_ms, frame_unchanged) {
            self.state.mark_skipped();
            tracing::debug!(skipped = self.state.skipped(), "reusing cached objects");
            return Ok(self.state.boxes.clone());
        }

        let size = self.model.input_size();
        let input = kernels.resize(image, size, size);
        let outputs = self.model.execute(&input)?;
        let output = outputs
            .first()
            .ok_or_else(|| Error::shape("object output", "[1, N, 6]", &[0]))?;
        let objects = decode(output, size, width as f32, height as f32, &self.config)?;
        tracing::debug!(objects = objects.len(), "object detector");

        self.state.refresh(objects.clone(), now_ms);
        Ok(objects)
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }
}
