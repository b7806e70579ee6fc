use ndarray::Array4;

use crate::config::DetectorConfig;
use crate::detection::{decode_detections, join_heads, AnchorGrid};
use crate::error::Result;
use crate::face_detection::{FaceBox, FaceDetectionModel};
use crate::geometry::Point;
use crate::runtime::{GraphModel, ImageKernels};

/// BlazeFace short-range detector: one `[1, N, 17]` output (logit, box,
/// six keypoints) or the equivalent split score/regressor heads.
pub struct BlazefaceModel {
    model: Box<dyn GraphModel>,
    anchors: AnchorGrid,
}

impl BlazefaceModel {
    pub const KEYPOINTS: usize = 6;
    /// Detector boxes are tight around the features; the mesh wants the
    /// whole head.
    pub const BOX_SCALE: f32 = 1.5;

    pub fn new(model: Box<dyn GraphModel>) -> Self {
        let anchors = AnchorGrid::blazeface(model.input_size());
        Self::with_anchors(model, anchors)
    }

    /// Uses a precomputed anchor table, e.g. one read with
    /// [`AnchorGrid::read_npy`].
    pub fn with_anchors(model: Box<dyn GraphModel>, anchors: AnchorGrid) -> Self {
        Self { model, anchors }
    }
}

impl FaceDetectionModel for BlazefaceModel {
    fn detect(
        &self,
        image: &Array4<f32>,
        kernels: &dyn ImageKernels,
        config: &DetectorConfig,
    ) -> Result<Vec<FaceBox>> {
        let (_, height, width, _) = image.dim();
        if height == 0 || width == 0 {
            return Ok(Vec::new());
        }
        let (width, height) = (width as f32, height as f32);

        let size = self.model.input_size();
        // model expects [-1, 1]
        let input = kernels.resize(image, size, size).mapv(|v| v * 2.0 - 1.0);
        let outputs = self.model.execute(&input)?;
        let (regressors, logits) = join_heads(&outputs)?;

        let detections = decode_detections(
            regressors.view(),
            logits.view(),
            &self.anchors,
            size as f32,
            Self::KEYPOINTS,
            config,
        )?;

        let faces = detections
            .into_iter()
            .filter_map(|detection| {
                let bbox = detection
                    .bounding_box
                    .scale(width, height)
                    .enlarge(Self::BOX_SCALE)
                    .squarify();
                if bbox.is_degenerate() {
                    tracing::debug!(anchor = detection.anchor, "dropping degenerate face box");
                    return None;
                }
                let keypoints = detection
                    .keypoints
                    .iter()
                    .map(|p| Point::new(p.x * width, p.y * height))
                    .collect();
                Some(FaceBox {
                    bbox,
                    score: detection.score,
                    keypoints,
                })
            })
            .collect::<Vec<_>>();

        tracing::debug!(faces = faces.len(), "face detector");
        Ok(faces)
    }
}
