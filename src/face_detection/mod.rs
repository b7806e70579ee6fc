pub mod model_blazeface;

use ndarray::Array4;

use crate::config::DetectorConfig;
use crate::error::Result;
use crate::geometry::{BoundingBox, Point};
use crate::runtime::ImageKernels;

/// A face candidate in frame pixels, ready to be cropped for the mesh model.
#[derive(Debug, Clone)]
pub struct FaceBox {
    /// Enlarged and squarified detector box.
    pub bbox: BoundingBox,
    pub score: f32,
    /// Coarse keypoints: right eye, left eye, nose, mouth, right ear, left ear.
    pub keypoints: Vec<Point>,
}

impl FaceBox {
    /// Mouth to nose, used to level the crop.
    pub const SYMMETRY_LINE: [usize; 2] = [3, 2];

    pub fn symmetry_points(&self) -> Option<(Point, Point)> {
        let [from, to] = Self::SYMMETRY_LINE;
        Some((*self.keypoints.get(from)?, *self.keypoints.get(to)?))
    }
}

pub trait FaceDetectionModel: Send {
    /// Runs the detector over a `[1, H, W, 3]` frame in `[0, 1]`.
    fn detect(
        &self,
        image: &Array4<f32>,
        kernels: &dyn ImageKernels,
        config: &DetectorConfig,
    ) -> Result<Vec<FaceBox>>;
}
