pub mod coords;
pub mod model_mediapipe;
pub mod rotation;

use nalgebra::Point3;
use ndarray::Array4;

use crate::error::Result;

/// Raw mesh prediction for one face tile.
#[derive(Debug, Clone)]
pub struct MeshOutput {
    /// Landmarks in tile pixels.
    pub landmarks: Vec<Point3<f32>>,
    pub confidence: f32,
}

pub trait FaceLandmarksModel: Send {
    /// Square tile edge the model expects.
    fn input_size(&self) -> usize;

    /// Runs the mesh on a `[1, S, S, 3]` tile in `[0, 1]`.
    fn run(&self, tile: &Array4<f32>) -> Result<MeshOutput>;
}
