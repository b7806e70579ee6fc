pub mod iris;

use nalgebra::Point3;
use ndarray::Array4;

use crate::error::{Error, Result};
use crate::face_landmarks::coords::{MESH_POINTS, REFINED_MESH_POINTS};
use crate::face_landmarks::{FaceLandmarksModel, MeshOutput};
use crate::runtime::GraphModel;
use crate::utils::sigmoid;

pub use iris::IrisModel;

/// MediaPipe face mesh. Outputs are matched by size: the `468 * 3` (or
/// `478 * 3` for attention meshes) landmark tensor and the single face flag
/// logit, in whatever order the graph declares them.
pub struct MediapipeFaceLandmarksModel {
    model: Box<dyn GraphModel>,
}

impl MediapipeFaceLandmarksModel {
    pub fn new(model: Box<dyn GraphModel>) -> Self {
        Self { model }
    }
}

impl FaceLandmarksModel for MediapipeFaceLandmarksModel {
    fn input_size(&self) -> usize {
        self.model.input_size()
    }

    fn run(&self, tile: &Array4<f32>) -> Result<MeshOutput> {
        let outputs = self.model.execute(tile)?;

        let mesh = outputs
            .iter()
            .find(|o| o.len() == MESH_POINTS * 3 || o.len() == REFINED_MESH_POINTS * 3)
            .ok_or_else(|| Error::shape("mesh output", "[1, 1404]", &[outputs.len()]))?;
        let flag = outputs
            .iter()
            .find(|o| o.len() == 1)
            .and_then(|o| o.iter().next().copied())
            .ok_or_else(|| Error::shape("face flag", "[1, 1]", &[outputs.len()]))?;

        let values: Vec<f32> = mesh.iter().copied().collect();
        let landmarks = values
            .chunks_exact(3)
            .map(|p| Point3::new(p[0], p[1], p[2]))
            .collect();

        Ok(MeshOutput {
            landmarks,
            confidence: sigmoid(flag),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    struct FlatMesh;

    impl GraphModel for FlatMesh {
        fn execute(&self, _input: &Array4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
            let flag = ArrayD::from_elem(vec![1, 1, 1, 1], 2.0);
            let mesh = ArrayD::from_shape_fn(vec![1, 1, 1, 1404], |i| (i[3] % 3) as f32);
            Ok(vec![flag, mesh])
        }

        fn input_size(&self) -> usize {
            192
        }
    }

    struct Broken;

    impl GraphModel for Broken {
        fn execute(&self, _input: &Array4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>> {
            Ok(vec![ArrayD::zeros(vec![1, 10])])
        }

        fn input_size(&self) -> usize {
            192
        }
    }

    #[test]
    fn test_outputs_matched_by_size() {
        let model = MediapipeFaceLandmarksModel::new(Box::new(FlatMesh));
        let out = model.run(&Array4::zeros((1, 192, 192, 3))).unwrap();
        assert_eq!(out.landmarks.len(), 468);
        assert_eq!(out.landmarks[10], Point3::new(0.0, 1.0, 2.0));
        assert!((out.confidence - sigmoid(2.0)).abs() < 1e-6);
    }

    #[test]
    fn test_missing_mesh_is_shape_error() {
        let model = MediapipeFaceLandmarksModel::new(Box::new(Broken));
        assert!(matches!(
            model.run(&Array4::zeros((1, 192, 192, 3))),
            Err(Error::Shape { .. })
        ));
    }
}
