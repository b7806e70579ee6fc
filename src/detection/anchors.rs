use std::io::Read;

use ndarray::Array2;
use ndarray_npy::ReadNpyExt;

use crate::error::{Error, Result};

/// Reference box a detector regresses against, normalized to the input size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
}

/// One SSD feature layer: stride in input pixels and anchors per grid cell.
#[derive(Debug, Clone, Copy)]
pub struct AnchorLayer {
    pub stride: usize,
    pub anchors_per_cell: usize,
}

impl AnchorLayer {
    pub const fn new(stride: usize, anchors_per_cell: usize) -> Self {
        Self {
            stride,
            anchors_per_cell,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnchorGrid {
    anchors: Vec<Anchor>,
}

impl AnchorGrid {
    /// Fixed-size anchors centered on every grid cell of every layer.
    pub fn generate(input_size: usize, layers: &[AnchorLayer]) -> Self {
        let mut anchors = Vec::new();
        let size = input_size as f32;
        for layer in layers {
            let cells = (input_size + layer.stride - 1) / layer.stride;
            for grid_y in 0..cells {
                let y_center = layer.stride as f32 * (grid_y as f32 + 0.5) / size;
                for grid_x in 0..cells {
                    let x_center = layer.stride as f32 * (grid_x as f32 + 0.5) / size;
                    for _ in 0..layer.anchors_per_cell {
                        anchors.push(Anchor {
                            x_center,
                            y_center,
                            width: 1.0,
                            height: 1.0,
                        });
                    }
                }
            }
        }
        Self { anchors }
    }

    /// BlazeFace short-range grid (896 anchors at 128x128).
    pub fn blazeface(input_size: usize) -> Self {
        Self::generate(
            input_size,
            &[
                AnchorLayer::new(input_size / 16, 2),
                AnchorLayer::new(input_size / 8, 6),
            ],
        )
    }

    /// Palm detector grid (2944 anchors at 256x256).
    pub fn palm(input_size: usize) -> Self {
        Self::generate(
            input_size,
            &[
                AnchorLayer::new(8, 2),
                AnchorLayer::new(16, 2),
                AnchorLayer::new(32, 6),
            ],
        )
    }

    /// Reads a precomputed `[N, 4]` anchor table (`x, y, w, h`) stored as `.npy`.
    pub fn read_npy<R: Read>(reader: R) -> Result<Self> {
        let table: Array2<f64> =
            Array2::read_npy(reader).map_err(|e| Error::Runtime(anyhow::Error::new(e)))?;
        if table.ncols() != 4 {
            return Err(Error::shape("anchor table", "[N, 4]", table.shape()));
        }
        let anchors = table
            .rows()
            .into_iter()
            .map(|row| Anchor {
                x_center: row[0] as f32,
                y_center: row[1] as f32,
                width: row[2] as f32,
                height: row[3] as f32,
            })
            .collect();
        Ok(Self { anchors })
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Anchor> {
        self.anchors.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.anchors.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_npy::WriteNpyExt;

    #[test]
    fn test_blazeface_anchor_count() {
        let grid = AnchorGrid::blazeface(128);
        assert_eq!(grid.len(), 896);
        let first = grid.get(0).unwrap();
        assert!((first.x_center - 4.0 / 128.0).abs() < 1e-6);
        assert!((first.y_center - 4.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_palm_anchor_count() {
        assert_eq!(AnchorGrid::palm(256).len(), 2944);
    }

    #[test]
    fn test_anchor_centers_inside_unit_square() {
        for anchor in AnchorGrid::palm(256).iter() {
            assert!(anchor.x_center > 0.0 && anchor.x_center < 1.0);
            assert!(anchor.y_center > 0.0 && anchor.y_center < 1.0);
        }
    }

    #[test]
    fn test_read_npy() {
        let table = array![[0.5f64, 0.25, 1.0, 1.0], [0.75, 0.75, 2.0, 0.5]];
        let mut bytes = Vec::new();
        table.write_npy(&mut bytes).unwrap();

        let grid = AnchorGrid::read_npy(bytes.as_slice()).unwrap();
        assert_eq!(grid.len(), 2);
        assert_eq!(
            grid.get(1),
            Some(&Anchor {
                x_center: 0.75,
                y_center: 0.75,
                width: 2.0,
                height: 0.5
            })
        );
    }

    #[test]
    fn test_read_npy_rejects_wrong_width() {
        let table = array![[0.5f64, 0.25, 1.0]];
        let mut bytes = Vec::new();
        table.write_npy(&mut bytes).unwrap();
        assert!(matches!(
            AnchorGrid::read_npy(bytes.as_slice()),
            Err(Error::Shape { .. })
        ));
    }
}
