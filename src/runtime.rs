//! Seams to the tensor engine.
//!
//! Models and image kernels live outside this crate; the pipelines only see
//! these two traits. [`CpuKernels`] is a small nearest-neighbour
//! implementation good enough for tests and offline tooling.

use ndarray::{s, Array4, ArrayD};

use crate::geometry::{CropRect, Point};

/// A loaded network. Inputs are `[1, H, W, C]` tensors normalized the way the
/// model expects; outputs come back in the model's declared order.
pub trait GraphModel: Send {
    fn execute(&self, input: &Array4<f32>) -> anyhow::Result<Vec<ArrayD<f32>>>;

    /// Square input edge in pixels.
    fn input_size(&self) -> usize;
}

/// Image primitives the pipelines need from the engine.
///
/// Optional primitives return `None` when the backend does not expose them;
/// callers fall back to an unrotated or unflipped path.
pub trait ImageKernels {
    /// Crops the normalized `[y0, x0, y1, x1]` region and resizes it to
    /// `size` x `size`.
    fn crop_and_resize(&self, image: &Array4<f32>, crop: CropRect, size: usize) -> Array4<f32>;

    fn resize(&self, image: &Array4<f32>, height: usize, width: usize) -> Array4<f32>;

    /// Rotates by `radians` about `center` (normalized to the image size).
    fn rotate_with_offset(
        &self,
        image: &Array4<f32>,
        radians: f32,
        center: Point,
    ) -> Option<Array4<f32>>;

    fn flip_left_right(&self, image: &Array4<f32>) -> Option<Array4<f32>>;
}

/// Nearest-neighbour reference kernels. Samples outside the image are zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuKernels;

impl CpuKernels {
    fn sample(image: &Array4<f32>, y: f32, x: f32, channel: usize) -> f32 {
        let (_, height, width, _) = image.dim();
        if !(y >= 0.0 && x >= 0.0) {
            return 0.0;
        }
        let (yi, xi) = (y as usize, x as usize);
        if yi >= height || xi >= width {
            return 0.0;
        }
        image[[0, yi, xi, channel]]
    }
}

impl ImageKernels for CpuKernels {
    fn crop_and_resize(&self, image: &Array4<f32>, crop: CropRect, size: usize) -> Array4<f32> {
        let (_, height, width, channels) = image.dim();
        let (height, width) = (height as f32, width as f32);
        let step_y = (crop.y1 - crop.y0) * height / size as f32;
        let step_x = (crop.x1 - crop.x0) * width / size as f32;

        Array4::from_shape_fn((1, size, size, channels), |(_, y, x, c)| {
            let src_y = crop.y0 * height + (y as f32 + 0.5) * step_y;
            let src_x = crop.x0 * width + (x as f32 + 0.5) * step_x;
            Self::sample(image, src_y, src_x, c)
        })
    }

    fn resize(&self, image: &Array4<f32>, height: usize, width: usize) -> Array4<f32> {
        let (_, src_height, src_width, channels) = image.dim();
        let scale_y = src_height as f32 / height as f32;
        let scale_x = src_width as f32 / width as f32;

        Array4::from_shape_fn((1, height, width, channels), |(_, y, x, c)| {
            Self::sample(image, (y as f32 + 0.5) * scale_y, (x as f32 + 0.5) * scale_x, c)
        })
    }

    fn rotate_with_offset(
        &self,
        image: &Array4<f32>,
        radians: f32,
        center: Point,
    ) -> Option<Array4<f32>> {
        let (_, height, width, channels) = image.dim();
        let cx = center.x * width as f32;
        let cy = center.y * height as f32;
        let (sin, cos) = radians.sin_cos();

        // output pixel p samples the input at rotation_matrix(radians, center) * p,
        // so landmarks found in the output map back with the same matrix
        Some(Array4::from_shape_fn(
            (1, height, width, channels),
            |(_, y, x, c)| {
                let dx = x as f32 + 0.5 - cx;
                let dy = y as f32 + 0.5 - cy;
                let src_x = cos * dx - sin * dy + cx;
                let src_y = sin * dx + cos * dy + cy;
                Self::sample(image, src_y, src_x, c)
            },
        ))
    }

    fn flip_left_right(&self, image: &Array4<f32>) -> Option<Array4<f32>> {
        Some(image.slice(s![.., .., ..;-1, ..]).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(height: usize, width: usize) -> Array4<f32> {
        Array4::from_shape_fn((1, height, width, 3), |(_, y, x, c)| {
            (y * width + x) as f32 + c as f32 * 0.1
        })
    }

    #[test]
    fn test_crop_and_resize_identity() {
        let image = gradient(4, 4);
        let crop = CpuKernels.crop_and_resize(
            &image,
            CropRect {
                y0: 0.0,
                x0: 0.0,
                y1: 1.0,
                x1: 1.0,
            },
            4,
        );
        assert_eq!(crop, image);
    }

    #[test]
    fn test_crop_and_resize_quadrant() {
        let image = gradient(4, 4);
        let crop = CpuKernels.crop_and_resize(
            &image,
            CropRect {
                y0: 0.5,
                x0: 0.5,
                y1: 1.0,
                x1: 1.0,
            },
            2,
        );
        assert_eq!(crop.dim(), (1, 2, 2, 3));
        assert_eq!(crop[[0, 0, 0, 0]], image[[0, 2, 2, 0]]);
        assert_eq!(crop[[0, 1, 1, 0]], image[[0, 3, 3, 0]]);
    }

    #[test]
    fn test_crop_outside_is_zero() {
        let image = Array4::from_elem((1, 4, 4, 3), 1.0);
        let crop = CpuKernels.crop_and_resize(
            &image,
            CropRect {
                y0: -1.0,
                x0: -1.0,
                y1: 0.0,
                x1: 0.0,
            },
            2,
        );
        assert!(crop.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_resize() {
        let image = gradient(4, 8);
        let small = CpuKernels.resize(&image, 2, 4);
        assert_eq!(small.dim(), (1, 2, 4, 3));
        assert_eq!(small[[0, 1, 3, 0]], image[[0, 3, 7, 0]]);
    }

    #[test]
    fn test_rotate_zero_is_identity() {
        let image = gradient(6, 6);
        let rotated = CpuKernels
            .rotate_with_offset(&image, 0.0, Point::new(0.5, 0.5))
            .unwrap();
        assert_eq!(rotated, image);
    }

    #[test]
    fn test_flip() {
        let image = gradient(2, 3);
        let flipped = CpuKernels.flip_left_right(&image).unwrap();
        assert_eq!(flipped[[0, 0, 0, 0]], image[[0, 0, 2, 0]]);
        assert_eq!(flipped[[0, 1, 2, 1]], image[[0, 1, 0, 1]]);
    }
}
