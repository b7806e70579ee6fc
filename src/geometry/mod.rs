//! Axis-aligned box helpers and 2D homogeneous transforms.
//!
//! Everything here is a pure function of its inputs. Boxes carry their
//! corners as `start_point`/`end_point`; the pixel and normalized `Rect`
//! forms are only produced at the edges when results are emitted.

use nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3};
use serde::Serialize;

use crate::utils::normalize_radians;

pub type Point = Point2<f32>;

/// `x, y, width, height` rectangle, either in pixels or normalized to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Smallest rect covering every rect in `rects`.
    pub fn union<'a>(rects: impl IntoIterator<Item = &'a Rect>) -> Option<Rect> {
        let mut iter = rects.into_iter();
        let first = iter.next()?;
        let (mut x0, mut y0, mut x1, mut y1) = (first.x, first.y, first.right(), first.bottom());
        for r in iter {
            x0 = x0.min(r.x);
            y0 = y0.min(r.y);
            x1 = x1.max(r.right());
            y1 = y1.max(r.bottom());
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn normalized(&self, width: f32, height: f32) -> Rect {
        Rect::new(
            self.x / width,
            self.y / height,
            self.width / width,
            self.height / height,
        )
    }
}

/// Normalized `[y0, x0, y1, x1]` crop rectangle in the order the external
/// crop-and-resize kernel expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropRect {
    pub y0: f32,
    pub x0: f32,
    pub y1: f32,
    pub x1: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub start_point: Point,
    pub end_point: Point,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            start_point: Point::new(x0, y0),
            end_point: Point::new(x1, y1),
        }
    }

    pub fn from_center(center: Point, size: Vector2<f32>) -> Self {
        let half = size / 2.0;
        Self {
            start_point: center - half,
            end_point: center + half,
        }
    }

    /// Extent of a set of points; `None` for an empty set.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f32>>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bbox = BoundingBox::new(first.x, first.y, first.x, first.y);
        for p in iter {
            bbox.start_point.x = bbox.start_point.x.min(p.x);
            bbox.start_point.y = bbox.start_point.y.min(p.y);
            bbox.end_point.x = bbox.end_point.x.max(p.x);
            bbox.end_point.y = bbox.end_point.y.max(p.y);
        }
        Some(bbox)
    }

    pub fn size(&self) -> Vector2<f32> {
        Vector2::new(
            (self.end_point.x - self.start_point.x).abs(),
            (self.end_point.y - self.start_point.y).abs(),
        )
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.start_point.x + (self.end_point.x - self.start_point.x) / 2.0,
            self.start_point.y + (self.end_point.y - self.start_point.y) / 2.0,
        )
    }

    pub fn area(&self) -> f32 {
        let size = self.size();
        size.x * size.y
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.area() > 0.0) || !self.start_point.coords.iter().all(|v| v.is_finite())
    }

    /// Scales the half-size by `factor` about the center.
    pub fn enlarge(&self, factor: f32) -> Self {
        Self::from_center(self.center(), self.size() * factor)
    }

    /// Equal width and height (the larger of the two), same center.
    pub fn squarify(&self) -> Self {
        let size = self.size();
        let side = size.x.max(size.y);
        Self::from_center(self.center(), Vector2::new(side, side))
    }

    /// Intersection with the `[0, 0, width, height]` frame.
    pub fn clamp(&self, width: f32, height: f32) -> Self {
        let x0 = self.start_point.x.clamp(0.0, width);
        let y0 = self.start_point.y.clamp(0.0, height);
        let x1 = self.end_point.x.clamp(x0, width.max(x0));
        let y1 = self.end_point.y.clamp(y0, height.max(y0));
        BoundingBox::new(x0, y0, x1, y1)
    }

    pub fn scale(&self, fx: f32, fy: f32) -> Self {
        BoundingBox::new(
            self.start_point.x * fx,
            self.start_point.y * fy,
            self.end_point.x * fx,
            self.end_point.y * fy,
        )
    }

    /// Normalized crop rectangle for an image of `width` x `height` pixels.
    /// Note the `y`-first order.
    pub fn crop_rect(&self, width: f32, height: f32) -> CropRect {
        CropRect {
            y0: self.start_point.y / height,
            x0: self.start_point.x / width,
            y1: self.end_point.y / height,
            x1: self.end_point.x / width,
        }
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x0 = self.start_point.x.max(other.start_point.x);
        let y0 = self.start_point.y.max(other.start_point.y);
        let x1 = self.end_point.x.min(other.end_point.x);
        let y1 = self.end_point.y.min(other.end_point.y);
        let intersection = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Pixel rect clamped to the frame, truncated to whole pixels.
    pub fn to_rect(&self, width: f32, height: f32) -> Rect {
        let clamped = self.clamp(width, height);
        let size = clamped.size();
        Rect::new(
            clamped.start_point.x.trunc(),
            clamped.start_point.y.trunc(),
            size.x.trunc(),
            size.y.trunc(),
        )
    }

    /// Unclamped rect normalized to the frame.
    pub fn to_raw_rect(&self, width: f32, height: f32) -> Rect {
        Rect::new(
            self.start_point.x / width,
            self.start_point.y / height,
            (self.end_point.x - self.start_point.x) / width,
            (self.end_point.y - self.start_point.y) / height,
        )
    }
}

pub fn translation_matrix(x: f32, y: f32) -> Matrix3<f32> {
    Matrix3::new(1.0, 0.0, x, 0.0, 1.0, y, 0.0, 0.0, 1.0)
}

/// Homogeneous rotation by `angle` radians about `center`.
pub fn rotation_matrix(angle: f32, center: Point) -> Matrix3<f32> {
    let (sin, cos) = angle.sin_cos();
    let rotation = Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0);
    translation_matrix(center.x, center.y) * rotation * translation_matrix(-center.x, -center.y)
}

/// Inverse of a rigid transform built by [`rotation_matrix`].
pub fn invert_transform(matrix: &Matrix3<f32>) -> Matrix3<f32> {
    let r0 = Vector2::new(matrix[(0, 0)], matrix[(1, 0)]);
    let r1 = Vector2::new(matrix[(0, 1)], matrix[(1, 1)]);
    let t = Vector2::new(matrix[(0, 2)], matrix[(1, 2)]);
    Matrix3::new(r0.x, r0.y, -r0.dot(&t), r1.x, r1.y, -r1.dot(&t), 0.0, 0.0, 1.0)
}

pub fn rotate_point(matrix: &Matrix3<f32>, point: Point) -> Point {
    let p = matrix * Vector3::new(point.x, point.y, 1.0);
    Point::new(p.x, p.y)
}

/// Angle that brings the `p1 -> p2` line upright. Coinciding points give 0.
pub fn compute_rotation(p1: Point, p2: Point) -> f32 {
    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;
    if dx == 0.0 && dy == 0.0 {
        return 0.0;
    }
    let angle = normalize_radians(std::f32::consts::FRAC_PI_2 - (-dy).atan2(dx));
    if angle.is_finite() {
        angle
    } else {
        0.0
    }
}
