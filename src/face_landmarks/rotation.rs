//! Head orientation and gaze from the face mesh.

use std::f32::consts::{FRAC_PI_2, PI};

use nalgebra::{Matrix3, Point3, Vector2, Vector3};

use crate::geometry::Rect;
use crate::result::{EulerAngles, Gaze, RotationDescriptor};

use super::coords::REFINED_MESH_POINTS;

/// Fewer points than this cannot be a mesh.
const MIN_MESH_POINTS: usize = 300;

// forehead, chin, right and left face edge
const TOP: usize = 10;
const BOTTOM: usize = 152;
const RIGHT: usize = 234;
const LEFT: usize = 454;

/// Orientation of the face described by `mesh_raw` (normalized mesh) inside
/// a `canvas_width` x `canvas_height` frame. `None` for sparse meshes.
pub fn face_rotation(
    mesh: &[Point3<f32>],
    mesh_raw: &[Point3<f32>],
    rect_raw: &Rect,
    canvas_width: f32,
    canvas_height: f32,
) -> Option<RotationDescriptor> {
    if mesh_raw.len() < MIN_MESH_POINTS || mesh.len() != mesh_raw.len() {
        return None;
    }

    let size = (rect_raw.width * canvas_width).max(rect_raw.height * canvas_height) / 1.5;
    if !(size > 0.0) {
        return None;
    }
    let scaled = |i: usize| {
        let p = mesh_raw[i];
        Vector3::new(p.x * canvas_width / size, p.y * canvas_height / size, p.z)
    };

    let y_axis = normalize(scaled(BOTTOM) - scaled(TOP));
    let x_axis = normalize(scaled(LEFT) - scaled(RIGHT));
    let z_axis = normalize(x_axis.cross(&y_axis));
    let x_axis = y_axis.cross(&z_axis);

    let matrix = Matrix3::from_rows(&[x_axis.transpose(), y_axis.transpose(), z_axis.transpose()]);
    let angle = euler_angles(&matrix);
    let gaze = if mesh.len() == REFINED_MESH_POINTS {
        gaze(mesh, rect_raw)
    } else {
        Gaze::default()
    };

    Some(RotationDescriptor {
        angle,
        matrix,
        gaze,
    })
}

fn normalize(v: Vector3<f32>) -> Vector3<f32> {
    let norm = v.norm();
    if norm > 0.0 {
        v / norm
    } else {
        v
    }
}

/// Decomposes a row-major axis matrix. Angles are doubled and negated, which
/// is the scale the mesh depth produces.
fn euler_angles(r: &Matrix3<f32>) -> EulerAngles {
    let (r00, r11, r12) = (r[(0, 0)], r[(1, 1)], r[(1, 2)]);
    let (r10, r20, r21, r22) = (r[(1, 0)], r[(2, 0)], r[(2, 1)], r[(2, 2)]);

    let (x, y, z) = if r10 >= 1.0 {
        (0.0, r21.atan2(r22), FRAC_PI_2)
    } else if r10 <= -1.0 {
        (0.0, -r21.atan2(r22), -FRAC_PI_2)
    } else {
        ((-r12).atan2(r11), (-r20).atan2(r00), r10.asin())
    };

    let finite = |v: f32| if v.is_nan() { 0.0 } else { v };
    EulerAngles {
        pitch: -2.0 * finite(x),
        yaw: -2.0 * finite(y),
        roll: -2.0 * finite(z),
    }
}

/// Iris offset from the center of the eye closer to the camera.
fn gaze(mesh: &[Point3<f32>], rect_raw: &Rect) -> Gaze {
    // iris center sits slightly above the corner midpoint
    let iris_offset = Vector2::new(0.0, -0.1);

    let use_right = mesh[33].z > mesh[263].z;
    let (iris, eye_center, eye_size) = if use_right {
        (
            mesh[473],
            midpoint(&mesh[133], &mesh[33]),
            Vector2::new(mesh[133].x - mesh[33].x, mesh[23].y - mesh[27].y),
        )
    } else {
        (
            mesh[468],
            midpoint(&mesh[263], &mesh[362]),
            Vector2::new(mesh[263].x - mesh[362].x, mesh[253].y - mesh[257].y),
        )
    };
    if eye_size.x == 0.0 || eye_size.y == 0.0 {
        return Gaze::default();
    }

    let diff = Vector2::new(
        (eye_center.x - iris.x) / eye_size.x,
        (iris.y - eye_center.y) / eye_size.y,
    ) - iris_offset;
    let strength = diff
        .norm()
        .min(rect_raw.width / 2.0)
        .min(rect_raw.height / 2.0);
    let bearing = (diff.y.atan2(diff.x) + FRAC_PI_2) % PI;

    Gaze {
        bearing: if bearing.is_finite() { bearing } else { 0.0 },
        strength: if strength.is_finite() { strength } else { 0.0 },
    }
}

fn midpoint(a: &Point3<f32>, b: &Point3<f32>) -> Vector2<f32> {
    Vector2::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}
