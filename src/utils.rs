use std::f32::consts::PI;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Replaces NaN and infinities with zero.
pub fn finite_or_zero(x: f32) -> f32 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Wraps an angle into `[-PI, PI)`.
pub fn normalize_radians(angle: f32) -> f32 {
    angle - 2.0 * PI * ((angle + PI) / (2.0 * PI)).floor()
}

/// Rounds to two decimals, the precision scores are reported with.
pub fn round2(x: f32) -> f32 {
    (100.0 * x).round() / 100.0
}

/// Truncates to two decimals.
pub fn trunc2(x: f32) -> f32 {
    (100.0 * x).trunc() / 100.0
}
