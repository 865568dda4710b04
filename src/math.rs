use std::f32::consts::PI;

use glam::{Mat3, Quat, Vec3};

pub const EPSILON: f32 = 1.0e-6;

const PARALLEL_COS: f32 = 1.0 - 1.0e-6;

/// Unit vector in the direction of `v`, or zero when `v` has no usable length.
pub fn normalize_or_zero(v: Vec3) -> Vec3 {
    normalize_or(v, Vec3::ZERO)
}

pub fn normalize_or(v: Vec3, fallback: Vec3) -> Vec3 {
    let len_sq = v.length_squared();
    if len_sq <= EPSILON * EPSILON || !len_sq.is_finite() {
        return fallback;
    }
    v / len_sq.sqrt()
}

/// Mean of `sum` over `count` samples, zero when nothing was sampled.
pub fn mean_or_zero(sum: Vec3, count: usize) -> Vec3 {
    if count == 0 {
        return Vec3::ZERO;
    }
    sum / count as f32
}

/// Spherical interpolation treating both inputs as directions with a
/// magnitude: the angle is interpolated along the great arc and the length
/// linearly. Falls back to a straight lerp when either side has no length.
pub fn slerp_directions(from: Vec3, to: Vec3, t: f32) -> Vec3 {
    let t = clamp_finite(t, 0.0, 1.0, 0.0);
    let from_len = from.length();
    let to_len = to.length();
    if from_len <= EPSILON || to_len <= EPSILON {
        return from.lerp(to, t);
    }

    let from_dir = from / from_len;
    let to_dir = to / to_len;
    let len = from_len + (to_len - from_len) * t;
    let cos = from_dir.dot(to_dir).clamp(-1.0, 1.0);

    let dir = if cos >= PARALLEL_COS {
        normalize_or(from_dir.lerp(to_dir, t), from_dir)
    } else if cos <= -PARALLEL_COS {
        // Opposite directions have no unique arc; turn about any perpendicular.
        let axis = from_dir.any_orthonormal_vector();
        Quat::from_axis_angle(axis, PI * t) * from_dir
    } else {
        let axis = normalize_or_zero(from_dir.cross(to_dir));
        Quat::from_axis_angle(axis, cos.acos() * t) * from_dir
    };

    dir * len
}

/// Forward, up and right axes for a heading, with `+Y` as the reference up.
pub fn heading_basis(heading: Vec3) -> (Vec3, Vec3, Vec3) {
    let forward = normalize_or(heading, Vec3::Z);

    let mut up_ref = Vec3::Y;
    if forward.dot(up_ref).abs() > 0.97 {
        up_ref = Vec3::Z;
    }

    let right = normalize_or(up_ref.cross(forward), Vec3::X);
    let up = normalize_or(forward.cross(right), Vec3::Y);
    (forward, up, right)
}

/// Rotation taking local `+Z` onto `heading` and local `+Y` as close to world up
/// as the heading allows.
pub fn look_rotation(heading: Vec3) -> Quat {
    let (forward, up, right) = heading_basis(heading);
    Quat::from_mat3(&Mat3::from_cols(right, up, forward)).normalize()
}

pub fn clamp_finite(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if !value.is_finite() {
        return fallback;
    }
    value.clamp(min, max)
}

pub fn is_finite_vec(v: Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}
