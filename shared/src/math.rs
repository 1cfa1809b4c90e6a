//! Math aliases and small vector/rotation helpers shared by every crate.

use nalgebra as na;

use crate::constants::{CANONICAL_DOWN, KINDA_SMALL_NUMBER};

pub type Vec3 = na::Vector3<f32>;
pub type Quat = na::UnitQuaternion<f32>;

/// Rigid transform without scale (base transforms, montage root motion).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            translation: Vec3::zeros(),
            rotation: Quat::identity(),
        }
    }

    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            rotation: Quat::identity(),
        }
    }

    /// Local point → world point.
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.rotation * local + self.translation
    }

    /// World point → local point.
    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * (world - self.translation)
    }

    pub fn transform_vector(&self, local: Vec3) -> Vec3 {
        self.rotation * local
    }

    pub fn inverse_transform_vector(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * world
    }
}

pub fn canonical_down() -> Vec3 {
    Vec3::new(CANONICAL_DOWN[0], CANONICAL_DOWN[1], CANONICAL_DOWN[2])
}

/// Clamp the XY magnitude of `v` to `max`, leaving Z untouched.
pub fn clamp_2d(v: Vec3, max: f32) -> Vec3 {
    let max = max.max(0.0);
    let len_sq = v.x * v.x + v.y * v.y;
    if len_sq > max * max && len_sq > 0.0 {
        let scale = max / len_sq.sqrt();
        Vec3::new(v.x * scale, v.y * scale, v.z)
    } else {
        v
    }
}

pub fn is_nearly_zero(v: &Vec3, tolerance: f32) -> bool {
    v.x.abs() <= tolerance && v.y.abs() <= tolerance && v.z.abs() <= tolerance
}

/// Component-wise equality within `tolerance`.
pub fn nearly_equal(a: &Vec3, b: &Vec3, tolerance: f32) -> bool {
    is_nearly_zero(&(a - b), tolerance)
}

/// Euclidean distance within `tolerance`.
pub fn points_are_near(a: &Vec3, b: &Vec3, tolerance: f32) -> bool {
    (a - b).norm_squared() <= tolerance * tolerance
}

/// Unit vector or zero when `v` is too short to normalize.
pub fn safe_normal(v: &Vec3) -> Vec3 {
    v.try_normalize(KINDA_SMALL_NUMBER * KINDA_SMALL_NUMBER)
        .unwrap_or_else(Vec3::zeros)
}

/// Shortest-arc rotation taking unit vector `from` onto unit vector `to`.
///
/// Antiparallel inputs rotate half a turn about an axis orthogonal to `from`.
pub fn find_between_normals(from: &Vec3, to: &Vec3) -> Quat {
    if let Some(q) = Quat::rotation_between(from, to) {
        return q;
    }

    let axis = if from.x.abs() < 0.9 {
        from.cross(&Vec3::x())
    } else {
        from.cross(&Vec3::y())
    };
    let axis = na::Unit::new_normalize(axis);
    Quat::from_axis_angle(&axis, std::f32::consts::PI)
}

/// Split a rotation into (roll, pitch, yaw) radians.
pub fn to_euler(rotation: &Quat) -> (f32, f32, f32) {
    rotation.euler_angles()
}

pub fn from_euler(roll: f32, pitch: f32, yaw: f32) -> Quat {
    Quat::from_euler_angles(roll, pitch, yaw)
}

/// Keep yaw and roll, drop pitch. Facing frames ignore pitch.
pub fn without_pitch(rotation: &Quat) -> Quat {
    let (roll, _pitch, yaw) = rotation.euler_angles();
    Quat::from_euler_angles(roll, 0.0, yaw)
}

/// Rotation whose forward (+X) points along `dir`, with pitch dropped.
pub fn facing_yaw(dir: &Vec3) -> Quat {
    if dir.x == 0.0 && dir.y == 0.0 {
        return Quat::identity();
    }
    Quat::from_axis_angle(&Vec3::z_axis(), dir.y.atan2(dir.x))
}

/// Angle-wise rotation equality, like comparing two rotators with a degree tolerance.
pub fn rotations_equal(a: &Quat, b: &Quat, tolerance_deg: f32) -> bool {
    a.angle_to(b) <= tolerance_deg.to_radians()
}
